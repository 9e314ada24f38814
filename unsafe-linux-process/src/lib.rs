//! Unsafe Linux process management operations with safe wrappers
//!
//! This crate provides safe wrappers around the unsafe Linux system calls a
//! process supervisor needs: forking children, reaping them, signalling them,
//! installing signal handlers, arming the interval timer, and mapping shared
//! memory that survives `fork()`. All unsafe operations are contained within
//! this crate and exposed through safe APIs.

use std::time::Duration;

/// Errors that can occur during unsafe Linux operations
#[derive(Debug, thiserror::Error)]
pub enum UnsafeLinuxError {
    #[error("System call failed: {syscall}: {errno}")]
    SystemCallFailed { syscall: String, errno: i32 },

    #[error("Invalid parameter: {details}")]
    InvalidParameter { details: String },

    #[error("Process not found")]
    ProcessNotFound,
}

impl UnsafeLinuxError {
    /// The raw `errno` value, when the failure came from a system call.
    pub fn errno(&self) -> Option<i32> {
        match self {
            UnsafeLinuxError::SystemCallFailed { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}

// Signal numbers used by supervisor code, re-exported so callers never need
// libc directly.
pub const SIGHUP: i32 = libc::SIGHUP;
pub const SIGIO: i32 = libc::SIGIO;
pub const SIGALRM: i32 = libc::SIGALRM;
pub const SIGTERM: i32 = libc::SIGTERM;
pub const SIGKILL: i32 = libc::SIGKILL;
pub const SIGSEGV: i32 = libc::SIGSEGV;
pub const SIGUSR1: i32 = libc::SIGUSR1;
pub const SIGUSR2: i32 = libc::SIGUSR2;

pub const EINTR: i32 = libc::EINTR;
pub const ECHILD: i32 = libc::ECHILD;
pub const ESRCH: i32 = libc::ESRCH;

/// Lowest real-time signal number. A function because glibc reserves a few
/// real-time signals for its own threading internals at runtime.
pub fn sigrtmin() -> i32 {
    libc::SIGRTMIN()
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn syscall_failed(syscall: &str) -> UnsafeLinuxError {
    UnsafeLinuxError::SystemCallFailed {
        syscall: syscall.to_string(),
        errno: last_errno(),
    }
}

/// Which side of a `fork()` the caller is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkOutcome {
    /// The calling process; `child` is the new child's pid
    Parent { child: i32 },
    /// The newly created child process
    Child,
}

/// Safely fork the current process
pub fn safe_fork() -> Result<ForkOutcome, UnsafeLinuxError> {
    let pid = unsafe { libc::fork() };
    match pid {
        -1 => Err(syscall_failed("fork")),
        0 => Ok(ForkOutcome::Child),
        child => Ok(ForkOutcome::Parent { child }),
    }
}

/// Terminate a forked child without running atexit handlers or flushing
/// stdio buffers shared with the parent.
pub fn safe_exit_child(code: i32) -> ! {
    unsafe { libc::_exit(code) }
}

/// Safely get the current process ID
pub fn safe_get_pid() -> i32 {
    unsafe { libc::getpid() }
}

/// Safely get the parent process ID
pub fn safe_get_parent_pid() -> i32 {
    unsafe { libc::getppid() }
}

/// Exit status of a reaped child, as reported by `wait()`/`waitpid()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitStatus(i32);

impl WaitStatus {
    /// Wrap a raw `wstatus` word.
    pub fn from_raw(raw: i32) -> Self {
        WaitStatus(raw)
    }

    pub fn raw(self) -> i32 {
        self.0
    }

    /// True when the whole status word is zero: a plain `exit(0)`.
    pub fn is_clean(self) -> bool {
        self.0 == 0
    }

    pub fn exited(self) -> bool {
        libc::WIFEXITED(self.0)
    }

    /// Exit code passed to `exit()`, or 0 when the child did not exit normally.
    pub fn exit_code(self) -> i32 {
        if self.exited() {
            libc::WEXITSTATUS(self.0)
        } else {
            0
        }
    }

    pub fn signaled(self) -> bool {
        libc::WIFSIGNALED(self.0)
    }

    /// Signal that terminated the child, or 0 when it was not signal-killed.
    pub fn term_signal(self) -> i32 {
        if self.signaled() {
            libc::WTERMSIG(self.0)
        } else {
            0
        }
    }

    /// True when the child is stopped rather than exited (seen for traced
    /// children).
    pub fn stopped(self) -> bool {
        libc::WIFSTOPPED(self.0)
    }
}

/// Block until any child changes state, returning its pid and status.
///
/// Returns `SystemCallFailed` with `errno == EINTR` when a signal interrupted
/// the wait; callers use that as their wake-up mechanism.
pub fn safe_wait_any() -> Result<(i32, WaitStatus), UnsafeLinuxError> {
    let mut status: libc::c_int = 0;
    let pid = unsafe { libc::wait(&mut status) };
    if pid < 0 {
        return Err(syscall_failed("wait"));
    }
    Ok((pid, WaitStatus::from_raw(status)))
}

/// Block until the given child exits, retrying on EINTR.
pub fn safe_waitpid_blocking(pid: i32) -> Result<WaitStatus, UnsafeLinuxError> {
    loop {
        let mut status: libc::c_int = 0;
        let result = unsafe { libc::waitpid(pid, &mut status, 0) };
        if result == pid {
            return Ok(WaitStatus::from_raw(status));
        }
        let errno = last_errno();
        if errno == libc::EINTR {
            continue;
        }
        if errno == libc::ECHILD {
            return Err(UnsafeLinuxError::ProcessNotFound);
        }
        return Err(UnsafeLinuxError::SystemCallFailed {
            syscall: "waitpid".to_string(),
            errno,
        });
    }
}

/// Safely send a signal to a process
///
/// A process that no longer exists maps to `ProcessNotFound` so callers can
/// treat already-gone children uniformly.
pub fn safe_send_signal(pid: i32, signal: i32) -> Result<(), UnsafeLinuxError> {
    if pid <= 0 {
        return Err(UnsafeLinuxError::InvalidParameter {
            details: format!("cannot signal pid {}", pid),
        });
    }
    let result = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if result == -1 {
        let errno = last_errno();
        if errno == libc::ESRCH || errno == libc::ECHILD {
            return Err(UnsafeLinuxError::ProcessNotFound);
        }
        return Err(UnsafeLinuxError::SystemCallFailed {
            syscall: format!("kill({}, {})", pid, signal),
            errno,
        });
    }
    Ok(())
}

/// Safely check if a process is alive
pub fn safe_is_process_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

/// Safely send SIGKILL to a process
///
/// A process that is already gone is not an error.
pub fn safe_force_kill_process(pid: i32) -> Result<(), UnsafeLinuxError> {
    match safe_send_signal(pid, SIGKILL) {
        Err(UnsafeLinuxError::ProcessNotFound) => Ok(()),
        other => other,
    }
}

/// Requested disposition for a signal
#[derive(Clone, Copy)]
pub enum SignalDisposition {
    Default,
    Ignore,
    Catch(extern "C" fn(i32)),
}

/// Install a `sigaction` disposition for the given signal.
///
/// Handlers are installed without `SA_RESTART`: supervisor loops rely on the
/// blocking `wait()` returning EINTR when a signal is delivered.
pub fn safe_set_signal_handler(
    signal: i32,
    disposition: SignalDisposition,
) -> Result<(), UnsafeLinuxError> {
    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = match disposition {
        SignalDisposition::Default => libc::SIG_DFL,
        SignalDisposition::Ignore => libc::SIG_IGN,
        SignalDisposition::Catch(handler) => handler as *const () as libc::sighandler_t,
    };
    action.sa_flags = 0;
    unsafe { libc::sigemptyset(&mut action.sa_mask) };

    let result = unsafe { libc::sigaction(signal, &action, std::ptr::null_mut()) };
    if result == -1 {
        return Err(UnsafeLinuxError::SystemCallFailed {
            syscall: format!("sigaction({})", signal),
            errno: last_errno(),
        });
    }
    Ok(())
}

fn duration_to_timeval(duration: Duration) -> libc::timeval {
    libc::timeval {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_usec: duration.subsec_micros() as libc::suseconds_t,
    }
}

/// Arm the real-time interval timer to deliver one SIGALRM after `delay`.
///
/// A zero `delay` is rounded up to the minimum resolution so the timer still
/// fires instead of being disarmed.
pub fn safe_arm_alarm_timer(delay: Duration) -> Result<(), UnsafeLinuxError> {
    let delay = if delay.is_zero() {
        Duration::from_micros(1)
    } else {
        delay
    };
    let timer = libc::itimerval {
        it_interval: libc::timeval { tv_sec: 0, tv_usec: 0 },
        it_value: duration_to_timeval(delay),
    };
    let result = unsafe { libc::setitimer(libc::ITIMER_REAL, &timer, std::ptr::null_mut()) };
    if result == -1 {
        return Err(syscall_failed("setitimer"));
    }
    Ok(())
}

/// Disarm the real-time interval timer.
pub fn safe_cancel_alarm_timer() -> Result<(), UnsafeLinuxError> {
    let timer: libc::itimerval = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::setitimer(libc::ITIMER_REAL, &timer, std::ptr::null_mut()) };
    if result == -1 {
        return Err(syscall_failed("setitimer"));
    }
    Ok(())
}

/// Map a zero-initialised anonymous region shared across `fork()`.
pub fn safe_map_shared(len: usize) -> Result<*mut u8, UnsafeLinuxError> {
    if len == 0 {
        return Err(UnsafeLinuxError::InvalidParameter {
            details: "cannot map a zero-length region".to_string(),
        });
    }
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(syscall_failed("mmap"));
    }
    Ok(ptr as *mut u8)
}

/// Unmap a region previously returned by [`safe_map_shared`].
///
/// # Safety
/// `ptr` and `len` must describe exactly one live mapping from
/// [`safe_map_shared`], and no references into the region may outlive this
/// call.
pub unsafe fn unmap_shared(ptr: *mut u8, len: usize) -> Result<(), UnsafeLinuxError> {
    let result = libc::munmap(ptr as *mut libc::c_void, len);
    if result == -1 {
        return Err(syscall_failed("munmap"));
    }
    Ok(())
}
