//! Signal dispatcher: translates POSIX signals into flags for the loop
//!
//! Handlers are restricted to storing single atomic bytes in this module's
//! process-global flag record; the supervisor loop reads and clears the flags
//! after its blocking `wait()` is interrupted. No allocation, logging, or
//! blocking calls happen in handler context.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use unsafe_linux_process::{
    safe_set_signal_handler, sigrtmin, SignalDisposition, UnsafeLinuxError, SIGALRM, SIGHUP,
    SIGIO, SIGTERM, SIGUSR1, SIGUSR2,
};

static RUNNING: AtomicBool = AtomicBool::new(true);
static RELOADING: AtomicBool = AtomicBool::new(false);
static RELOAD_ALL: AtomicBool = AtomicBool::new(false);
static RELOAD_TASKS: AtomicBool = AtomicBool::new(false);
static READ_MESSAGE: AtomicBool = AtomicBool::new(false);
static SIGNAL_ALARM: AtomicBool = AtomicBool::new(false);
static REOPEN_LOG: AtomicBool = AtomicBool::new(false);

// Resolved at install time; SIGRTMIN is not a compile-time constant under
// glibc.
static RTMIN: AtomicI32 = AtomicI32::new(-1);

extern "C" fn manager_signal_handler(signal: i32) {
    if signal == SIGTERM {
        RUNNING.store(false, Ordering::SeqCst);
    } else if signal == SIGUSR1 {
        // Reload requests arriving while a reload is in progress are
        // coalesced into the one already running.
        if !RELOADING.load(Ordering::SeqCst) {
            RELOADING.store(true, Ordering::SeqCst);
            RELOAD_ALL.store(true, Ordering::SeqCst);
        }
    } else if signal == SIGUSR2 {
        if !RELOADING.load(Ordering::SeqCst) {
            RELOADING.store(true, Ordering::SeqCst);
            RELOAD_TASKS.store(true, Ordering::SeqCst);
        }
    } else if signal == SIGIO {
        READ_MESSAGE.store(true, Ordering::SeqCst);
    } else if signal == SIGALRM {
        SIGNAL_ALARM.store(true, Ordering::SeqCst);
    } else if signal == RTMIN.load(Ordering::SeqCst) {
        REOPEN_LOG.store(true, Ordering::SeqCst);
    }
}

/// Install the manager's signal handlers and reset all flags.
pub(crate) fn install() -> Result<(), UnsafeLinuxError> {
    reset();
    RTMIN.store(sigrtmin(), Ordering::SeqCst);

    safe_set_signal_handler(SIGHUP, SignalDisposition::Ignore)?;
    for signal in [SIGTERM, SIGUSR1, SIGUSR2, SIGIO, SIGALRM, sigrtmin()] {
        safe_set_signal_handler(signal, SignalDisposition::Catch(manager_signal_handler))?;
    }
    Ok(())
}

/// Restore dispositions for shutdown so no new flag mutations occur.
///
/// SIGIO and SIGHUP are set to ignore rather than default: Linux terminates
/// on an unhandled SIGIO, and a worker may still emit a restart request while
/// the manager is mid-shutdown.
pub(crate) fn uninstall() {
    for signal in [SIGTERM, SIGUSR1, SIGUSR2, SIGALRM, sigrtmin()] {
        let _ = safe_set_signal_handler(signal, SignalDisposition::Default);
    }
    for signal in [SIGIO, SIGHUP] {
        let _ = safe_set_signal_handler(signal, SignalDisposition::Ignore);
    }
}

/// Reset every disposition to the default inside a freshly forked child, so
/// the manager's flag-setting handlers do not leak into workers.
pub(crate) fn restore_child_defaults() {
    for signal in [SIGHUP, SIGTERM, SIGUSR1, SIGUSR2, SIGIO, SIGALRM, sigrtmin()] {
        let _ = safe_set_signal_handler(signal, SignalDisposition::Default);
    }
}

pub(crate) fn running() -> bool {
    RUNNING.load(Ordering::SeqCst)
}

pub(crate) fn reloading() -> bool {
    RELOADING.load(Ordering::SeqCst)
}

pub(crate) fn take_read_message() -> bool {
    READ_MESSAGE.swap(false, Ordering::SeqCst)
}

pub(crate) fn take_signal_alarm() -> bool {
    SIGNAL_ALARM.swap(false, Ordering::SeqCst)
}

pub(crate) fn take_reopen_log() -> bool {
    REOPEN_LOG.swap(false, Ordering::SeqCst)
}

pub(crate) fn take_reload_all() -> bool {
    RELOAD_ALL.swap(false, Ordering::SeqCst)
}

pub(crate) fn take_reload_tasks() -> bool {
    RELOAD_TASKS.swap(false, Ordering::SeqCst)
}

/// Clear the reload-in-progress marker once a reload drains completely.
pub(crate) fn finish_reload() {
    RELOADING.store(false, Ordering::SeqCst);
}

/// Abort a task reload that has nothing to do.
pub(crate) fn abort_task_reload() {
    RELOAD_TASKS.store(false, Ordering::SeqCst);
    RELOADING.store(false, Ordering::SeqCst);
}

/// Reset all flags to their boot values.
pub(crate) fn reset() {
    RUNNING.store(true, Ordering::SeqCst);
    RELOADING.store(false, Ordering::SeqCst);
    RELOAD_ALL.store(false, Ordering::SeqCst);
    RELOAD_TASKS.store(false, Ordering::SeqCst);
    READ_MESSAGE.store(false, Ordering::SeqCst);
    SIGNAL_ALARM.store(false, Ordering::SeqCst);
    REOPEN_LOG.store(false, Ordering::SeqCst);
}
