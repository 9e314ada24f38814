//! Common helpers for the manager integration tests
//!
//! Every test here runs a real manager in a forked child process, signals it
//! from the test, and observes the effects through scratch files written by
//! worker entrypoints and manager hooks.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use unsafe_linux_process::{safe_send_signal, safe_waitpid_blocking, SIGTERM};
use worker_manager::WorkerExit;

/// Create a fresh scratch directory for one test.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("worker_manager_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("failed to create scratch directory");
    dir
}

pub fn pid_file(dir: &Path, slot: u32) -> PathBuf {
    dir.join(format!("worker_{slot}.pid"))
}

pub fn read_pid(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Poll `condition` every 50ms until it holds or `timeout` elapses.
pub fn wait_for<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    condition()
}

/// Event-worker entrypoint that records its pid in the scratch directory and
/// parks until terminated.
pub fn parked_worker(dir: &Path) -> impl Fn(u32) -> i32 + 'static {
    let dir = dir.to_path_buf();
    move |slot| {
        let _ = std::fs::write(pid_file(&dir, slot), std::process::id().to_string());
        loop {
            std::thread::sleep(Duration::from_secs(3600));
        }
    }
}

/// Worker-error hook that appends `id pid exit_code signal` lines to a file.
pub fn error_journal_hook(path: PathBuf) -> impl FnMut(&WorkerExit) + 'static {
    move |exit| {
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            let _ = writeln!(file, "{} {} {} {}", exit.id, exit.pid, exit.exit_code, exit.signal);
        }
    }
}

/// Append one line to a file, creating it if needed.
pub fn append_line(path: &Path, line: &str) {
    if let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        let _ = writeln!(file, "{line}");
    }
}

/// Gracefully stop a manager child and assert it exited cleanly.
pub fn stop_manager(manager_pid: i32) {
    safe_send_signal(manager_pid, SIGTERM).expect("failed to signal the manager");
    let status = safe_waitpid_blocking(manager_pid).expect("failed to reap the manager");
    assert!(
        status.is_clean(),
        "manager exited uncleanly: raw status {}",
        status.raw()
    );
}
