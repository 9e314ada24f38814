//! Force-kill escalation: a reload must terminate even when workers ignore
//! SIGTERM, via the SIGKILL deadline configured with `max_wait_time`.

mod common;

use common::*;
use std::time::Duration;
use unsafe_linux_process::{
    safe_is_process_alive, safe_send_signal, safe_set_signal_handler, SignalDisposition, SIGTERM,
    SIGUSR1,
};
use worker_manager::{Hooks, Manager, ManagerConfig, Workload};

#[test]
fn test_reload_force_kills_workers_that_ignore_sigterm() {
    let dir = scratch_dir("timeout_reload");

    // The first incarnation of every slot ignores SIGTERM; respawned
    // incarnations terminate normally so the final shutdown can reap them.
    let workload = Workload::new({
        let dir = dir.clone();
        move |slot| {
            let stubborn_marker = dir.join(format!("stubborn_{slot}"));
            if !stubborn_marker.exists() {
                let _ = std::fs::write(&stubborn_marker, "x");
                let _ = safe_set_signal_handler(SIGTERM, SignalDisposition::Ignore);
            }
            let _ = std::fs::write(pid_file(&dir, slot), std::process::id().to_string());
            loop {
                std::thread::sleep(Duration::from_secs(3600));
            }
        }
    });

    let config = ManagerConfig::new(2).max_wait_time(1);
    let manager = Manager::new(config, workload, Hooks::new()).expect("manager construction failed");
    let manager_pid = manager.start().expect("manager start failed");

    assert!(
        wait_for(Duration::from_secs(10), || {
            read_pid(&pid_file(&dir, 0)).is_some() && read_pid(&pid_file(&dir, 1)).is_some()
        }),
        "event workers did not start"
    );
    let old0 = read_pid(&pid_file(&dir, 0)).unwrap();
    let old1 = read_pid(&pid_file(&dir, 1)).unwrap();

    // A reload signal only takes effect once the manager is parked in its
    // blocking wait; give it a moment to get there before signalling.
    std::thread::sleep(Duration::from_millis(300));
    safe_send_signal(manager_pid, SIGUSR1).expect("failed to send SIGUSR1");

    // SIGTERM is ignored, so only the deadline can replace the workers.
    assert!(
        wait_for(Duration::from_secs(20), || {
            matches!(read_pid(&pid_file(&dir, 0)), Some(pid) if pid != old0)
                && matches!(read_pid(&pid_file(&dir, 1)), Some(pid) if pid != old1)
        }),
        "stubborn workers were not force-killed and replaced"
    );
    assert!(!safe_is_process_alive(old0));
    assert!(!safe_is_process_alive(old1));

    stop_manager(manager_pid);
    let _ = std::fs::remove_dir_all(&dir);
}
