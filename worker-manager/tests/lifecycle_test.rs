//! Manager lifecycle: startup, steady state, crash recovery of event and
//! user workers, the periodic tick, and graceful shutdown, exercised against
//! a real forked manager process.

mod common;

use common::*;
use std::time::Duration;
use unsafe_linux_process::{safe_force_kill_process, safe_is_process_alive};
use worker_manager::{Hooks, Manager, ManagerConfig, UserWorkerSpec, Workload};

#[test]
fn test_startup_crash_respawn_and_shutdown() {
    let dir = scratch_dir("lifecycle");
    let errors = dir.join("errors.log");
    let ticks = dir.join("ticks.log");
    let stopped = dir.join("stopped");
    let user_pid_path = dir.join("user.pid");

    let config = ManagerConfig::new(2).manager_alarm(1);
    let workload = Workload::new(parked_worker(&dir)).user_worker(UserWorkerSpec::new("sentinel", {
        let user_pid_path = user_pid_path.clone();
        move |_| {
            let _ = std::fs::write(&user_pid_path, std::process::id().to_string());
            loop {
                std::thread::sleep(Duration::from_secs(3600));
            }
        }
    }));
    let hooks = Hooks::new()
        .on_worker_error(error_journal_hook(errors.clone()))
        .on_manager_tick({
            let ticks = ticks.clone();
            move || append_line(&ticks, "tick")
        })
        .on_manager_stop({
            let stopped = stopped.clone();
            move || {
                let _ = std::fs::write(&stopped, "done");
            }
        });

    let manager = Manager::new(config, workload, hooks).expect("manager construction failed");
    let manager_pid = manager.start().expect("manager start failed");

    // Both event slots and the user worker come up.
    assert!(
        wait_for(Duration::from_secs(10), || {
            read_pid(&pid_file(&dir, 0)).is_some()
                && read_pid(&pid_file(&dir, 1)).is_some()
                && read_pid(&user_pid_path).is_some()
        }),
        "workers did not start"
    );
    let pid0 = read_pid(&pid_file(&dir, 0)).unwrap();
    let pid1 = read_pid(&pid_file(&dir, 1)).unwrap();
    let user_pid = read_pid(&user_pid_path).unwrap();
    assert!(safe_is_process_alive(pid0));
    assert!(safe_is_process_alive(pid1));
    assert!(safe_is_process_alive(user_pid));

    // Steady state: nothing changes while nobody dies.
    std::thread::sleep(Duration::from_secs(1));
    assert_eq!(read_pid(&pid_file(&dir, 0)), Some(pid0));
    assert_eq!(read_pid(&pid_file(&dir, 1)), Some(pid1));
    assert_eq!(read_pid(&user_pid_path), Some(user_pid));

    // Crash event slot 0; the manager reports the casualty and refills the
    // slot.
    safe_force_kill_process(pid0).expect("failed to kill worker 0");
    assert!(
        wait_for(Duration::from_secs(10), || {
            matches!(read_pid(&pid_file(&dir, 0)), Some(pid) if pid != pid0)
        }),
        "slot 0 was not respawned"
    );
    let new_pid0 = read_pid(&pid_file(&dir, 0)).unwrap();
    assert!(safe_is_process_alive(new_pid0));
    // The untouched slot keeps its process.
    assert_eq!(read_pid(&pid_file(&dir, 1)), Some(pid1));

    // Crash the user worker; it is re-forked with a fresh pid.
    safe_force_kill_process(user_pid).expect("failed to kill the user worker");
    assert!(
        wait_for(Duration::from_secs(10), || {
            matches!(read_pid(&user_pid_path), Some(pid) if pid != user_pid)
        }),
        "user worker was not respawned"
    );
    let new_user_pid = read_pid(&user_pid_path).unwrap();
    assert!(safe_is_process_alive(new_user_pid));

    // The error hook saw both SIGKILL deaths with no exit code. The user
    // worker's logical id follows the event range.
    assert!(
        wait_for(Duration::from_secs(5), || {
            std::fs::read_to_string(&errors).is_ok_and(|journal| {
                journal.lines().any(|line| line == format!("0 {pid0} 0 9"))
                    && journal.lines().any(|line| line == format!("2 {user_pid} 0 9"))
            })
        }),
        "error journal is missing entries: {:?}",
        std::fs::read_to_string(&errors)
    );

    // The periodic tick is firing.
    assert!(
        wait_for(Duration::from_secs(5), || {
            std::fs::read_to_string(&ticks).is_ok_and(|s| !s.is_empty())
        }),
        "manager tick never fired"
    );

    // Graceful shutdown reaps every child and runs the stop hook.
    stop_manager(manager_pid);
    assert!(stopped.exists(), "stop hook did not run");
    assert!(
        wait_for(Duration::from_secs(5), || {
            !safe_is_process_alive(new_pid0)
                && !safe_is_process_alive(pid1)
                && !safe_is_process_alive(new_user_pid)
        }),
        "workers survived the shutdown"
    );

    let _ = std::fs::remove_dir_all(&dir);
}
