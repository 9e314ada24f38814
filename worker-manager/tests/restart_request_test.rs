//! Restart-request channel, end to end: a worker queues a peer's logical id
//! in the shared ring and raises SIGIO; the manager drains the ring and
//! forks a replacement into that slot.

mod common;

use common::*;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use unsafe_linux_process::{safe_force_kill_process, safe_is_process_alive};
use worker_manager::{Hooks, Manager, ManagerConfig, RestartChannel, Workload};

#[test]
fn test_worker_requested_restart_of_a_peer() {
    let dir = scratch_dir("restart_request");

    // The channel handle only exists once the manager does; the entrypoint
    // picks it up through this cell, which the fork duplicates.
    let channel_cell: Arc<OnceLock<RestartChannel>> = Arc::new(OnceLock::new());

    let workload = Workload::new({
        let dir = dir.clone();
        let channel_cell = Arc::clone(&channel_cell);
        move |slot| {
            let _ = std::fs::write(pid_file(&dir, slot), std::process::id().to_string());
            if slot == 1 {
                let requested_marker = dir.join("requested");
                if !requested_marker.exists() {
                    let _ = std::fs::write(&requested_marker, "x");
                    // The SIGIO nudge only wakes the manager once it is
                    // parked in its blocking wait; request well after boot.
                    std::thread::sleep(Duration::from_secs(2));
                    if let Some(channel) = channel_cell.get() {
                        let _ = channel.request_restart(0);
                    }
                }
            }
            loop {
                std::thread::sleep(Duration::from_secs(3600));
            }
        }
    });

    let manager = Manager::new(ManagerConfig::new(2), workload, Hooks::new())
        .expect("manager construction failed");
    channel_cell
        .set(manager.restart_channel())
        .unwrap_or_else(|_| panic!("channel cell already set"));
    let manager_pid = manager.start().expect("manager start failed");

    assert!(
        wait_for(Duration::from_secs(10), || {
            read_pid(&pid_file(&dir, 0)).is_some() && read_pid(&pid_file(&dir, 1)).is_some()
        }),
        "event workers did not start"
    );
    let old0 = read_pid(&pid_file(&dir, 0)).unwrap();

    // Worker 1 asked for slot 0 to be respawned; a fresh process takes the
    // slot over.
    assert!(
        wait_for(Duration::from_secs(10), || {
            matches!(read_pid(&pid_file(&dir, 0)), Some(pid) if pid != old0)
        }),
        "slot 0 was not restarted on request"
    );
    let new0 = read_pid(&pid_file(&dir, 0)).unwrap();
    assert!(safe_is_process_alive(new0));

    // The displaced process is no longer tracked by the manager; clear it
    // out before shutting down.
    safe_force_kill_process(old0).expect("failed to kill the displaced worker");

    stop_manager(manager_pid);
    let _ = std::fs::remove_dir_all(&dir);
}
