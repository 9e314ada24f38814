//! Basic usage example for the worker manager
//!
//! Runs a manager with two event workers and one user worker until it is
//! terminated. Try it from another terminal:
//!
//! ```sh
//! kill -USR1 <manager pid>   # rolling reload of all workers
//! kill -TERM <manager pid>   # graceful shutdown
//! ```

use std::time::Duration;

use worker_manager::{Hooks, Manager, ManagerConfig, UserWorkerSpec, Workload};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = ManagerConfig::new(2)
        .max_wait_time(10)
        .manager_alarm(5)
        .reload_async(false);

    let workload = Workload::new(|slot| {
        println!("event worker {slot} (pid {}) serving", std::process::id());
        // A real worker would accept connections here; this one just parks
        // until the manager terminates it.
        loop {
            std::thread::sleep(Duration::from_secs(3600));
        }
    })
    .user_worker(UserWorkerSpec::new("heartbeat", |worker| {
        println!(
            "user worker {} (pid {}) running",
            worker.id,
            std::process::id()
        );
        loop {
            std::thread::sleep(Duration::from_secs(3600));
        }
    }));

    let hooks = Hooks::new()
        .on_manager_start(|| println!("manager up, pid {}", std::process::id()))
        .on_manager_tick(|| println!("manager tick"))
        .on_worker_error(|exit| {
            println!(
                "worker {} (pid {}) died: exit_code={} signal={}",
                exit.id, exit.pid, exit.exit_code, exit.signal
            );
        })
        .on_manager_stop(|| println!("manager stopped"));

    let mut manager = Manager::new(config, workload, hooks)?;
    manager.run()?;

    Ok(())
}
