//! Worker Manager - supervisor for the worker processes of a multi-process server
//!
//! This library implements the manager side of a prefork server: a long-lived
//! process whose sole responsibility is the lifecycle of its worker children.
//! It forks three classes of workers, reaps their exits, respawns casualties,
//! and performs rolling reloads with a graceful-then-forced termination
//! policy.
//!
//! - **Event workers** serve network requests and live in a dense slot array;
//!   every slot is kept populated for the manager's whole lifetime.
//! - **Task workers** run queued background work inside a process pool.
//! - **User workers** are operator-defined children with their own
//!   entrypoints.
//!
//! The manager is driven entirely by signals: `SIGTERM` shuts it down,
//! `SIGUSR1` reloads everything, `SIGUSR2` reloads the task pool, `SIGIO`
//! announces a restart request queued in shared memory, and `SIGALRM` drives
//! the timer facility. Workers can ask for a peer to be respawned through
//! the process-shared [`RestartChannel`].
//!
//! ```no_run
//! use worker_manager::{Hooks, Manager, ManagerConfig, Workload};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ManagerConfig::new(4).max_wait_time(30).reload_async(true);
//!
//!     let workload = Workload::new(|slot| {
//!         // Serve requests until told to stop; the exit code becomes the
//!         // child's status.
//!         println!("event worker {slot} serving");
//!         0
//!     });
//!
//!     let hooks = Hooks::new().on_worker_error(|exit| {
//!         eprintln!("worker {} (pid {}) died", exit.id, exit.pid);
//!     });
//!
//!     let mut manager = Manager::new(config, workload, hooks)?;
//!     manager.run()?;
//!     Ok(())
//! }
//! ```

mod channel;
mod config;
mod error;
mod hooks;
mod manager;
mod pool;
mod reload;
mod signals;
mod timer;
mod worker;

pub use channel::{RestartChannel, RestartMessage};
pub use config::ManagerConfig;
pub use error::{ChannelError, ManagerError};
pub use hooks::{Hooks, WorkerExit};
pub use manager::Manager;
pub use worker::{
    current_role, PipePair, ProcessRole, Tracer, UserWorkerSpec, Worker, WorkerClass, Workload,
};
