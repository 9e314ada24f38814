//! Task-worker process pool
//!
//! Owns the task-worker records and their pid index. The manager observes
//! task exits through `wait()` and asks the pool to respawn; the pool does
//! the forking and keeps the pid map fresh.

use std::collections::HashMap;

use tracing::{debug, warn};
use unsafe_linux_process::{
    safe_exit_child, safe_fork, safe_send_signal, safe_waitpid_blocking, ForkOutcome,
    UnsafeLinuxError, SIGTERM,
};

use crate::error::ManagerError;
use crate::reload::ReloadTarget;
use crate::signals;
use crate::worker::{self, ProcessRole, TaskMain, Worker, WorkerClass};

pub(crate) struct ProcessPool {
    workers: Vec<Worker>,
    pid_index: HashMap<i32, usize>,
    main: TaskMain,
    base_id: u32,
}

impl ProcessPool {
    /// Create a pool of `count` task workers with global logical ids starting
    /// at `base_id`.
    pub fn new(base_id: u32, count: u32, main: TaskMain) -> Self {
        let workers = (0..count)
            .map(|offset| Worker::new(base_id + offset, WorkerClass::Task))
            .collect();
        Self {
            workers,
            pid_index: HashMap::new(),
            main,
            base_id,
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn worker(&self, index: usize) -> &Worker {
        &self.workers[index]
    }

    pub fn worker_mut(&mut self, index: usize) -> &mut Worker {
        &mut self.workers[index]
    }

    pub fn index_by_pid(&self, pid: i32) -> Option<usize> {
        self.pid_index.get(&pid).copied()
    }

    /// Resolve a global logical id to a pool index.
    pub fn index_by_global_id(&self, worker_id: u32) -> Option<usize> {
        worker_id
            .checked_sub(self.base_id)
            .map(|offset| offset as usize)
            .filter(|&offset| offset < self.workers.len())
    }

    /// Fork every task worker. Any failure here aborts startup.
    pub fn start(&mut self) -> Result<(), ManagerError> {
        for index in 0..self.workers.len() {
            let pid = self.respawn(index)?;
            debug!(id = self.workers[index].id, pid, "task worker started");
        }
        Ok(())
    }

    /// Fork a replacement for the worker at `index`.
    ///
    /// The previous pid is dropped from the index first, so a fork failure
    /// never leaves a dead pid behind as a key.
    pub fn respawn(&mut self, index: usize) -> Result<i32, ManagerError> {
        let old_pid = self.workers[index].pid;
        if old_pid != 0 {
            self.pid_index.remove(&old_pid);
            self.workers[index].pid = 0;
        }

        let pid = self.fork_worker(index)?;
        self.workers[index].pid = pid;
        self.pid_index.insert(pid, index);
        Ok(pid)
    }

    fn fork_worker(&self, index: usize) -> Result<i32, ManagerError> {
        let id = self.workers[index].id;
        match safe_fork() {
            Err(source) => Err(ManagerError::SpawnFailed {
                class: WorkerClass::Task,
                id,
                source,
            }),
            Ok(ForkOutcome::Child) => {
                signals::restore_child_defaults();
                worker::set_role(ProcessRole::TaskWorker);
                let code = (self.main)(id);
                safe_exit_child(code);
            }
            Ok(ForkOutcome::Parent { child }) => Ok(child),
        }
    }

    /// Snapshot of the pool for a reload: logical ids and current pids.
    pub fn snapshot_targets(&self) -> Vec<ReloadTarget> {
        self.workers
            .iter()
            .map(|worker| ReloadTarget {
                id: worker.id,
                pid: worker.pid,
            })
            .collect()
    }

    /// Terminate and reap every task worker.
    pub fn shutdown(&mut self) {
        for worker in &self.workers {
            if worker.pid <= 0 {
                continue;
            }
            match safe_send_signal(worker.pid, SIGTERM) {
                Ok(()) | Err(UnsafeLinuxError::ProcessNotFound) => {}
                Err(error) => warn!(id = worker.id, pid = worker.pid, %error, "failed to terminate task worker"),
            }
        }
        for worker in &mut self.workers {
            if worker.pid <= 0 {
                continue;
            }
            if let Err(error) = safe_waitpid_blocking(worker.pid) {
                warn!(id = worker.id, pid = worker.pid, %error, "waitpid for task worker failed");
            }
            worker.pid = 0;
        }
        self.pid_index.clear();
    }
}
