//! The manager process: spawns workers, reaps exits, drives reloads
//!
//! Single-threaded supervisor loop. The only blocking points are the
//! `wait()` for child-state changes and the short sleep between fork retries;
//! signal handlers interrupt the wait and leave flags for the loop to act on.

use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use unsafe_linux_process::{
    safe_arm_alarm_timer, safe_cancel_alarm_timer, safe_exit_child, safe_fork,
    safe_force_kill_process, safe_get_pid, safe_is_process_alive, safe_send_signal,
    safe_wait_any, safe_waitpid_blocking, ForkOutcome, UnsafeLinuxError, WaitStatus, EINTR,
    SIGSEGV, SIGTERM,
};

use crate::channel::RestartChannel;
use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::hooks::{Hooks, WorkerExit};
use crate::pool::ProcessPool;
use crate::reload::{DrainOutcome, ReloadScope, ReloadState, ReloadTarget, TermResult};
use crate::signals;
use crate::timer::{Timer, TimerEvent};
use crate::worker::{self, EventMain, ProcessRole, UserWorkerSpec, Worker, WorkerClass, Workload};

/// Backoff between fork attempts while respawning a crashed worker.
const FORK_RETRY_DELAY: Duration = Duration::from_millis(100);

const BUG_REPORT: &str =
    "worker died of a segmentation fault; please file a bug report with the core dump";

/// Supervisor for the worker processes of a multi-process server
///
/// Owns the process table of all three worker classes, the restart-request
/// channel, the timer facility, and the reload state machine. Constructed in
/// the master process; [`run`](Manager::run) supervises in the calling
/// process, [`start`](Manager::start) forks a dedicated manager process.
pub struct Manager {
    config: ManagerConfig,
    hooks: Hooks,
    event_main: EventMain,
    event_workers: Vec<Worker>,
    pool: Option<ProcessPool>,
    user_specs: Vec<UserWorkerSpec>,
    user_workers: Vec<Worker>,
    user_pid_index: HashMap<i32, usize>,
    channel: RestartChannel,
    timer: Timer,
    reload: ReloadState,
}

impl Manager {
    /// Build a manager from its configuration, workload, and hooks.
    ///
    /// Allocates the restart channel up front so that workers forked later
    /// inherit the shared mapping.
    pub fn new(
        config: ManagerConfig,
        workload: Workload,
        hooks: Hooks,
    ) -> Result<Self, ManagerError> {
        config.validate()?;
        if config.task_worker_num > 0 && workload.task_main.is_none() {
            return Err(ManagerError::InvalidConfig {
                details: "task workers configured without a task entrypoint".to_string(),
            });
        }

        let channel = RestartChannel::create(config.restart_channel_capacity).map_err(|e| {
            ManagerError::ChannelFailed {
                details: e.to_string(),
            }
        })?;

        let event_workers = (0..config.worker_num)
            .map(|id| Worker::new(id, WorkerClass::Event))
            .collect();

        let pool = workload.task_main.as_ref().and_then(|main| {
            (config.task_worker_num > 0).then(|| {
                ProcessPool::new(config.worker_num, config.task_worker_num, main.clone())
            })
        });

        let user_base = config.worker_num + config.task_worker_num;
        let user_workers = (0..workload.user_workers.len())
            .map(|index| Worker::new(user_base + index as u32, WorkerClass::User))
            .collect();

        Ok(Self {
            config,
            hooks,
            event_main: workload.event_main,
            event_workers,
            pool,
            user_specs: workload.user_workers,
            user_workers,
            user_pid_index: HashMap::new(),
            channel,
            timer: Timer::new(),
            reload: ReloadState::default(),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Handle to the restart-request channel, to be captured into worker
    /// entrypoints before the workers are forked.
    pub fn restart_channel(&self) -> RestartChannel {
        self.channel.clone()
    }

    pub fn event_workers(&self) -> &[Worker] {
        &self.event_workers
    }

    /// Mutable access to an event-worker record, for attaching pipe handles
    /// or a tracer before startup.
    pub fn event_worker_mut(&mut self, slot: usize) -> Option<&mut Worker> {
        self.event_workers.get_mut(slot)
    }

    pub fn user_workers(&self) -> &[Worker] {
        &self.user_workers
    }

    /// Spawn the initial workers and supervise them in the calling process.
    ///
    /// Returns after a clean shutdown; startup failures surface as errors.
    /// Handlers are installed before the first fork: a worker may raise SIGIO
    /// immediately, and the default disposition would terminate the manager.
    pub fn run(&mut self) -> Result<(), ManagerError> {
        worker::set_role(ProcessRole::Manager);
        signals::install().map_err(|e| ManagerError::StartupFailed {
            reason: format!("installing signal handlers: {}", e),
        })?;
        self.spawn_initial()?;
        self.supervise()
    }

    /// Fork a dedicated manager process and return its pid.
    ///
    /// The child runs [`run`](Manager::run) and exits with 0 on clean
    /// shutdown, 1 on failure.
    pub fn start(mut self) -> Result<i32, ManagerError> {
        match safe_fork() {
            Err(source) => Err(ManagerError::StartupFailed {
                reason: format!("forking the manager: {}", source),
            }),
            Ok(ForkOutcome::Parent { child }) => Ok(child),
            Ok(ForkOutcome::Child) => {
                let code = match self.run() {
                    Ok(()) => 0,
                    Err(error) => {
                        error!(%error, "manager failed");
                        1
                    }
                };
                safe_exit_child(code);
            }
        }
    }

    fn spawn_initial(&mut self) -> Result<(), ManagerError> {
        if let Some(pool) = self.pool.as_mut() {
            pool.start()?;
        }
        for slot in 0..self.event_workers.len() {
            let pid = self.spawn_event(slot as u32)?;
            self.event_workers[slot].pid = pid;
            debug!(slot, pid, "event worker started");
        }
        for index in 0..self.user_specs.len() {
            self.spawn_user(index)?;
        }
        Ok(())
    }

    /// The supervisor loop proper.
    fn supervise(&mut self) -> Result<(), ManagerError> {
        if let Some(hook) = self.hooks.on_manager_start.as_mut() {
            hook();
        }
        info!(
            pid = safe_get_pid(),
            workers = self.config.worker_num,
            task_workers = self.config.task_worker_num,
            user_workers = self.user_workers.len(),
            "manager started"
        );

        if self.config.manager_alarm > 0 {
            let now = Instant::now();
            self.timer.schedule_interval(
                now,
                Duration::from_secs(self.config.manager_alarm),
                TimerEvent::ManagerTick,
            );
            self.rearm_alarm(now);
        }

        while signals::running() {
            let wait_result = safe_wait_any();

            if signals::take_read_message() {
                self.drain_restart_requests();
            }
            if signals::take_signal_alarm() {
                self.run_timers();
            }
            if signals::take_reopen_log() {
                info!("reopening log files");
                if let Some(hook) = self.hooks.on_reopen_logs.as_mut() {
                    hook();
                }
            }

            match wait_result {
                Err(error) => {
                    let captured = signals::reloading() && self.try_capture();
                    if !captured {
                        if error.errno() != Some(EINTR) {
                            warn!(%error, "wait() failed");
                        }
                        continue;
                    }
                }
                Ok((pid, status)) => {
                    if signals::running() && self.handle_child_event(pid, status) {
                        // Stopped-trace hook ran; this was not an exit.
                        continue;
                    }
                }
            }

            self.reload_step();
        }

        self.shutdown()
    }

    /// Drain the restart-request channel in FIFO order.
    fn drain_restart_requests(&mut self) {
        while let Some(message) = self.channel.pop() {
            if !signals::running() {
                continue;
            }
            let worker_id = message.worker_id;
            if worker_id < self.config.worker_num {
                match self.spawn_event(worker_id) {
                    Ok(pid) => {
                        self.event_workers[worker_id as usize].pid = pid;
                        info!(worker_id, pid, "event worker restarted on request");
                    }
                    Err(error) => {
                        warn!(worker_id, %error, "requested event-worker restart failed")
                    }
                }
            } else if let Some(index) = self
                .pool
                .as_ref()
                .and_then(|p| p.index_by_global_id(worker_id))
            {
                match self.pool.as_mut().unwrap().respawn(index) {
                    Ok(pid) => info!(worker_id, pid, "task worker restarted on request"),
                    Err(error) => {
                        warn!(worker_id, %error, "requested task-worker restart failed")
                    }
                }
            } else {
                warn!(worker_id, "restart request for unknown worker id");
            }
        }
    }

    /// Execute the timer events whose deadlines have passed.
    fn run_timers(&mut self) {
        let now = Instant::now();
        for event in self.timer.poll_due(now) {
            match event {
                TimerEvent::ManagerTick => {
                    if let Some(hook) = self.hooks.on_manager_tick.as_mut() {
                        hook();
                    }
                }
                TimerEvent::KillTimeout(targets) => self.kill_timed_out(&targets),
            }
        }
        self.rearm_alarm(Instant::now());
    }

    /// SIGKILL every snapshot target that outlived the graceful window.
    fn kill_timed_out(&self, targets: &[ReloadTarget]) {
        for target in targets {
            if !safe_is_process_alive(target.pid) {
                continue;
            }
            match safe_force_kill_process(target.pid) {
                Ok(()) => warn!(
                    id = target.id,
                    pid = target.pid,
                    "worker exit timeout, forced kill"
                ),
                Err(error) => {
                    error!(id = target.id, pid = target.pid, %error, "SIGKILL failed")
                }
            }
        }
    }

    fn rearm_alarm(&self, now: Instant) {
        if let Some(delay) = self.timer.next_delay(now) {
            if let Err(error) = safe_arm_alarm_timer(delay) {
                warn!(%error, "failed to arm the alarm timer");
            }
        }
    }

    /// Capture a reload snapshot when a reload signal has been observed.
    ///
    /// Returns true when a capture happened and the drain phase should run
    /// in this iteration.
    fn try_capture(&mut self) -> bool {
        if !self.reload.is_idle() {
            return false;
        }
        if signals::take_reload_all() {
            info!("reloading all workers");
            self.reload.begin_capture(ReloadScope::Full);
            self.capture_snapshot(ReloadScope::Full);
            true
        } else if signals::take_reload_tasks() {
            let has_tasks = self.pool.as_ref().is_some_and(|p| p.len() > 0);
            if !has_tasks {
                warn!("cannot reload task workers, task workers are not started");
                signals::abort_task_reload();
                return false;
            }
            info!("reloading task workers");
            self.reload.begin_capture(ReloadScope::TasksOnly);
            self.capture_snapshot(ReloadScope::TasksOnly);
            true
        } else {
            false
        }
    }

    /// Freeze the target list, schedule the force-kill deadlines, and enter
    /// the drain phase.
    fn capture_snapshot(&mut self, scope: ReloadScope) {
        let now = Instant::now();
        let mut targets: Vec<ReloadTarget> = Vec::new();
        let mut cursor = 0;

        match scope {
            ReloadScope::Full => {
                let event_targets: Vec<ReloadTarget> = self
                    .event_workers
                    .iter()
                    .map(|worker| ReloadTarget {
                        id: worker.id,
                        pid: worker.pid,
                    })
                    .collect();
                self.add_timeout_killer(now, &event_targets);
                targets.extend_from_slice(&event_targets);

                if let Some(pool) = self.pool.as_ref() {
                    let task_targets = pool.snapshot_targets();
                    self.add_timeout_killer(now, &task_targets);
                    targets.extend_from_slice(&task_targets);
                }

                if self.config.reload_async {
                    // Terminate the whole event group up front; draining then
                    // proceeds through the task group while the event slots
                    // restart concurrently.
                    for target in &targets[..event_targets.len()] {
                        match safe_send_signal(target.pid, SIGTERM) {
                            Ok(()) | Err(UnsafeLinuxError::ProcessNotFound) => {}
                            Err(error) => error!(
                                id = target.id,
                                pid = target.pid,
                                %error,
                                "failed to terminate event worker for reload"
                            ),
                        }
                    }
                    cursor = event_targets.len();
                }
            }
            ReloadScope::TasksOnly => {
                let task_targets = self
                    .pool
                    .as_ref()
                    .map(|pool| pool.snapshot_targets())
                    .unwrap_or_default();
                self.add_timeout_killer(now, &task_targets);
                targets = task_targets;
            }
        }

        self.reload.start_draining(targets, cursor);
        self.rearm_alarm(now);
    }

    fn add_timeout_killer(&mut self, now: Instant, targets: &[ReloadTarget]) {
        if self.config.max_wait_time == 0 || targets.is_empty() {
            return;
        }
        self.timer.schedule_once(
            now,
            Duration::from_secs(self.config.max_wait_time),
            TimerEvent::KillTimeout(targets.to_vec()),
        );
    }

    /// Advance the drain phase at the end of a loop iteration.
    fn reload_step(&mut self) {
        let outcome = self.reload.drain_step(|target| {
            match safe_send_signal(target.pid, SIGTERM) {
                Ok(()) => TermResult::Delivered,
                Err(UnsafeLinuxError::ProcessNotFound) => TermResult::AlreadyGone,
                Err(error) => {
                    error!(
                        id = target.id,
                        pid = target.pid,
                        %error,
                        "failed to terminate reload target"
                    );
                    TermResult::Failed
                }
            }
        });
        if outcome == DrainOutcome::Completed {
            signals::finish_reload();
            info!("reload complete");
        }
    }

    /// Process one `wait()` notification.
    ///
    /// Returns true when the notification was a stopped-trace event and the
    /// loop should re-enter `wait()` without running the reload step.
    fn handle_child_event(&mut self, pid: i32, status: WaitStatus) -> bool {
        // Event workers: dense slot scan.
        if let Some(slot) = self.event_workers.iter().position(|w| w.pid == pid) {
            if status.stopped() && self.event_workers[slot].has_tracer() {
                if let Some(tracer) = self.event_workers[slot].take_tracer() {
                    tracer(&self.event_workers[slot]);
                }
                return true;
            }
            let id = self.event_workers[slot].id;
            self.check_exit_status(id, pid, status);
            self.respawn_event_slot(slot);
        }

        // Task workers: pid index.
        let task_index = self.pool.as_ref().and_then(|p| p.index_by_pid(pid));
        if let Some(index) = task_index {
            let stopped_traced = {
                let pool = self.pool.as_mut().unwrap();
                if status.stopped() && pool.worker(index).has_tracer() {
                    if let Some(tracer) = pool.worker_mut(index).take_tracer() {
                        tracer(pool.worker(index));
                    }
                    true
                } else {
                    false
                }
            };
            if stopped_traced {
                return true;
            }
            let id = self.pool.as_ref().unwrap().worker(index).id;
            self.check_exit_status(id, pid, status);
            match self.pool.as_mut().unwrap().respawn(index) {
                Ok(new_pid) => debug!(id, pid = new_pid, "task worker respawned"),
                Err(error) => warn!(id, %error, "failed to respawn task worker"),
            }
        }

        // User workers: pid index.
        if let Some(&index) = self.user_pid_index.get(&pid) {
            let id = self.user_workers[index].id;
            self.check_exit_status(id, pid, status);
            if let Err(error) = self.spawn_user(index) {
                warn!(id, %error, "failed to respawn user worker");
            }
        }

        self.reload.note_exit(pid);
        false
    }

    /// Log abnormal exits and invoke the operator's error hook.
    fn check_exit_status(&mut self, id: u32, pid: i32, status: WaitStatus) {
        if status.is_clean() {
            return;
        }
        let exit_code = status.exit_code();
        let signal = status.term_signal();
        warn!(
            id,
            pid,
            status = status.raw(),
            exit_code,
            signal,
            "worker abnormal exit"
        );
        if signal == SIGSEGV {
            error!(id, pid, "{}", BUG_REPORT);
        }
        if let Some(hook) = self.hooks.on_worker_error.as_mut() {
            hook(&WorkerExit {
                id,
                pid,
                exit_code,
                signal,
            });
        }
    }

    /// Fork a new event worker for `slot`; the child never returns.
    fn spawn_event(&self, slot: u32) -> Result<i32, ManagerError> {
        match safe_fork() {
            Err(source) => Err(ManagerError::SpawnFailed {
                class: WorkerClass::Event,
                id: slot,
                source,
            }),
            Ok(ForkOutcome::Child) => {
                signals::restore_child_defaults();
                worker::set_role(ProcessRole::EventWorker);
                let code = (self.event_main)(slot);
                safe_exit_child(code);
            }
            Ok(ForkOutcome::Parent { child }) => Ok(child),
        }
    }

    /// Refill an event slot after an exit, retrying until the fork succeeds.
    fn respawn_event_slot(&mut self, slot: usize) {
        loop {
            match self.spawn_event(slot as u32) {
                Ok(pid) => {
                    self.event_workers[slot].pid = pid;
                    debug!(slot, pid, "event worker respawned");
                    return;
                }
                Err(error) => {
                    warn!(slot, %error, "fork for event worker failed, retrying");
                    thread::sleep(FORK_RETRY_DELAY);
                }
            }
        }
    }

    /// Fork the user worker at `index`, refreshing the pid index.
    ///
    /// The old pid is removed before the new one is inserted, so the map
    /// never holds a dead key.
    fn spawn_user(&mut self, index: usize) -> Result<i32, ManagerError> {
        let old_pid = self.user_workers[index].pid;
        if old_pid != 0 {
            self.user_pid_index.remove(&old_pid);
            self.user_workers[index].pid = 0;
        }

        let id = self.user_workers[index].id;
        let main = self.user_specs[index].main();
        match safe_fork() {
            Err(source) => Err(ManagerError::SpawnFailed {
                class: WorkerClass::User,
                id,
                source,
            }),
            Ok(ForkOutcome::Child) => {
                signals::restore_child_defaults();
                worker::set_role(ProcessRole::UserWorker);
                self.user_workers[index].pid = safe_get_pid();
                main(&self.user_workers[index]);
                safe_exit_child(0);
            }
            Ok(ForkOutcome::Parent { child }) => {
                self.user_workers[index].pid = child;
                self.user_pid_index.insert(child, index);
                debug!(
                    id,
                    pid = child,
                    name = self.user_specs[index].name(),
                    "user worker started"
                );
                Ok(child)
            }
        }
    }

    /// Terminate and reap every child, then report the stop to the operator.
    fn shutdown(&mut self) -> Result<(), ManagerError> {
        info!("manager shutting down");
        signals::uninstall();
        let _ = safe_cancel_alarm_timer();
        self.timer.clear();

        for worker in &self.event_workers {
            if worker.pid <= 0 {
                continue;
            }
            debug!(id = worker.id, pid = worker.pid, "terminating event worker");
            match safe_send_signal(worker.pid, SIGTERM) {
                Ok(()) | Err(UnsafeLinuxError::ProcessNotFound) => {}
                Err(error) => warn!(
                    id = worker.id,
                    pid = worker.pid,
                    %error,
                    "failed to terminate event worker"
                ),
            }
        }

        if let Some(pool) = self.pool.as_mut() {
            pool.shutdown();
        }

        for worker in &mut self.event_workers {
            if worker.pid <= 0 {
                continue;
            }
            if let Err(error) = safe_waitpid_blocking(worker.pid) {
                warn!(pid = worker.pid, %error, "waitpid for event worker failed");
            }
            worker.pid = 0;
        }

        // Terminate, then reap, over a snapshot of the user pids; the map
        // itself is not consumed by iteration.
        let user_pids: Vec<i32> = self
            .user_workers
            .iter()
            .map(|worker| worker.pid)
            .filter(|&pid| pid > 0)
            .collect();
        for &pid in &user_pids {
            match safe_send_signal(pid, SIGTERM) {
                Ok(()) | Err(UnsafeLinuxError::ProcessNotFound) => {}
                Err(error) => warn!(pid, %error, "failed to terminate user worker"),
            }
        }
        for pid in user_pids {
            if let Err(error) = safe_waitpid_blocking(pid) {
                warn!(pid, %error, "waitpid for user worker failed");
            }
            self.user_pid_index.remove(&pid);
        }
        for worker in &mut self.user_workers {
            worker.pid = 0;
        }

        if let Some(hook) = self.hooks.on_manager_stop.as_mut() {
            hook();
        }
        info!("manager stopped");
        Ok(())
    }
}
