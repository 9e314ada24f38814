//! Operator-supplied lifecycle callbacks

/// Details of an abnormal worker exit, passed to [`Hooks::on_worker_error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// Logical worker id
    pub id: u32,
    /// Pid the worker had when it died
    pub pid: i32,
    /// Exit code, 0 when the worker was killed by a signal
    pub exit_code: i32,
    /// Terminating signal, 0 when the worker exited on its own
    pub signal: i32,
}

/// Optional callbacks invoked by the manager at lifecycle points.
///
/// All hooks run in the manager process, in loop context, never in signal
/// context. Every field defaults to `None`.
#[derive(Default)]
pub struct Hooks {
    /// Called once after the supervisor loop is set up
    pub on_manager_start: Option<Box<dyn FnMut()>>,
    /// Called once before the manager returns from a clean shutdown
    pub on_manager_stop: Option<Box<dyn FnMut()>>,
    /// Called for every abnormal worker exit, before the respawn
    pub on_worker_error: Option<Box<dyn FnMut(&WorkerExit)>>,
    /// Called on the periodic tick when `manager_alarm` is configured
    pub on_manager_tick: Option<Box<dyn FnMut()>>,
    /// Called when the log-reopen signal is received
    pub on_reopen_logs: Option<Box<dyn FnMut()>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_manager_start<F: FnMut() + 'static>(mut self, hook: F) -> Self {
        self.on_manager_start = Some(Box::new(hook));
        self
    }

    pub fn on_manager_stop<F: FnMut() + 'static>(mut self, hook: F) -> Self {
        self.on_manager_stop = Some(Box::new(hook));
        self
    }

    pub fn on_worker_error<F: FnMut(&WorkerExit) + 'static>(mut self, hook: F) -> Self {
        self.on_worker_error = Some(Box::new(hook));
        self
    }

    pub fn on_manager_tick<F: FnMut() + 'static>(mut self, hook: F) -> Self {
        self.on_manager_tick = Some(Box::new(hook));
        self
    }

    pub fn on_reopen_logs<F: FnMut() + 'static>(mut self, hook: F) -> Self {
        self.on_reopen_logs = Some(Box::new(hook));
        self
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("on_manager_start", &self.on_manager_start.is_some())
            .field("on_manager_stop", &self.on_manager_stop.is_some())
            .field("on_worker_error", &self.on_worker_error.is_some())
            .field("on_manager_tick", &self.on_manager_tick.is_some())
            .field("on_reopen_logs", &self.on_reopen_logs.is_some())
            .finish()
    }
}
