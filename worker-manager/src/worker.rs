//! Worker records and the workload an operator hands to the manager

use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Role of the current process within the server's process tree
///
/// Set by the manager on startup and inside every child it forks; useful to
/// entrypoints and hooks that behave differently per process class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    Master,
    Manager,
    EventWorker,
    TaskWorker,
    UserWorker,
}

static CURRENT_ROLE: AtomicU8 = AtomicU8::new(0);

impl ProcessRole {
    fn as_u8(self) -> u8 {
        match self {
            ProcessRole::Master => 0,
            ProcessRole::Manager => 1,
            ProcessRole::EventWorker => 2,
            ProcessRole::TaskWorker => 3,
            ProcessRole::UserWorker => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ProcessRole::Manager,
            2 => ProcessRole::EventWorker,
            3 => ProcessRole::TaskWorker,
            4 => ProcessRole::UserWorker,
            _ => ProcessRole::Master,
        }
    }
}

/// The role of the calling process.
pub fn current_role() -> ProcessRole {
    ProcessRole::from_u8(CURRENT_ROLE.load(Ordering::SeqCst))
}

pub(crate) fn set_role(role: ProcessRole) {
    CURRENT_ROLE.store(role.as_u8(), Ordering::SeqCst);
}

/// Class of a supervised child process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerClass {
    /// Serves network requests; lives in a dense slot array
    Event,
    /// Executes queued background tasks; owned by the process pool
    Task,
    /// Operator-defined child with an operator-supplied entrypoint
    User,
}

impl fmt::Display for WorkerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerClass::Event => write!(f, "event"),
            WorkerClass::Task => write!(f, "task"),
            WorkerClass::User => write!(f, "user"),
        }
    }
}

/// Master/worker pipe descriptors, allocated elsewhere and only recorded here
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipePair {
    pub master: RawFd,
    pub worker: RawFd,
}

/// One-shot callback invoked when a traced child is observed in stopped state
pub type Tracer = Box<dyn FnOnce(&Worker)>;

/// Record of one supervised child process
pub struct Worker {
    /// Stable logical slot id within the global numbering
    pub id: u32,
    pub class: WorkerClass,
    /// Current OS pid, 0 until the first fork
    pub pid: i32,
    pub pipes: Option<PipePair>,
    tracer: Option<Tracer>,
}

impl Worker {
    pub fn new(id: u32, class: WorkerClass) -> Self {
        Self {
            id,
            class,
            pid: 0,
            pipes: None,
            tracer: None,
        }
    }

    /// Register a one-shot debugger-trace callback for this worker.
    pub fn set_tracer(&mut self, tracer: Tracer) {
        self.tracer = Some(tracer);
    }

    pub(crate) fn take_tracer(&mut self) -> Option<Tracer> {
        self.tracer.take()
    }

    pub(crate) fn has_tracer(&self) -> bool {
        self.tracer.is_some()
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("class", &self.class)
            .field("pid", &self.pid)
            .field("pipes", &self.pipes)
            .field("tracer", &self.tracer.is_some())
            .finish()
    }
}

/// Entrypoint of an event worker; the returned code becomes the child's exit
/// status. The entrypoint must close the listening sockets before serving.
pub type EventMain = Arc<dyn Fn(u32) -> i32>;

/// Entrypoint of a task worker, run inside the pool's forked children
pub type TaskMain = Arc<dyn Fn(u32) -> i32>;

/// Entrypoint of a user worker, run inside the forked child; the child exits
/// 0 when it returns
pub type UserMain = Arc<dyn Fn(&Worker)>;

/// Roster entry for one user worker
#[derive(Clone)]
pub struct UserWorkerSpec {
    name: String,
    main: UserMain,
}

impl UserWorkerSpec {
    pub fn new<F>(name: impl Into<String>, main: F) -> Self
    where
        F: Fn(&Worker) + 'static,
    {
        Self {
            name: name.into(),
            main: Arc::new(main),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn main(&self) -> UserMain {
        Arc::clone(&self.main)
    }
}

impl fmt::Debug for UserWorkerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserWorkerSpec")
            .field("name", &self.name)
            .finish()
    }
}

/// The code the manager runs inside the children it forks
#[derive(Clone)]
pub struct Workload {
    pub(crate) event_main: EventMain,
    pub(crate) task_main: Option<TaskMain>,
    pub(crate) user_workers: Vec<UserWorkerSpec>,
}

impl Workload {
    /// Create a workload from the event-worker entrypoint
    pub fn new<F>(event_main: F) -> Self
    where
        F: Fn(u32) -> i32 + 'static,
    {
        Self {
            event_main: Arc::new(event_main),
            task_main: None,
            user_workers: Vec::new(),
        }
    }

    /// Set the task-worker entrypoint (required when task workers are
    /// configured)
    pub fn task_main<F>(mut self, main: F) -> Self
    where
        F: Fn(u32) -> i32 + 'static,
    {
        self.task_main = Some(Arc::new(main));
        self
    }

    /// Append a user worker to the roster
    pub fn user_worker(mut self, spec: UserWorkerSpec) -> Self {
        self.user_workers.push(spec);
        self
    }
}

impl fmt::Debug for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workload")
            .field("task_main", &self.task_main.is_some())
            .field("user_workers", &self.user_workers)
            .finish()
    }
}
