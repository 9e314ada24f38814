//! Manager configuration

use crate::error::ManagerError;

/// Default number of slots in the restart-request channel.
const DEFAULT_RESTART_CHANNEL_CAPACITY: u32 = 4096;

/// Complete configuration for a [`Manager`](crate::Manager)
///
/// Built with the chained setters, then checked once with [`validate`]
/// before any process is forked.
///
/// [`validate`]: ManagerConfig::validate
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Number of event-worker slots
    pub worker_num: u32,
    /// Number of task-worker slots (0 disables the task pool)
    pub task_worker_num: u32,
    /// Seconds a reload batch may take before stragglers are force-killed
    /// (0 disables the deadline)
    pub max_wait_time: u64,
    /// Period in seconds of the periodic manager tick (0 disables it)
    pub manager_alarm: u64,
    /// Whether a full reload terminates event workers in parallel instead of
    /// one slot at a time
    pub reload_async: bool,
    /// Number of message slots in the restart-request channel
    pub restart_channel_capacity: u32,
}

impl ManagerConfig {
    /// Create a configuration for `worker_num` event-worker slots
    pub fn new(worker_num: u32) -> Self {
        Self {
            worker_num,
            task_worker_num: 0,
            max_wait_time: 0,
            manager_alarm: 0,
            reload_async: false,
            restart_channel_capacity: DEFAULT_RESTART_CHANNEL_CAPACITY,
        }
    }

    /// Set the number of task-worker slots
    pub fn task_workers(mut self, count: u32) -> Self {
        self.task_worker_num = count;
        self
    }

    /// Set the reload force-kill deadline, in seconds
    pub fn max_wait_time(mut self, seconds: u64) -> Self {
        self.max_wait_time = seconds;
        self
    }

    /// Set the periodic manager tick period, in seconds
    pub fn manager_alarm(mut self, seconds: u64) -> Self {
        self.manager_alarm = seconds;
        self
    }

    /// Terminate event workers in parallel during a full reload
    pub fn reload_async(mut self, parallel: bool) -> Self {
        self.reload_async = parallel;
        self
    }

    /// Set the restart-request channel capacity
    pub fn restart_channel_capacity(mut self, slots: u32) -> Self {
        self.restart_channel_capacity = slots;
        self
    }

    /// Validate the configuration
    ///
    /// Ensures that:
    /// - At least one event-worker slot is configured
    /// - The restart channel has at least one slot
    /// - The combined worker count fits the logical-id numbering
    pub fn validate(&self) -> Result<(), ManagerError> {
        if self.worker_num == 0 {
            return Err(ManagerError::InvalidConfig {
                details: "worker_num must be at least 1".to_string(),
            });
        }

        if self.restart_channel_capacity == 0 {
            return Err(ManagerError::InvalidConfig {
                details: "restart_channel_capacity must be at least 1".to_string(),
            });
        }

        if self.worker_num.checked_add(self.task_worker_num).is_none() {
            return Err(ManagerError::InvalidConfig {
                details: "combined worker count overflows the logical id space".to_string(),
            });
        }

        Ok(())
    }
}
