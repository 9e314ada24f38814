//! Rolling-reload state machine
//!
//! A reload walks a frozen snapshot of worker pids, terminating one target at
//! a time (or the whole event group up front in async mode) and waiting for
//! the supervisor loop to observe each exit before moving on.

/// One entry of a reload snapshot: a worker's logical id and the pid it had
/// when the snapshot was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReloadTarget {
    pub id: u32,
    pub pid: i32,
}

/// Which workers a reload covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReloadScope {
    /// Event and task workers
    Full,
    /// Task workers only
    TasksOnly,
}

/// Result of delivering SIGTERM to the current drain target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TermResult {
    /// Signal delivered; wait for the exit to advance the cursor
    Delivered,
    /// Target already gone; skip it
    AlreadyGone,
    /// Delivery failed for another reason; hold this cursor position
    Failed,
}

/// Outcome of one drain step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DrainOutcome {
    /// No reload in progress
    NotDraining,
    /// Every snapshot target is accounted for; the machine is idle again
    Completed,
    /// A target was signalled; its exit will advance the cursor
    Waiting,
    /// Signal delivery failed; the cursor holds until the next step
    Stalled,
}

/// Reload progress, one variant per state
#[derive(Debug, Default)]
pub(crate) enum ReloadState {
    #[default]
    Idle,
    /// A reload signal has been observed; the snapshot is taken on the next
    /// loop iteration
    Capturing { scope: ReloadScope },
    /// Walking the captured snapshot
    Draining {
        targets: Vec<ReloadTarget>,
        cursor: usize,
        awaiting_pid: i32,
    },
}

impl ReloadState {
    pub fn is_idle(&self) -> bool {
        matches!(self, ReloadState::Idle)
    }

    /// Begin capturing for `scope`; a no-op unless currently idle.
    pub fn begin_capture(&mut self, scope: ReloadScope) {
        if self.is_idle() {
            *self = ReloadState::Capturing { scope };
        }
    }

    /// Install the captured snapshot and enter the drain phase.
    pub fn start_draining(&mut self, targets: Vec<ReloadTarget>, cursor: usize) {
        *self = ReloadState::Draining {
            targets,
            cursor,
            awaiting_pid: 0,
        };
    }

    /// Advance the cursor when the awaited target's exit is observed.
    pub fn note_exit(&mut self, pid: i32) {
        if let ReloadState::Draining {
            cursor,
            awaiting_pid,
            ..
        } = self
        {
            if pid == *awaiting_pid && *awaiting_pid != 0 {
                *cursor += 1;
                *awaiting_pid = 0;
            }
        }
    }

    /// Run one drain step: terminate the current target via `term`, skipping
    /// targets that are already gone, until a delivery sticks or the snapshot
    /// is exhausted.
    pub fn drain_step<K>(&mut self, mut term: K) -> DrainOutcome
    where
        K: FnMut(ReloadTarget) -> TermResult,
    {
        let ReloadState::Draining {
            targets,
            cursor,
            awaiting_pid,
        } = self
        else {
            return DrainOutcome::NotDraining;
        };

        loop {
            if *cursor >= targets.len() {
                *self = ReloadState::Idle;
                return DrainOutcome::Completed;
            }

            let target = targets[*cursor];
            *awaiting_pid = target.pid;
            match term(target) {
                TermResult::Delivered => return DrainOutcome::Waiting,
                TermResult::AlreadyGone => {
                    *cursor += 1;
                    *awaiting_pid = 0;
                }
                TermResult::Failed => return DrainOutcome::Stalled,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(pids: &[i32]) -> Vec<ReloadTarget> {
        pids.iter()
            .enumerate()
            .map(|(id, &pid)| ReloadTarget { id: id as u32, pid })
            .collect()
    }

    #[test]
    fn test_capture_only_from_idle() {
        let mut state = ReloadState::Idle;
        state.begin_capture(ReloadScope::Full);
        assert!(matches!(
            state,
            ReloadState::Capturing {
                scope: ReloadScope::Full
            }
        ));

        // A competing capture request cannot replace one in progress.
        state.begin_capture(ReloadScope::TasksOnly);
        assert!(matches!(
            state,
            ReloadState::Capturing {
                scope: ReloadScope::Full
            }
        ));
    }

    #[test]
    fn test_sequential_drain_waits_per_target() {
        let mut state = ReloadState::Idle;
        state.start_draining(targets(&[101, 102]), 0);

        let mut termed = Vec::new();
        let outcome = state.drain_step(|t| {
            termed.push(t.pid);
            TermResult::Delivered
        });
        assert_eq!(outcome, DrainOutcome::Waiting);
        assert_eq!(termed, vec![101]);

        // Unrelated exits do not advance the cursor.
        state.note_exit(999);
        let outcome = state.drain_step(|t| {
            termed.push(t.pid);
            TermResult::Delivered
        });
        assert_eq!(outcome, DrainOutcome::Waiting);
        assert_eq!(termed, vec![101, 101]);

        state.note_exit(101);
        let outcome = state.drain_step(|t| {
            termed.push(t.pid);
            TermResult::Delivered
        });
        assert_eq!(outcome, DrainOutcome::Waiting);
        assert_eq!(termed, vec![101, 101, 102]);

        state.note_exit(102);
        let outcome = state.drain_step(|_| TermResult::Delivered);
        assert_eq!(outcome, DrainOutcome::Completed);
        assert!(state.is_idle());
    }

    #[test]
    fn test_gone_targets_are_skipped_in_one_step() {
        let mut state = ReloadState::Idle;
        state.start_draining(targets(&[201, 202, 203]), 0);

        let mut termed = Vec::new();
        let outcome = state.drain_step(|t| {
            termed.push(t.pid);
            if t.pid == 203 {
                TermResult::Delivered
            } else {
                TermResult::AlreadyGone
            }
        });
        assert_eq!(outcome, DrainOutcome::Waiting);
        assert_eq!(termed, vec![201, 202, 203]);
    }

    #[test]
    fn test_all_targets_gone_completes_immediately() {
        let mut state = ReloadState::Idle;
        state.start_draining(targets(&[301, 302]), 0);

        let outcome = state.drain_step(|_| TermResult::AlreadyGone);
        assert_eq!(outcome, DrainOutcome::Completed);
        assert!(state.is_idle());
    }

    #[test]
    fn test_failed_delivery_holds_cursor() {
        let mut state = ReloadState::Idle;
        state.start_draining(targets(&[401, 402]), 0);

        assert_eq!(state.drain_step(|_| TermResult::Failed), DrainOutcome::Stalled);
        // The same target is retried on the next step.
        let mut termed = Vec::new();
        state.drain_step(|t| {
            termed.push(t.pid);
            TermResult::Delivered
        });
        assert_eq!(termed, vec![401]);
    }

    #[test]
    fn test_async_cursor_starts_past_event_range() {
        // Async full reload: the event group (first two targets) was already
        // terminated in parallel, draining proceeds through the task group.
        let mut state = ReloadState::Idle;
        state.start_draining(targets(&[501, 502, 503]), 2);

        let mut termed = Vec::new();
        let outcome = state.drain_step(|t| {
            termed.push(t.pid);
            TermResult::Delivered
        });
        assert_eq!(outcome, DrainOutcome::Waiting);
        assert_eq!(termed, vec![503]);

        state.note_exit(503);
        assert_eq!(
            state.drain_step(|_| TermResult::Delivered),
            DrainOutcome::Completed
        );
    }

    #[test]
    fn test_empty_snapshot_completes() {
        let mut state = ReloadState::Idle;
        state.start_draining(Vec::new(), 0);
        assert_eq!(
            state.drain_step(|_| TermResult::Delivered),
            DrainOutcome::Completed
        );
        assert!(state.is_idle());
    }

    #[test]
    fn test_drain_step_noop_when_idle() {
        let mut state = ReloadState::Idle;
        assert_eq!(
            state.drain_step(|_| TermResult::Delivered),
            DrainOutcome::NotDraining
        );
    }
}
