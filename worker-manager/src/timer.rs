//! Alarm-driven timer facility for the supervisor loop
//!
//! Deadlines are tracked in process-local time; the manager arms the OS
//! interval timer for the nearest one and handles the due entries after the
//! resulting SIGALRM wakes its blocking `wait()`. Entries own the data they
//! carry, so an un-fired timeout-kill token is released when the timer is
//! cleared or dropped.

use std::time::{Duration, Instant};

use crate::reload::ReloadTarget;

/// Work carried by a timer entry, executed by the manager when due
#[derive(Debug, Clone)]
pub(crate) enum TimerEvent {
    /// Periodic operator tick
    ManagerTick,
    /// Force-kill every snapshot target still alive after the graceful window
    KillTimeout(Vec<ReloadTarget>),
}

#[derive(Debug)]
struct TimerEntry {
    fire_at: Instant,
    interval: Option<Duration>,
    event: TimerEvent,
}

/// Deadline queue feeding the manager's SIGALRM handling
#[derive(Debug, Default)]
pub(crate) struct Timer {
    entries: Vec<TimerEntry>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `event` to fire once, `after` from `now`.
    pub fn schedule_once(&mut self, now: Instant, after: Duration, event: TimerEvent) {
        self.entries.push(TimerEntry {
            fire_at: now + after,
            interval: None,
            event,
        });
    }

    /// Schedule `event` to fire every `every`, starting `every` from `now`.
    pub fn schedule_interval(&mut self, now: Instant, every: Duration, event: TimerEvent) {
        self.entries.push(TimerEntry {
            fire_at: now + every,
            interval: Some(every),
            event,
        });
    }

    /// Pop every entry due at `now`, re-arming recurring ones.
    ///
    /// Due events are returned in deadline order.
    pub fn poll_due(&mut self, now: Instant) -> Vec<TimerEvent> {
        let mut due: Vec<(Instant, TimerEvent)> = Vec::new();
        let mut index = 0;
        while index < self.entries.len() {
            if self.entries[index].fire_at > now {
                index += 1;
                continue;
            }
            match self.entries[index].interval {
                Some(every) => {
                    let entry = &mut self.entries[index];
                    due.push((entry.fire_at, entry.event.clone()));
                    while entry.fire_at <= now {
                        entry.fire_at += every;
                    }
                    index += 1;
                }
                None => {
                    let entry = self.entries.swap_remove(index);
                    due.push((entry.fire_at, entry.event));
                }
            }
        }
        due.sort_by_key(|(fire_at, _)| *fire_at);
        due.into_iter().map(|(_, event)| event).collect()
    }

    /// Delay until the nearest deadline, or `None` when nothing is scheduled.
    pub fn next_delay(&self, now: Instant) -> Option<Duration> {
        self.entries
            .iter()
            .map(|entry| entry.fire_at)
            .min()
            .map(|fire_at| fire_at.saturating_duration_since(now))
    }

    /// Drop every entry, releasing any owned tokens.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
