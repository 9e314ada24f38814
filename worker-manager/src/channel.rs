//! Process-shared restart-request channel
//!
//! A bounded ring of fixed-size messages living in anonymous shared memory,
//! so it survives `fork()` and is visible to every worker. Producers are
//! workers asking for a peer (or themselves) to be respawned; the only
//! consumer is the manager, which drains the ring after a SIGIO wakes its
//! loop. A spinlock word in the same mapping serialises access across
//! processes.

use std::hint::spin_loop;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use unsafe_linux_process::{
    safe_get_parent_pid, safe_map_shared, safe_send_signal, unmap_shared, UnsafeLinuxError, SIGIO,
};

use crate::error::ChannelError;

/// Fixed-size restart request: the logical id of the worker to respawn
///
/// Ids below `worker_num` denote event workers; ids at or above it denote
/// task workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartMessage {
    pub worker_id: u32,
}

const HEADER_WORDS: usize = 4;
const WORD: usize = std::mem::size_of::<u32>();

const LOCK: usize = 0;
const HEAD: usize = 1;
const TAIL: usize = 2;
const CAPACITY: usize = 3;

struct SharedRing {
    ptr: *mut u8,
    len: usize,
    capacity: u32,
}

// The ring is a raw shared mapping; all access goes through the atomics
// below under the in-shm spinlock.
unsafe impl Send for SharedRing {}
unsafe impl Sync for SharedRing {}

impl SharedRing {
    fn word(&self, index: usize) -> &AtomicU32 {
        unsafe { &*self.ptr.cast::<AtomicU32>().add(index) }
    }

    fn slot(&self, position: u32) -> &AtomicU32 {
        self.word(HEADER_WORDS + (position % self.capacity) as usize)
    }

    fn acquire(&self) {
        while self
            .word(LOCK)
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
    }

    fn release(&self) {
        self.word(LOCK).store(0, Ordering::Release);
    }
}

impl Drop for SharedRing {
    fn drop(&mut self) {
        // Unmaps this process's view only; other processes keep theirs.
        let _ = unsafe { unmap_shared(self.ptr, self.len) };
    }
}

/// Handle to the restart-request channel
///
/// Clones share the same mapping; a clone captured into a worker entrypoint
/// before the fork addresses the identical ring from inside the child.
#[derive(Clone)]
pub struct RestartChannel {
    ring: Arc<SharedRing>,
}

impl RestartChannel {
    /// Map a new channel with room for `capacity` messages.
    pub(crate) fn create(capacity: u32) -> Result<Self, UnsafeLinuxError> {
        let len = (HEADER_WORDS + capacity as usize) * WORD;
        let ptr = safe_map_shared(len)?;
        let ring = SharedRing { ptr, len, capacity };
        // The mapping starts zeroed: lock open, head == tail.
        ring.word(CAPACITY).store(capacity, Ordering::SeqCst);
        Ok(Self {
            ring: Arc::new(ring),
        })
    }

    /// Append a message, failing when the ring is full.
    pub fn push(&self, message: RestartMessage) -> Result<(), ChannelError> {
        let ring = &self.ring;
        ring.acquire();
        let head = ring.word(HEAD).load(Ordering::SeqCst);
        let tail = ring.word(TAIL).load(Ordering::SeqCst);
        if tail.wrapping_sub(head) >= ring.capacity {
            ring.release();
            return Err(ChannelError::Full);
        }
        ring.slot(tail).store(message.worker_id, Ordering::SeqCst);
        ring.word(TAIL).store(tail.wrapping_add(1), Ordering::SeqCst);
        ring.release();
        Ok(())
    }

    /// Pop the oldest message, if any.
    pub fn pop(&self) -> Option<RestartMessage> {
        let ring = &self.ring;
        ring.acquire();
        let head = ring.word(HEAD).load(Ordering::SeqCst);
        let tail = ring.word(TAIL).load(Ordering::SeqCst);
        if head == tail {
            ring.release();
            return None;
        }
        let worker_id = ring.slot(head).load(Ordering::SeqCst);
        ring.word(HEAD).store(head.wrapping_add(1), Ordering::SeqCst);
        ring.release();
        Some(RestartMessage { worker_id })
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        let ring = &self.ring;
        ring.acquire();
        let head = ring.word(HEAD).load(Ordering::SeqCst);
        let tail = ring.word(TAIL).load(Ordering::SeqCst);
        ring.release();
        tail.wrapping_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ask the manager to respawn the worker with logical id `worker_id`.
    ///
    /// Called from inside a worker: queues the message and raises SIGIO on
    /// the parent so its blocking `wait()` wakes up.
    pub fn request_restart(&self, worker_id: u32) -> Result<(), ChannelError> {
        self.push(RestartMessage { worker_id })?;
        safe_send_signal(safe_get_parent_pid(), SIGIO).map_err(|e| ChannelError::NotifyFailed {
            details: e.to_string(),
        })
    }
}
