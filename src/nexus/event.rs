//! Readiness event shared by all the reader queues of one thread
//!
//! Each queue feeding a thread owns one slot in the event. A queue raises its
//! slot when it goes from empty to non-empty and lowers it once the reader has
//! drained it, so the thread can block on "anything ready" instead of polling
//! every queue. On Linux the event also drives an eventfd, for callers that
//! integrate with an external poll loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[cfg(target_os = "linux")]
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

#[cfg(target_os = "linux")]
use nix::{
    errno::Errno,
    sys::eventfd::{eventfd, EfdFlags},
    unistd::{read, write},
};

use crate::error::{Result, TriesteError};

#[derive(Debug, Default)]
struct EventState {
    /// Which queue slots have data
    ready: Vec<bool>,
    /// Number of raised slots
    pending: usize,
    /// Wakeups requested without data, consumed by the next wait
    kicked: bool,
}

/// Aggregated "has data" indication for the queues of one thread
#[derive(Debug)]
pub struct QueueEvent {
    state: Mutex<EventState>,
    cond: Condvar,
    #[cfg(target_os = "linux")]
    event_fd: OwnedFd,
    notify_count: AtomicU64,
    wait_count: AtomicU64,
}

impl QueueEvent {
    /// Create a new event with no slots
    pub fn new() -> Result<Self> {
        Ok(Self {
            state: Mutex::new(EventState::default()),
            cond: Condvar::new(),
            #[cfg(target_os = "linux")]
            event_fd: eventfd(0, EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)
                .map_err(|e| TriesteError::notification(format!("eventfd: {}", e)))?,
            notify_count: AtomicU64::new(0),
            wait_count: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, EventState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate a slot for a new queue
    pub fn add_slot(&self) -> usize {
        let mut state = self.lock();
        state.ready.push(false);
        state.ready.len() - 1
    }

    /// Raise the slot of a queue that became non-empty
    pub fn set_ready(&self, slot: usize) {
        let mut state = self.lock();
        if slot >= state.ready.len() || state.ready[slot] {
            return;
        }
        state.ready[slot] = true;
        state.pending += 1;
        if state.pending == 1 {
            self.signal_fd();
        }
        self.notify_count.fetch_add(1, Ordering::Relaxed);
        self.cond.notify_all();
    }

    /// Lower the slot of a queue that has been drained
    pub fn clear_ready(&self, slot: usize) {
        let mut state = self.lock();
        if slot >= state.ready.len() || !state.ready[slot] {
            return;
        }
        state.ready[slot] = false;
        state.pending -= 1;
        if state.pending == 0 && !state.kicked {
            self.drain_fd();
        }
    }

    /// Wake the waiter even though no queue has data, e.g. on shutdown
    pub fn kick(&self) {
        let mut state = self.lock();
        state.kicked = true;
        self.signal_fd();
        self.cond.notify_all();
    }

    /// Slots currently raised
    pub fn ready_slots(&self) -> Vec<usize> {
        Self::collect(&self.lock())
    }

    fn collect(state: &EventState) -> Vec<usize> {
        state
            .ready
            .iter()
            .enumerate()
            .filter_map(|(i, &r)| r.then_some(i))
            .collect()
    }

    /// Block until some slot is raised, a kick arrives, or the timeout expires.
    ///
    /// Returns the raised slots, empty on timeout or on a bare kick.
    pub fn wait_any(&self, timeout: Option<Duration>) -> Vec<usize> {
        self.wait_count.fetch_add(1, Ordering::Relaxed);
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        while state.pending == 0 && !state.kicked {
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    self.cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
                None => self.cond.wait(state).unwrap_or_else(|e| e.into_inner()),
            };
        }
        if state.kicked {
            state.kicked = false;
            if state.pending == 0 {
                self.drain_fd();
            }
        }
        Self::collect(&state)
    }

    /// Get the file descriptor for external polling
    #[cfg(target_os = "linux")]
    pub fn event_fd(&self) -> RawFd {
        self.event_fd.as_raw_fd()
    }

    #[cfg(target_os = "linux")]
    fn signal_fd(&self) {
        let buf = 1u64.to_ne_bytes();
        match write(self.event_fd.as_raw_fd(), &buf) {
            Ok(_) | Err(Errno::EAGAIN) => {}
            Err(e) => log::warn!("queue event: eventfd write failed: {}", e),
        }
    }

    #[cfg(target_os = "linux")]
    fn drain_fd(&self) {
        let mut buf = [0u8; 8];
        // EAGAIN just means it was already clear
        let _ = read(self.event_fd.as_raw_fd(), &mut buf);
    }

    #[cfg(not(target_os = "linux"))]
    fn signal_fd(&self) {}

    #[cfg(not(target_os = "linux"))]
    fn drain_fd(&self) {}

    /// Get notification statistics
    pub fn stats(&self) -> EventStats {
        EventStats {
            notify_count: self.notify_count.load(Ordering::Relaxed),
            wait_count: self.wait_count.load(Ordering::Relaxed),
            slots: self.lock().ready.len(),
        }
    }
}

/// Statistics for a queue event
#[derive(Debug, Clone)]
pub struct EventStats {
    /// Number of empty-to-ready transitions signalled
    pub notify_count: u64,
    /// Number of waits performed
    pub wait_count: u64,
    /// Number of queue slots allocated
    pub slots: usize,
}
