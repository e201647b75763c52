//! Per-reader sequenced queue
//!
//! Each reader of a nexus owns one queue. Writers insert trays into the
//! write-side buffer at the position given by the tray's sequence number, so
//! trays sent by different writers land in the same global order in every
//! reader's queue. The reader takes the whole readable prefix of the
//! write-side buffer at once (swapping buffers when it can) and then drains
//! its own side without holding the lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::event::QueueEvent;
use super::tray::{TrayId, Xtray};
use crate::error::{Result, TriesteError};

/// Distance beyond which a tray id is considered to precede the window
/// rather than be far ahead of it.
const MAX_WINDOW: u32 = u32::MAX / 2;

/// Fixed parameters of a queue
#[derive(Debug, Clone)]
pub struct QueueParams {
    /// App name, for error messages
    pub app: String,
    /// Full name of the nexus, for error messages
    pub nexus: String,
    /// Name of the reading thread
    pub reader: String,
    /// High-water mark of the write-side buffer
    pub limit: usize,
    /// Bound of one blocking wait
    pub timeout: Duration,
}

#[derive(Debug)]
struct QueueState {
    /// Write-side buffer; `None` marks a tray not delivered yet
    write: VecDeque<Option<Xtray>>,
    /// Id of the tray preceding `write[0]`
    prev_id: TrayId,
    /// Generation of the reader set this queue belongs to
    gen: u64,
    /// Disconnected from the nexus
    dead: bool,
}

impl QueueState {
    fn front_ready(&self) -> bool {
        matches!(self.write.front(), Some(Some(_)))
    }

    /// Position of a tray id in the write buffer, `None` if it precedes it
    fn index_of(&self, id: TrayId) -> Option<usize> {
        let dist = id.wrapping_sub(self.prev_id);
        if dist == 0 || dist > MAX_WINDOW {
            None
        } else {
            Some((dist - 1) as usize)
        }
    }
}

/// The queue of one reader
#[derive(Debug)]
pub struct SequencedQueue {
    params: QueueParams,
    event: Arc<QueueEvent>,
    slot: usize,
    state: Mutex<QueueState>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl SequencedQueue {
    /// Create a queue signalling into `event`
    pub fn new(params: QueueParams, event: Arc<QueueEvent>, gen: u64, prev_id: TrayId) -> Self {
        let slot = event.add_slot();
        Self {
            params,
            event,
            slot,
            state: Mutex::new(QueueState {
                write: VecDeque::new(),
                prev_id,
                gen,
                dead: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn params(&self) -> &QueueParams {
        &self.params
    }

    /// Slot of this queue in the reader's event
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn generation(&self) -> u64 {
        self.lock().gen
    }

    pub fn set_generation(&self, gen: u64) {
        self.lock().gen = gen;
    }

    /// Move this queue to a new generation and report the last tray id
    /// stamped so far. Used when a reader attaches: with the first queue's
    /// lock held no new id can be stamped, so the new reader's window starts
    /// exactly after the returned id.
    pub fn advance_generation(&self, gen: u64, seq: &AtomicU32) -> TrayId {
        let mut state = self.lock();
        state.gen = gen;
        seq.load(Ordering::Acquire)
    }

    pub fn is_dead(&self) -> bool {
        self.lock().dead
    }

    /// Number of slots (filled or not) in the write-side buffer
    pub fn pending(&self) -> usize {
        self.lock().write.len()
    }

    /// Disconnect from the nexus. Pending data is discarded and writers
    /// blocked on this queue return.
    pub fn mark_dead(&self) {
        let mut state = self.lock();
        state.dead = true;
        state.write.clear();
        self.event.clear_ready(self.slot);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Block while `full` holds, bounded by the queue timeout.
    fn wait_space<'a, F>(
        &'a self,
        mut state: MutexGuard<'a, QueueState>,
        caller: &str,
        full: F,
    ) -> Result<MutexGuard<'a, QueueState>>
    where
        F: Fn(&QueueState) -> bool,
    {
        let deadline = Instant::now() + self.params.timeout;
        while !state.dead && full(&state) {
            let now = Instant::now();
            if now >= deadline {
                return Err(TriesteError::timeout(
                    self.params.app.clone(),
                    caller,
                    format!(
                        "space in the queue of thread '{}' on nexus '{}'",
                        self.params.reader, self.params.nexus
                    ),
                ));
            }
            state = self
                .not_full
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        Ok(state)
    }

    fn store(&self, state: &mut QueueState, idx: usize, tray: &Xtray) {
        while state.write.len() <= idx {
            state.write.push_back(None);
        }
        state.write[idx] = Some(tray.clone());
        if idx == 0 {
            self.event.set_ready(self.slot);
            self.not_empty.notify_all();
        }
    }

    /// Write to the first queue of a reader set, stamping the tray with the
    /// next sequence number of the nexus.
    ///
    /// Returns `Ok(None)` without writing if the writer's generation is stale
    /// or the queue is dead; the writer must then pick up the newer set.
    pub fn write_first(
        &self,
        gen: u64,
        tray: &Xtray,
        seq: &AtomicU32,
        caller: &str,
    ) -> Result<Option<TrayId>> {
        let state = self.lock();
        if state.dead || state.gen != gen {
            return Ok(None);
        }
        let limit = self.params.limit;
        let mut state = self.wait_space(state, caller, |s| s.write.len() >= limit)?;
        if state.dead || state.gen != gen {
            return Ok(None);
        }
        let id = seq.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        match state.index_of(id) {
            Some(idx) => self.store(&mut state, idx, tray),
            None => log::warn!(
                "nexus '{}': tray {} precedes the window of reader '{}'",
                self.params.nexus,
                id,
                self.params.reader
            ),
        }
        Ok(Some(id))
    }

    /// Write an already stamped tray. Does nothing if the queue is dead.
    ///
    /// A tray filling a gap in front of the high-water mark never blocks, so
    /// a late writer can always complete the prefix the reader waits for.
    pub fn write(&self, tray: &Xtray, id: TrayId, caller: &str) -> Result<()> {
        let state = self.lock();
        if state.dead {
            return Ok(());
        }
        let limit = self.params.limit;
        let mut state = self.wait_space(state, caller, |s| match s.index_of(id) {
            Some(idx) => idx >= limit,
            None => false,
        })?;
        if state.dead {
            return Ok(());
        }
        if let Some(idx) = state.index_of(id) {
            self.store(&mut state, idx, tray);
        }
        Ok(())
    }

    /// Store an already stamped tray past the high-water mark.
    ///
    /// Used to complete a broadcast whose id is already taken after a
    /// reader's queue stayed full for too long; leaving the slot empty
    /// would stall that reader for good.
    pub fn force_write(&self, tray: &Xtray, id: TrayId) {
        let mut state = self.lock();
        if state.dead {
            return;
        }
        if let Some(idx) = state.index_of(id) {
            self.store(&mut state, idx, tray);
        }
    }

    /// Append to a unicast queue with a queue-local sequence number.
    ///
    /// Same staleness rules as [`write_first`](Self::write_first).
    pub fn append(&self, gen: u64, tray: &Xtray, caller: &str) -> Result<Option<TrayId>> {
        let state = self.lock();
        if state.dead || state.gen != gen {
            return Ok(None);
        }
        let limit = self.params.limit;
        let mut state = self.wait_space(state, caller, |s| s.write.len() >= limit)?;
        if state.dead || state.gen != gen {
            return Ok(None);
        }
        let idx = state.write.len();
        let id = state.prev_id.wrapping_add(idx as u32 + 1);
        self.store(&mut state, idx, tray);
        Ok(Some(id))
    }

    /// Move the readable prefix of the write-side buffer into the reader's
    /// buffer, which must be empty. Returns the id preceding the moved trays,
    /// or `None` if there was nothing to read, in which case the reader's
    /// slot is lowered.
    pub fn refill(&self, buf: &mut VecDeque<Option<Xtray>>) -> Option<TrayId> {
        let mut state = self.lock();
        if state.dead {
            return None;
        }
        let ready = state.write.iter().take_while(|t| t.is_some()).count();
        if ready == 0 {
            self.event.clear_ready(self.slot);
            return None;
        }
        let prev = state.prev_id;
        if ready == state.write.len() {
            std::mem::swap(&mut state.write, buf);
        } else {
            buf.extend(state.write.drain(..ready));
        }
        state.prev_id = prev.wrapping_add(ready as u32);
        self.not_full.notify_all();
        Some(prev)
    }

    /// Lower the reader's slot unless more trays are readable. The reader
    /// calls this once its own buffer runs empty; until then the slot stays
    /// raised for the trays it still holds.
    pub fn settle(&self) {
        let state = self.lock();
        if !state.dead && !state.front_ready() {
            self.event.clear_ready(self.slot);
        }
    }

    /// Wait until the front of the write-side buffer is readable.
    /// Returns false on timeout or if the queue is dead.
    pub fn wait_readable(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !state.dead && !state.front_ready() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .not_empty
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        !state.dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nexus::tray::Tray;
    use std::thread;

    fn queue(limit: usize) -> (Arc<QueueEvent>, Arc<SequencedQueue>) {
        let event = Arc::new(QueueEvent::new().unwrap());
        let params = QueueParams {
            app: "app".to_string(),
            nexus: "t1/nx".to_string(),
            reader: "t2".to_string(),
            limit,
            timeout: Duration::from_millis(50),
        };
        let q = Arc::new(SequencedQueue::new(params, event.clone(), 1, 0));
        (event, q)
    }

    fn tray(s: &str) -> Xtray {
        Tray::from(s).into_shared()
    }

    fn drain(q: &SequencedQueue) -> Vec<(TrayId, Vec<u8>)> {
        let mut buf = VecDeque::new();
        let mut out = Vec::new();
        while let Some(prev) = q.refill(&mut buf) {
            for (i, t) in buf.drain(..).enumerate() {
                let t = t.unwrap();
                out.push((prev.wrapping_add(i as u32 + 1), t.payload().to_vec()));
            }
        }
        out
    }

    #[test]
    fn test_write_first_stamps_in_order() {
        let (event, q) = queue(10);
        let seq = AtomicU32::new(0);
        assert_eq!(q.write_first(1, &tray("a"), &seq, "w").unwrap(), Some(1));
        assert_eq!(q.write_first(1, &tray("b"), &seq, "w").unwrap(), Some(2));
        assert_eq!(event.ready_slots(), vec![q.slot()]);

        let got = drain(&q);
        assert_eq!(got, vec![(1, b"a".to_vec()), (2, b"b".to_vec())]);
        assert!(event.ready_slots().is_empty());
    }

    #[test]
    fn test_refill_leaves_slot_raised_until_settled() {
        let (event, q) = queue(10);
        let seq = AtomicU32::new(0);
        q.write_first(1, &tray("a"), &seq, "w").unwrap();
        q.write_first(1, &tray("b"), &seq, "w").unwrap();

        let mut buf = VecDeque::new();
        assert_eq!(q.refill(&mut buf), Some(0));
        assert_eq!(buf.len(), 2);
        assert_eq!(event.ready_slots(), vec![q.slot()]);

        // arrived while the batch was being consumed
        q.write_first(1, &tray("c"), &seq, "w").unwrap();
        buf.clear();
        q.settle();
        assert_eq!(event.ready_slots(), vec![q.slot()]);

        assert_eq!(q.refill(&mut buf), Some(2));
        buf.clear();
        q.settle();
        assert!(event.ready_slots().is_empty());
    }

    #[test]
    fn test_force_write_ignores_limit() {
        let (event, q) = queue(1);
        q.write(&tray("a"), 1, "w").unwrap();
        let start = Instant::now();
        q.force_write(&tray("b"), 2);
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(q.pending(), 2);
        let ids: Vec<_> = drain(&q).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(event.ready_slots().is_empty());

        q.mark_dead();
        q.force_write(&tray("c"), 3);
        assert_eq!(q.pending(), 0);
    }

    #[test]
    fn test_stale_generation_fails() {
        let (_event, q) = queue(10);
        let seq = AtomicU32::new(0);
        assert_eq!(q.write_first(0, &tray("a"), &seq, "w").unwrap(), None);
        assert_eq!(seq.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_out_of_order_insert_waits_for_gap() {
        let (event, q) = queue(10);
        q.write(&tray("c"), 3, "w").unwrap();
        q.write(&tray("b"), 2, "w").unwrap();
        assert!(event.ready_slots().is_empty());
        assert!(drain(&q).is_empty());

        q.write(&tray("a"), 1, "w").unwrap();
        let ids: Vec<_> = drain(&q).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_partial_prefix_refill() {
        let (_event, q) = queue(10);
        q.write(&tray("a"), 1, "w").unwrap();
        q.write(&tray("c"), 3, "w").unwrap();
        assert_eq!(drain(&q).len(), 1);
        q.write(&tray("b"), 2, "w").unwrap();
        let ids: Vec<_> = drain(&q).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_wraparound_ids() {
        let event = Arc::new(QueueEvent::new().unwrap());
        let params = QueueParams {
            app: "app".to_string(),
            nexus: "t1/nx".to_string(),
            reader: "t2".to_string(),
            limit: 10,
            timeout: Duration::from_millis(50),
        };
        let q = SequencedQueue::new(params, event, 1, u32::MAX - 1);
        let seq = AtomicU32::new(u32::MAX - 1);
        let ids: Vec<_> = (0..3)
            .map(|_| q.write_first(1, &tray("x"), &seq, "w").unwrap().unwrap())
            .collect();
        assert_eq!(ids, vec![u32::MAX, 0, 1]);
        let got: Vec<_> = drain(&q).into_iter().map(|(id, _)| id).collect();
        assert_eq!(got, vec![u32::MAX, 0, 1]);
    }

    #[test]
    fn test_full_queue_times_out() {
        let (_event, q) = queue(2);
        let seq = AtomicU32::new(0);
        q.write_first(1, &tray("a"), &seq, "w").unwrap();
        q.write_first(1, &tray("b"), &seq, "w").unwrap();
        let err = q.write_first(1, &tray("c"), &seq, "w").unwrap_err();
        assert!(matches!(err, TriesteError::Timeout { .. }));
    }

    #[test]
    fn test_full_queue_unblocks_on_drain() {
        let (_event, q) = queue(1);
        let seq = Arc::new(AtomicU32::new(0));
        q.write_first(1, &tray("a"), &seq, "w").unwrap();

        let reader = q.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            let mut buf = VecDeque::new();
            reader.refill(&mut buf);
            buf.len()
        });
        // blocks until the reader takes "a"
        let writer_q = q.clone();
        let writer_seq = seq.clone();
        let w = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                match writer_q.write_first(1, &tray("b"), &writer_seq, "w") {
                    Ok(id) => return id,
                    Err(_) if Instant::now() < deadline => continue,
                    Err(e) => panic!("{}", e),
                }
            }
        });
        assert_eq!(handle.join().unwrap(), 1);
        assert_eq!(w.join().unwrap(), Some(2));
    }

    #[test]
    fn test_dead_queue_never_blocks() {
        let (_event, q) = queue(1);
        q.write(&tray("a"), 1, "w").unwrap();
        q.mark_dead();
        let start = Instant::now();
        q.write(&tray("b"), 2, "w").unwrap();
        q.write(&tray("c"), 3, "w").unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(q.pending(), 0);
        assert!(!q.wait_readable(Duration::from_millis(1)));
    }

    #[test]
    fn test_append_local_ids() {
        let (_event, q) = queue(4);
        assert_eq!(q.append(1, &tray("a"), "w").unwrap(), Some(1));
        assert_eq!(q.append(1, &tray("b"), "w").unwrap(), Some(2));
        assert_eq!(q.append(2, &tray("c"), "w").unwrap(), None);
        assert_eq!(drain(&q).len(), 2);
    }
}
