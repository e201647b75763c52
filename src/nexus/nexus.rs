//! Nexus: a named, typed communication point owned by one thread

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;

use super::event::QueueEvent;
use super::queue::{QueueParams, SequencedQueue};
use super::readers::ReaderSet;
use super::schema::{Direction, FanoutMode, NexusDef, RowType, TableType};
use super::stats::NexusStats;
use super::tray::{Delivery, TrayId, Xtray};
use super::writer::FanoutWriter;

/// A nexus keeps the reader queues of one data direction and the exported
/// schema. The schema is fixed at creation and read without locking; only
/// reader membership changes are serialized.
#[derive(Debug)]
pub struct Nexus {
    app: String,
    tname: String,
    def: NexusDef,
    full_name: String,
    queue_limit: usize,
    queue_timeout: Duration,
    /// Last stamped tray id
    tray_id: Arc<AtomicU32>,
    readers: Arc<ArcSwap<ReaderSet>>,
    /// Serializes attach and detach of readers
    membership: Mutex<()>,
    stats: Arc<NexusStats>,
}

impl Nexus {
    /// Create a nexus from its first definition. `queue_limit` applies when
    /// the definition carries none.
    pub fn new(
        app: impl Into<String>,
        tname: impl Into<String>,
        def: NexusDef,
        queue_limit: usize,
        queue_timeout: Duration,
    ) -> Self {
        let tname = tname.into();
        let full_name = format!("{}/{}", tname, def.name);
        let queue_limit = def.queue_limit.unwrap_or(queue_limit).max(1);
        Self {
            app: app.into(),
            tname,
            def,
            full_name,
            queue_limit,
            queue_timeout,
            tray_id: Arc::new(AtomicU32::new(0)),
            readers: Arc::new(ArcSwap::from_pointee(ReaderSet::default())),
            membership: Mutex::new(()),
            stats: Arc::new(NexusStats::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Name of the owning thread
    pub fn triead_name(&self) -> &str {
        &self.tname
    }

    /// `thread/nexus`
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn def(&self) -> &NexusDef {
        &self.def
    }

    pub fn direction(&self) -> Direction {
        self.def.direction
    }

    pub fn is_reverse(&self) -> bool {
        self.def.direction == Direction::Reverse
    }

    pub fn is_unicast(&self) -> bool {
        self.def.fanout == FanoutMode::Unicast
    }

    pub fn labels(&self) -> &[(String, RowType)] {
        &self.def.labels
    }

    pub fn row_types(&self) -> &BTreeMap<String, RowType> {
        &self.def.row_types
    }

    pub fn table_types(&self) -> &BTreeMap<String, TableType> {
        &self.def.table_types
    }

    pub fn queue_limit(&self) -> usize {
        self.queue_limit
    }

    pub fn stats(&self) -> &Arc<NexusStats> {
        &self.stats
    }

    /// Generation of the current reader set
    pub fn generation(&self) -> u64 {
        self.readers.load().generation()
    }

    pub fn reader_count(&self) -> usize {
        self.readers.load().len()
    }

    /// Attach a writer for thread `tname`
    pub fn attach_writer(&self, tname: &str) -> FanoutWriter {
        log::debug!("nexus '{}': writer '{}' attached", self.full_name, tname);
        FanoutWriter::new(
            self.app.clone(),
            tname.to_string(),
            self.full_name.clone(),
            self.def.fanout,
            self.readers.clone(),
            self.tray_id.clone(),
            self.stats.clone(),
            self.queue_timeout,
        )
    }

    /// Attach a reader for thread `tname`, signalling into the thread's event.
    ///
    /// The new reader sees every tray stamped after it joined the set.
    pub fn attach_reader(self: &Arc<Self>, tname: &str, event: &Arc<QueueEvent>) -> NexusReader {
        let _guard = self.membership.lock().unwrap_or_else(|e| e.into_inner());
        let old = self.readers.load_full();
        let gen = old.generation() + 1;
        let params = QueueParams {
            app: self.app.clone(),
            nexus: self.full_name.clone(),
            reader: tname.to_string(),
            limit: self.queue_limit,
            timeout: self.queue_timeout,
        };

        // The old first queue stamps ids until its generation moves on; the
        // last id it stamped is where the new reader's window starts.
        let prev_id = match old.first() {
            Some(first) => first.advance_generation(gen, &self.tray_id),
            None => self.tray_id.load(std::sync::atomic::Ordering::Acquire),
        };
        for queue in old.queues().iter().skip(1) {
            queue.set_generation(gen);
        }
        let queue = Arc::new(SequencedQueue::new(params, event.clone(), gen, prev_id));
        self.readers.store(Arc::new(old.with_added(queue.clone(), gen)));
        self.stats.add_reader();
        log::debug!(
            "nexus '{}': reader '{}' attached, generation {}",
            self.full_name,
            tname,
            gen
        );

        NexusReader {
            queue,
            buf: VecDeque::new(),
            buf_prev: 0,
            nexus: Arc::downgrade(self),
            detached: false,
        }
    }

    /// Remove a reader queue from the set and mark it dead
    fn detach_queue(&self, queue: &Arc<SequencedQueue>) {
        let _guard = self.membership.lock().unwrap_or_else(|e| e.into_inner());
        let old = self.readers.load_full();
        if !old.contains(queue) {
            queue.mark_dead();
            return;
        }
        let gen = old.generation() + 1;
        let new = old.without(queue, gen);
        // Publish first: a writer failing on the retired queue must find
        // the replacement set already in place.
        for q in new.queues() {
            q.set_generation(gen);
        }
        self.readers.store(Arc::new(new));
        queue.mark_dead();
        self.stats.remove_reader();
        log::debug!(
            "nexus '{}': reader '{}' detached, generation {}",
            self.full_name,
            queue.params().reader,
            gen
        );
    }
}

/// Reader handle held by one consumer thread.
///
/// Trays are taken from the queue a batch at a time and then handed out
/// without locking. Dropping the reader detaches it from the nexus.
#[derive(Debug)]
pub struct NexusReader {
    queue: Arc<SequencedQueue>,
    buf: VecDeque<Option<Xtray>>,
    /// Id preceding the front of `buf`
    buf_prev: TrayId,
    nexus: Weak<Nexus>,
    detached: bool,
}

impl NexusReader {
    /// Slot of this reader in the thread's queue event
    pub fn slot(&self) -> usize {
        self.queue.slot()
    }

    /// Full name of the nexus read from
    pub fn nexus_name(&self) -> &str {
        &self.queue.params().nexus
    }

    pub fn is_detached(&self) -> bool {
        self.detached || self.queue.is_dead()
    }

    /// Take the next tray if one is available
    pub fn read(&mut self) -> Option<Delivery> {
        if self.buf.is_empty() {
            self.buf_prev = self.queue.refill(&mut self.buf)?;
        }
        let tray = self.buf.pop_front()??;
        self.buf_prev = self.buf_prev.wrapping_add(1);
        if self.buf.is_empty() {
            self.queue.settle();
        }
        Some(Delivery {
            id: self.buf_prev,
            tray,
        })
    }

    /// Take the next tray, waiting up to `timeout` for one to arrive
    pub fn read_timeout(&mut self, timeout: Duration) -> Option<Delivery> {
        if let Some(d) = self.read() {
            return Some(d);
        }
        if self.queue.wait_readable(timeout) {
            self.read()
        } else {
            None
        }
    }

    /// Take everything currently readable
    pub fn drain(&mut self) -> Vec<Delivery> {
        let mut out = Vec::new();
        while let Some(d) = self.read() {
            out.push(d);
        }
        out
    }

    /// Disconnect from the nexus; writers stop delivering to this reader
    pub fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        self.buf.clear();
        match self.nexus.upgrade() {
            Some(nexus) => nexus.detach_queue(&self.queue),
            None => self.queue.mark_dead(),
        }
    }
}

impl Drop for NexusReader {
    fn drop(&mut self) {
        self.detach();
    }
}
