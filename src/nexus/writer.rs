//! Writer side of a nexus
//!
//! Each writer sends its trays directly into the readers' queues instead of
//! competing for one shared queue. The sequence number is stamped while
//! writing into the first queue of the reader set, and the other queues
//! place the tray by that number, so all readers agree on one order.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use arc_swap::{ArcSwap, Guard};

use super::readers::ReaderSet;
use super::schema::FanoutMode;
use super::stats::NexusStats;
use super::tray::{TrayId, Xtray};
use crate::error::{Result, TriesteError};

/// Writer handle held by one producer thread
#[derive(Debug)]
pub struct FanoutWriter {
    app: String,
    thread: String,
    nexus: String,
    fanout: FanoutMode,
    /// Reader set this writer currently sends to
    readers: Arc<ReaderSet>,
    /// Where the nexus publishes new reader sets
    published: Arc<ArcSwap<ReaderSet>>,
    seq: Arc<AtomicU32>,
    stats: Arc<NexusStats>,
    /// Bound on waiting for a reader set update to be published
    timeout: Duration,
    /// Next target of unicast writes without an explicit key
    next_target: usize,
}

impl FanoutWriter {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        app: String,
        thread: String,
        nexus: String,
        fanout: FanoutMode,
        published: Arc<ArcSwap<ReaderSet>>,
        seq: Arc<AtomicU32>,
        stats: Arc<NexusStats>,
        timeout: Duration,
    ) -> Self {
        stats.add_writer();
        Self {
            app,
            thread,
            nexus,
            fanout,
            readers: published.load_full(),
            published,
            seq,
            stats,
            timeout,
            next_target: 0,
        }
    }

    /// Full name of the nexus written to
    pub fn nexus_name(&self) -> &str {
        &self.nexus
    }

    /// Generation of the reader set in use
    pub fn generation(&self) -> u64 {
        self.readers.generation()
    }

    /// Pick up a newer reader set if one was published
    fn refresh(&mut self) {
        let current = self.published.load();
        if current.generation() != self.readers.generation() {
            self.readers = Guard::into_inner(current);
        }
    }

    /// A write found its reader set out of step with the queues: either a
    /// newer set is published, or the current one is still being installed
    /// into the queues. Membership changes complete promptly, so this spins
    /// briefly, bounded by the writer timeout.
    fn retry_stale(&mut self, deadline: &mut Option<Instant>) -> Result<()> {
        let deadline = *deadline.get_or_insert_with(|| Instant::now() + self.timeout);
        if Instant::now() >= deadline {
            return Err(TriesteError::timeout(
                self.app.clone(),
                self.thread.clone(),
                format!("reader set update of nexus '{}'", self.nexus),
            ));
        }
        thread::yield_now();
        Ok(())
    }

    /// Write a tray to the readers. Broadcast nexuses deliver it to every
    /// reader; unicast ones to one reader chosen round-robin.
    ///
    /// Returns the id the tray was stamped with, or `None` if no reader
    /// was attached and the tray was dropped.
    ///
    /// A `Timeout` from any queue but the first of a broadcast comes after
    /// the tray was stamped: it has still been delivered to every reader,
    /// overflowing the slow ones, and must not be written again.
    pub fn write(&mut self, tray: Xtray) -> Result<Option<TrayId>> {
        match self.fanout {
            FanoutMode::Broadcast => self.broadcast(tray),
            FanoutMode::Unicast => {
                let key = self.next_target;
                self.next_target = self.next_target.wrapping_add(1);
                self.write_to(tray, key)
            }
        }
    }

    /// Write a tray to the single reader selected by `key` modulo the
    /// number of readers. On a broadcast nexus this is the same as `write`.
    pub fn write_to(&mut self, tray: Xtray, key: usize) -> Result<Option<TrayId>> {
        if self.fanout == FanoutMode::Broadcast {
            return self.broadcast(tray);
        }
        let mut deadline = None;
        loop {
            self.refresh();
            let set = self.readers.clone();
            if set.is_empty() {
                self.stats.record_dropped();
                return Ok(None);
            }
            let queue = &set.queues()[key % set.len()];
            match queue.append(set.generation(), &tray, &self.thread)? {
                Some(id) => {
                    self.stats.record_written(1);
                    return Ok(Some(id));
                }
                None => self.retry_stale(&mut deadline)?,
            }
        }
    }

    fn broadcast(&mut self, tray: Xtray) -> Result<Option<TrayId>> {
        let mut deadline = None;
        loop {
            self.refresh();
            let set = self.readers.clone();
            let Some(first) = set.first() else {
                self.stats.record_dropped();
                return Ok(None);
            };
            match first.write_first(set.generation(), &tray, &self.seq, &self.thread)? {
                Some(id) => {
                    let rest = &set.queues()[1..];
                    for (i, queue) in rest.iter().enumerate() {
                        if let Err(e) = queue.write(&tray, id, &self.thread) {
                            for late in &rest[i..] {
                                late.force_write(&tray, id);
                            }
                            log::warn!(
                                "writer '{}': tray {} pushed past the queue limit: {}",
                                self.thread,
                                id,
                                e
                            );
                            self.stats.record_written(set.len());
                            return Err(e);
                        }
                    }
                    self.stats.record_written(set.len());
                    return Ok(Some(id));
                }
                None => self.retry_stale(&mut deadline)?,
            }
        }
    }
}

impl Drop for FanoutWriter {
    fn drop(&mut self) {
        self.stats.remove_writer();
    }
}
