//! Nexus statistics tracking

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Nexus statistics
#[derive(Debug, Default)]
pub struct NexusStats {
    /// Trays accepted from writers
    pub trays_written: AtomicU64,
    /// Tray copies placed into reader queues
    pub trays_delivered: AtomicU64,
    /// Trays written while no reader was attached
    pub trays_dropped: AtomicU64,
    /// Number of attached writers
    pub active_writers: AtomicU32,
    /// Number of attached readers
    pub active_readers: AtomicU32,
}

impl NexusStats {
    /// Record one tray handed to `copies` readers
    pub fn record_written(&self, copies: usize) {
        self.trays_written.fetch_add(1, Ordering::Relaxed);
        self.trays_delivered
            .fetch_add(copies as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.trays_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_writer(&self) -> u32 {
        self.active_writers.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn remove_writer(&self) -> u32 {
        self.active_writers.fetch_sub(1, Ordering::Relaxed) - 1
    }

    pub fn add_reader(&self) -> u32 {
        self.active_readers.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn remove_reader(&self) -> u32 {
        self.active_readers.fetch_sub(1, Ordering::Relaxed) - 1
    }

    pub fn written(&self) -> u64 {
        self.trays_written.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.trays_delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.trays_dropped.load(Ordering::Relaxed)
    }
}
