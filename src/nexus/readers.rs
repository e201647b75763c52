//! Versioned snapshot of the readers of a nexus
//!
//! A reader set is never modified once published. Attaching or detaching a
//! reader builds a new set with the next generation and swaps it in whole.

use std::sync::Arc;

use super::queue::SequencedQueue;

#[derive(Debug, Default)]
pub struct ReaderSet {
    gen: u64,
    queues: Vec<Arc<SequencedQueue>>,
}

impl ReaderSet {
    pub fn new(gen: u64, queues: Vec<Arc<SequencedQueue>>) -> Self {
        Self { gen, queues }
    }

    pub fn generation(&self) -> u64 {
        self.gen
    }

    pub fn queues(&self) -> &[Arc<SequencedQueue>] {
        &self.queues
    }

    /// The queue that stamps sequence numbers for this generation
    pub fn first(&self) -> Option<&Arc<SequencedQueue>> {
        self.queues.first()
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn contains(&self, queue: &Arc<SequencedQueue>) -> bool {
        self.queues.iter().any(|q| Arc::ptr_eq(q, queue))
    }

    /// Copy with one more reader at the end
    pub fn with_added(&self, queue: Arc<SequencedQueue>, gen: u64) -> Self {
        let mut queues = self.queues.clone();
        queues.push(queue);
        Self { gen, queues }
    }

    /// Copy without the given reader
    pub fn without(&self, queue: &Arc<SequencedQueue>, gen: u64) -> Self {
        let queues = self
            .queues
            .iter()
            .filter(|q| !Arc::ptr_eq(q, queue))
            .cloned()
            .collect();
        Self { gen, queues }
    }
}
