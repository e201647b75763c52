//! Nexuses and the queue machinery that moves trays between threads
//!
//! - [`Nexus`]: named, typed communication point owned by one thread
//! - [`SequencedQueue`]: double-buffered queue of one reader
//! - [`ReaderSet`]: versioned snapshot of a nexus's readers
//! - [`FanoutWriter`]: writer handle stamping the global tray order
//! - [`QueueEvent`]: "has data" indication for all queues of one thread

pub mod event;
#[allow(clippy::module_inception)]
pub mod nexus;
pub mod queue;
pub mod readers;
pub mod schema;
pub mod stats;
pub mod tray;
pub mod writer;

pub use event::{EventStats, QueueEvent};
pub use nexus::{Nexus, NexusReader};
pub use queue::{QueueParams, SequencedQueue};
pub use readers::ReaderSet;
pub use schema::{Direction, FanoutMode, FieldDef, NexusDef, RowType, TableType};
pub use stats::NexusStats;
pub use tray::{Delivery, Tray, TrayId, Xtray};
pub use writer::FanoutWriter;
