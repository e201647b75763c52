//! # Trieste - Multithreaded Application Registry and Nexus Messaging
//!
//! Trieste coordinates a set of cooperating threads inside one process: the
//! threads find each other by name, publish typed communication points
//! (nexuses) and exchange batches of data (trays) through per-reader queues
//! that keep one global order.
//!
//! ## Features
//!
//! - **Named applications**: process-wide directory of apps, each with its own threads
//! - **Thread lifecycle**: declared, constructed, ready and dead, with bounded waits
//! - **Deadlock detection**: lookups that would wait in a cycle fail right away
//! - **Topology check**: loops of same-direction nexuses are refused at startup
//! - **Ordered fan-out**: every reader of a nexus sees the same tray order
//! - **Abort propagation**: one failing thread wakes and stops everyone
//! - **Harvesting**: exited threads are joined as they die
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │               App directory                      │
//! ├──────────────────────────────────────────────────┤
//! │  App: thread table   │  Triead: exported nexuses │
//! │  - lifecycle counts  │  - facet links            │
//! │  - abort, deadline   │                           │
//! └──────────────────────────────────────────────────┘
//!           │                         │
//!           ▼                         ▼
//! ┌─────────────────┐    ┌──────────────────────────┐
//! │   Harvester     │    │  Nexus: reader set       │
//! │  (joins dead)   │    │  writer -> queues -> rdr │
//! └─────────────────┘    └──────────────────────────┘
//! ```

pub mod app;
pub mod error;
pub mod nexus;

// Main API re-exports
pub use app::{App, AppConfig, FacetRole, Triead, TrieadJoin, TrieadOwner, TrieadState};
pub use error::{Result, TriesteError};
pub use nexus::{
    Delivery, Direction, FanoutMode, FanoutWriter, Nexus, NexusDef, NexusReader, QueueEvent,
    RowType, TableType, Tray, TrayId, Xtray,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration constants
pub mod config {
    /// Time allowed for all threads to become ready, from app creation
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Default high-water mark of a reader queue, in trays
    pub const DEFAULT_QUEUE_LIMIT: usize = 500;

    /// Bound of one blocking queue read or write
    pub const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 30_000;
}
