//! Application registry and thread lifecycle
//!
//! - [`App`]: a named set of cooperating threads, found through a
//!   process-wide directory
//! - [`TrieadOwner`]: the handle a thread uses to export, import and report
//!   its lifecycle
//! - [`Triead`]: the identity of a thread as seen by the others
//! - harvesting: joining threads as they exit
//! - topology: detection of loops in the nexus connections

#[allow(clippy::module_inception)]
pub mod app;
pub mod config;
pub mod directory;
pub mod harvest;
pub mod join;
pub mod owner;
pub mod record;
pub mod topology;
pub mod triead;

pub use app::App;
pub use config::AppConfig;
pub use join::TrieadJoin;
pub use owner::TrieadOwner;
pub use record::TrieadState;
pub use topology::{ConnectivityGraph, NodeKind};
pub use triead::{FacetLink, FacetRole, Triead};
