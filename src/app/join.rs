//! Join objects the harvester uses to reclaim exited threads

use std::thread::JoinHandle;

use crate::error::{Result, TriesteError};

/// Something that can wait for a thread to finish.
///
/// Registered by the parent with [`App::define_join`](super::App::define_join)
/// and consumed by the harvester once the thread reports dead.
pub trait TrieadJoin: Send {
    /// Wait for the thread to exit. `tname` is used in error reports.
    fn join(self: Box<Self>, tname: &str) -> Result<()>;
}

impl<T: Send + 'static> TrieadJoin for JoinHandle<T> {
    fn join(self: Box<Self>, tname: &str) -> Result<()> {
        JoinHandle::join(*self).map(|_| ()).map_err(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "thread panicked".to_string());
            TriesteError::join(tname, message)
        })
    }
}
