//! Registry bookkeeping of one thread name

use std::fmt;
use std::sync::Arc;

use super::join::TrieadJoin;
use super::triead::Triead;

/// Lifecycle state of a thread name in an App
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrieadState {
    /// Name reserved; the thread may or may not have been made yet
    Declared,
    /// All nexuses exported
    Constructed,
    /// All connections made
    Ready,
    /// Exited
    Dead,
}

/// Per-name record of the App's thread table.
///
/// Exists from the moment the name is declared or made. A thread that only
/// has been declared has no `triead` yet.
pub(crate) struct ThreadRecord {
    pub triead: Option<Arc<Triead>>,
    /// Joined by the harvester once the thread is dead
    pub join: Option<Box<dyn TrieadJoin>>,
    /// Name of the thread this one is blocked on, for deadlock detection
    pub waiting_for: Option<String>,
    /// Number of callers blocked waiting on this thread
    pub sleepers: usize,
    /// Included in the App's unready/alive counters
    pub counted: bool,
}

impl ThreadRecord {
    pub fn declared() -> Self {
        Self {
            triead: None,
            join: None,
            waiting_for: None,
            sleepers: 0,
            counted: true,
        }
    }

    pub fn defined(triead: Arc<Triead>) -> Self {
        Self {
            triead: Some(triead),
            ..Self::declared()
        }
    }

    pub fn state(&self) -> TrieadState {
        match &self.triead {
            None => TrieadState::Declared,
            Some(t) if t.is_dead() => TrieadState::Dead,
            Some(t) if t.is_ready() => TrieadState::Ready,
            Some(t) if t.is_constructed() => TrieadState::Constructed,
            Some(_) => TrieadState::Declared,
        }
    }

    /// The thread can be handed out to a waiting lookup
    pub fn is_constructed(&self) -> bool {
        self.triead.as_ref().map_or(false, |t| t.is_constructed())
    }
}

impl fmt::Debug for ThreadRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadRecord")
            .field("state", &self.state())
            .field("has_join", &self.join.is_some())
            .field("waiting_for", &self.waiting_for)
            .field("sleepers", &self.sleepers)
            .finish()
    }
}
