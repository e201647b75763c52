//! Identity of one participating thread

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use crate::error::{Result, TriesteError};
use crate::nexus::{Nexus, NexusDef};

/// Role a thread plays on a nexus it connected to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetRole {
    Reader,
    Writer,
}

/// A connection of a thread to a nexus, kept for the topology check.
/// The nexus belongs to its exporting thread, so the link is weak.
#[derive(Debug, Clone)]
pub struct FacetLink {
    pub nexus: Weak<Nexus>,
    pub full_name: String,
    pub role: FacetRole,
}

/// A thread of computation registered in an App.
///
/// The lifecycle flags only ever go from false to true, and are changed by
/// the App under its lock; reading them needs no lock.
#[derive(Debug)]
pub struct Triead {
    app: String,
    name: String,
    nexuses: Mutex<BTreeMap<String, Arc<Nexus>>>,
    links: Mutex<Vec<FacetLink>>,
    constructed: AtomicBool,
    ready: AtomicBool,
    dead: AtomicBool,
}

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Triead {
    pub(crate) fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
            nexuses: Mutex::new(BTreeMap::new()),
            links: Mutex::new(Vec::new()),
            constructed: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            dead: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn app_name(&self) -> &str {
        &self.app
    }

    /// All the nexuses of this thread are exported
    pub fn is_constructed(&self) -> bool {
        self.constructed.load(Ordering::Acquire)
    }

    /// All the connections of this thread are made
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub(crate) fn set_constructed(&self) {
        self.constructed.store(true, Ordering::Release);
    }

    pub(crate) fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub(crate) fn set_dead(&self) {
        self.dead.store(true, Ordering::Release);
    }

    /// Look up an exported nexus
    pub fn nexus(&self, name: &str) -> Option<Arc<Nexus>> {
        relock(&self.nexuses).get(name).cloned()
    }

    pub fn nexus_names(&self) -> Vec<String> {
        relock(&self.nexuses).keys().cloned().collect()
    }

    pub fn nexuses(&self) -> Vec<Arc<Nexus>> {
        relock(&self.nexuses).values().cloned().collect()
    }

    /// Connections to nexuses made by this thread
    pub fn links(&self) -> Vec<FacetLink> {
        relock(&self.links).clone()
    }

    /// Export a nexus. The first definition creates it; later ones with the
    /// same name must match it exactly.
    pub(crate) fn export(
        &self,
        def: NexusDef,
        queue_limit: usize,
        queue_timeout: Duration,
    ) -> Result<Arc<Nexus>> {
        if def.name.is_empty() {
            return Err(TriesteError::invalid_parameter(
                "nexus name",
                "must not be empty",
            ));
        }
        let mut nexuses = relock(&self.nexuses);
        if let Some(existing) = nexuses.get(&def.name) {
            return match existing.def().mismatch(&def) {
                None => Ok(existing.clone()),
                Some(diff) => Err(TriesteError::schema_mismatch(
                    existing.full_name(),
                    diff,
                )),
            };
        }
        let nexus = Arc::new(Nexus::new(
            self.app.clone(),
            self.name.clone(),
            def,
            queue_limit,
            queue_timeout,
        ));
        log::debug!("app '{}': nexus '{}' exported", self.app, nexus.full_name());
        nexuses.insert(nexus.name().to_string(), nexus.clone());
        Ok(nexus)
    }

    pub(crate) fn add_link(&self, nexus: &Arc<Nexus>, role: FacetRole) {
        relock(&self.links).push(FacetLink {
            nexus: Arc::downgrade(nexus),
            full_name: nexus.full_name().to_string(),
            role,
        });
    }
}
