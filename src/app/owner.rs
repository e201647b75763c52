//! Control handle of a thread, held by the thread itself

use std::sync::Arc;
use std::time::Duration;

use super::app::App;
use super::triead::{FacetRole, Triead};
use crate::error::{Result, TriesteError};
use crate::nexus::{FanoutWriter, Nexus, NexusDef, NexusReader, QueueEvent};

/// The thread's side of its registration.
///
/// Exports and imports nexuses and drives the thread's lifecycle marks.
/// Dropping the owner marks the thread dead, so a thread that exits or
/// panics is always accounted for.
#[derive(Debug)]
pub struct TrieadOwner {
    app: Arc<App>,
    triead: Arc<Triead>,
    event: Arc<QueueEvent>,
}

impl TrieadOwner {
    pub(crate) fn new(app: Arc<App>, triead: Arc<Triead>, event: Arc<QueueEvent>) -> Self {
        Self { app, triead, event }
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    pub fn triead(&self) -> &Arc<Triead> {
        &self.triead
    }

    pub fn name(&self) -> &str {
        self.triead.name()
    }

    /// Event signalled when any of this thread's reader queues has data
    pub fn queue_event(&self) -> &Arc<QueueEvent> {
        &self.event
    }

    /// Wait until any reader queue of this thread has data; returns the
    /// reader slots that do.
    pub fn wait_any(&self, timeout: Option<Duration>) -> Vec<usize> {
        self.event.wait_any(timeout)
    }

    /// Export a nexus of this thread. Only allowed before the thread is
    /// constructed.
    pub fn export_nexus(&self, def: NexusDef) -> Result<Arc<Nexus>> {
        if self.triead.is_constructed() {
            return Err(TriesteError::invalid_state(format!(
                "thread '{}' can not export nexus '{}' after it is constructed",
                self.name(),
                def.name
            )));
        }
        let config = self.app.config();
        self.triead
            .export(def, config.queue_limit, config.queue_timeout())
    }

    /// Find a thread, waiting for it to be constructed unless `immediate`
    pub fn find_triead(&self, tname: &str, immediate: bool) -> Result<Arc<Triead>> {
        self.app.find_triead(self.name(), tname, immediate)
    }

    /// Find a nexus exported by thread `tname`
    pub fn find_nexus(&self, tname: &str, nexname: &str, immediate: bool) -> Result<Arc<Nexus>> {
        self.app.find_nexus(self.name(), tname, nexname, immediate)
    }

    fn check_can_connect(&self, tname: &str, nexname: &str) -> Result<()> {
        if self.triead.is_ready() {
            return Err(TriesteError::invalid_state(format!(
                "thread '{}' can not import nexus '{}/{}' after it is ready",
                self.name(),
                tname,
                nexname
            )));
        }
        Ok(())
    }

    /// Connect to a nexus as a reader
    pub fn import_reader(
        &self,
        tname: &str,
        nexname: &str,
        immediate: bool,
    ) -> Result<NexusReader> {
        self.check_can_connect(tname, nexname)?;
        let nexus = self.find_nexus(tname, nexname, immediate)?;
        self.triead.add_link(&nexus, FacetRole::Reader);
        Ok(nexus.attach_reader(self.name(), &self.event))
    }

    /// Connect to a nexus as a writer
    pub fn import_writer(
        &self,
        tname: &str,
        nexname: &str,
        immediate: bool,
    ) -> Result<FanoutWriter> {
        self.check_can_connect(tname, nexname)?;
        let nexus = self.find_nexus(tname, nexname, immediate)?;
        self.triead.add_link(&nexus, FacetRole::Writer);
        Ok(nexus.attach_writer(self.name()))
    }

    /// All nexuses of this thread are exported
    pub fn mark_constructed(&self) -> Result<()> {
        self.app.mark_constructed(&self.triead)
    }

    /// All connections of this thread are made
    pub fn mark_ready(&self) -> Result<()> {
        self.app.mark_ready(&self.triead)
    }

    /// Mark ready and wait for the rest of the app
    pub fn ready_ready(&self) -> Result<()> {
        self.mark_ready()?;
        self.wait_ready()
    }

    pub fn wait_ready(&self) -> Result<()> {
        self.app.wait_ready_as(self.name())
    }

    pub fn mark_dead(&self) {
        self.app.mark_dead(&self.triead)
    }

    /// Abort the whole app on behalf of this thread
    pub fn abort(&self, msg: &str) {
        self.app.abort(self.name(), msg)
    }

    pub fn is_aborted(&self) -> bool {
        self.app.is_aborted()
    }
}

impl Drop for TrieadOwner {
    fn drop(&mut self) {
        if !self.triead.is_dead() {
            self.mark_dead();
        }
    }
}
