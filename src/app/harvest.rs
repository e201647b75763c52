//! Reclaiming exited threads

use super::app::App;
use crate::error::{Result, TriesteError};

impl App {
    /// Join every thread that died since the last call.
    ///
    /// The joiners are taken out under the lock and joined outside of it.
    /// Returns whether the whole app is dead; calling again with no new
    /// deaths joins nothing and returns the same verdict.
    pub fn harvest_once(&self) -> bool {
        let (zombies, dead) = {
            let mut st = self.lock();
            let zombies = std::mem::take(&mut st.zombies);
            let dead = st.is_dead();
            if !dead {
                st.need_harvest = false;
            }
            (zombies, dead)
        };
        for zombie in zombies {
            match zombie.join.join(&zombie.name) {
                Ok(()) => log::debug!("app '{}': thread '{}' joined", self.name(), zombie.name),
                Err(e) => log::error!("app '{}': {}", self.name(), e),
            }
        }
        dead
    }

    /// Block until a thread needs joining or the app is dead
    pub fn wait_need_harvest(&self) {
        let st = self.lock();
        let _ = self.wait_until(st, None, |s| s.need_harvest || s.is_dead());
    }

    /// Join threads as they die until the whole app is dead, then remove
    /// the app from the directory.
    ///
    /// With `propagate_abort`, an aborted app is reported as an error once
    /// everything is collected.
    pub fn harvester(&self, propagate_abort: bool) -> Result<()> {
        loop {
            self.wait_need_harvest();
            if self.harvest_once() {
                break;
            }
        }
        App::drop_app(self);
        log::info!("app '{}' harvested", self.name());

        if propagate_abort {
            let st = self.lock();
            if let Some((by, msg)) = &st.aborted {
                return Err(TriesteError::aborted(self.name(), by, msg));
            }
        }
        Ok(())
    }
}
