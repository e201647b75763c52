//! Process-wide directory of applications by name

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::app::App;
use super::config::AppConfig;
use crate::error::{Result, TriesteError};

lazy_static::lazy_static! {
    static ref APPS: Mutex<BTreeMap<String, Arc<App>>> = Mutex::new(BTreeMap::new());
}

fn apps() -> MutexGuard<'static, BTreeMap<String, Arc<App>>> {
    APPS.lock().unwrap_or_else(|e| e.into_inner())
}

impl App {
    /// Create an app with the default configuration and register it
    pub fn create(name: &str) -> Result<Arc<App>> {
        Self::create_with_config(name, AppConfig::default())
    }

    /// Create an app and register it. The name must be unique among the
    /// registered apps.
    pub fn create_with_config(name: &str, config: AppConfig) -> Result<Arc<App>> {
        if name.is_empty() {
            return Err(TriesteError::invalid_parameter("app name", "must not be empty"));
        }
        config.validate()?;
        let mut apps = apps();
        if apps.contains_key(name) {
            return Err(TriesteError::duplicate("app", name));
        }
        let app = Arc::new(App::new(name, config));
        apps.insert(name.to_string(), app.clone());
        log::info!("app '{}' created", name);
        Ok(app)
    }

    pub fn find(name: &str) -> Result<Arc<App>> {
        apps()
            .get(name)
            .cloned()
            .ok_or_else(|| TriesteError::not_found("app", name))
    }

    /// Snapshot of all registered apps
    pub fn list() -> Vec<(String, Arc<App>)> {
        apps()
            .iter()
            .map(|(name, app)| (name.clone(), app.clone()))
            .collect()
    }

    /// Remove the app from the directory, if it is still the one
    /// registered under its name. Threads holding it keep working.
    pub fn drop_app(app: &App) {
        let mut apps = apps();
        let same = apps
            .get(app.name())
            .map_or(false, |entry| std::ptr::eq(Arc::as_ptr(entry), app));
        if same {
            apps.remove(app.name());
            log::debug!("app '{}' removed from the directory", app.name());
        }
    }
}
