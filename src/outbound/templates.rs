//! On-disk template catalog.
//!
//! Templates live as `<name>.json` files in the configured directory. The
//! store is an explicit instance injected where needed; a background task
//! re-scans the directory so template edits, additions, and removals are
//! picked up without a restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::Template;

/// Interval between directory re-scans.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TemplateStoreError {
    #[error("failed to read template directory {dir}: {source}")]
    ReadDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Mutable catalog of named templates backed by a directory.
pub struct TemplateStore {
    dir: PathBuf,
    templates: Mutex<HashMap<String, Template>>,
}

impl TemplateStore {
    /// Load the catalog from `dir`.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be read. Individual files that are
    /// not valid template JSON are skipped with a warning so one broken
    /// file cannot take the whole catalog down.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Arc<Self>, TemplateStoreError> {
        let store = Arc::new(Self {
            dir: dir.into(),
            templates: Mutex::new(HashMap::new()),
        });
        let count = store.reload()?;
        info!(dir = %store.dir.display(), count, "loaded template catalog");
        Ok(store)
    }

    /// Current catalog contents.
    pub fn snapshot(&self) -> HashMap<String, Template> {
        self.templates
            .lock()
            .expect("template catalog mutex is never poisoned")
            .clone()
    }

    /// Re-scan the directory, replacing the catalog. Returns the number of
    /// templates loaded.
    pub fn reload(&self) -> Result<usize, TemplateStoreError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| {
            TemplateStoreError::ReadDir {
                dir: self.dir.clone(),
                source,
            }
        })?;

        let mut loaded = HashMap::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = template_name(&path) else {
                debug!(path = %path.display(), "ignoring non-template entry");
                continue;
            };
            match read_template(&path) {
                Ok(template) => {
                    loaded.insert(name, template);
                }
                Err(message) => {
                    warn!(path = %path.display(), message, "skipping unreadable template");
                }
            }
        }

        let count = loaded.len();
        *self
            .templates
            .lock()
            .expect("template catalog mutex is never poisoned") = loaded;
        Ok(count)
    }

    /// Spawn the background refresh task; it stops when `shutdown` flips.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = store.reload() {
                            warn!(error = %err, "template catalog refresh failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("template catalog refresh stopping");
                        return;
                    }
                }
            }
        })
    }
}

fn template_name(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    let file_name = path.file_name()?.to_str()?;
    let name = file_name.strip_suffix(".json")?;
    (!name.is_empty()).then(|| name.to_string())
}

fn read_template(path: &Path) -> Result<Template, String> {
    let raw = std::fs::read(path).map_err(|err| err.to_string())?;
    serde_json::from_slice(&raw).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new(tag: &str) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "rulekeeper-templates-{tag}-{}",
                uuid::Uuid::new_v4()
            ));
            std::fs::create_dir_all(&dir).expect("create temp dir");
            Self(dir)
        }

        fn write(&self, name: &str, contents: &str) {
            std::fs::write(self.0.join(name), contents).expect("write template file");
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    const DOWNSAMPLE: &str = r#"{
        "command_template": "CREATE MATERIALIZED VIEW IF NOT EXISTS \"{{.Table}}_ld\" AS SELECT 1",
        "delete_template": "DROP MATERIALIZED VIEW IF EXISTS \"{{.Table}}_ld\"",
        "description": "low resolution view",
        "priority": 10,
        "group": "downsampling"
    }"#;

    #[test]
    fn loads_templates_and_ignores_other_entries() {
        let dir = TempDir::new("load");
        dir.write("downsample.json", DOWNSAMPLE);
        dir.write("notes.txt", "not a template");
        dir.write("broken.json", "{ nope");

        let store = TemplateStore::open(dir.0.clone()).expect("open");
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["downsample"].group, "downsampling");
        assert_eq!(snapshot["downsample"].priority, 10);
    }

    #[test]
    fn reload_picks_up_additions_and_removals() {
        let dir = TempDir::new("reload");
        dir.write("downsample.json", DOWNSAMPLE);
        let store = TemplateStore::open(dir.0.clone()).expect("open");
        assert_eq!(store.snapshot().len(), 1);

        dir.write("retention.json", DOWNSAMPLE);
        std::fs::remove_file(dir.0.join("downsample.json")).expect("remove");
        let count = store.reload().expect("reload");
        assert_eq!(count, 1);
        let snapshot = store.snapshot();
        assert!(snapshot.contains_key("retention"));
        assert!(!snapshot.contains_key("downsample"));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let missing = std::env::temp_dir().join("rulekeeper-definitely-missing");
        assert!(TemplateStore::open(missing).is_err());
    }
}
