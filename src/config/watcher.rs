//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::lifecycle::signals::{ControlEvent, ControlSender, ControlSource};

/// Watches the config file and asks the control loop to reload on change.
pub struct ConfigWatcher {
    path: PathBuf,
    control_tx: ControlSender,
}

impl ConfigWatcher {
    pub fn new(path: &Path, control_tx: ControlSender) -> Self {
        Self {
            path: path.to_path_buf(),
            control_tx,
        }
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.control_tx.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Config file change detected, requesting reload");
                        let _ = tx.send(ControlEvent::Reload {
                            source: ControlSource::FileWatch,
                        });
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}
