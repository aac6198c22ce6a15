//! Control loop: the single consumer of `ControlEvent`s.
//!
//! Shutdown runs on its own task so repeated signals keep being drained
//! (and logged as no-ops) while the coordinator works.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::ConfigReloader;
use crate::lifecycle::shutdown::ShutdownCoordinator;
use crate::lifecycle::signals::{ControlEvent, ControlReceiver};

pub struct ControlLoop {
    rx: ControlReceiver,
    shutdown: Arc<ShutdownCoordinator>,
    reloader: Arc<ConfigReloader>,
}

impl ControlLoop {
    pub fn new(rx: ControlReceiver, shutdown: Arc<ShutdownCoordinator>, reloader: Arc<ConfigReloader>) -> Self {
        Self { rx, shutdown, reloader }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Consume events until STOPPED or every sender is gone.
    pub async fn run(mut self) {
        let mut stopped = self.shutdown.subscribe();
        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(ControlEvent::Shutdown { source }) => {
                        let coordinator = self.shutdown.clone();
                        tokio::spawn(async move {
                            if let Some(report) = coordinator.shutdown(source).await {
                                tracing::info!(
                                    source = %report.source,
                                    drained = report.drained,
                                    handlers = report.handlers.len(),
                                    "Shutdown sequence finished"
                                );
                            }
                        });
                    }
                    Some(ControlEvent::Reload { source }) => {
                        // failures are logged and audited by the reloader
                        let reloader = self.reloader.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || reloader.reload(source)).await {
                            tracing::error!(source = %source, error = %e, "Config reload task failed");
                        }
                    }
                    None => {
                        tracing::debug!("Control channel closed");
                        break;
                    }
                },
                _ = stopped.recv() => {
                    tracing::info!("Control loop received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLogger;
    use crate::config::{self, ServiceConfig};
    use crate::health::Readiness;
    use crate::lifecycle::shutdown::LifecycleState;
    use crate::lifecycle::signals::{control_channel, ControlSource};
    use std::time::Duration;

    #[tokio::test]
    async fn test_events_drive_reload_and_shutdown() {
        let coordinator = Arc::new(ShutdownCoordinator::new(
            Duration::from_secs(1),
            Readiness::new(),
            AuditLogger::disabled(),
        ));
        let reloader = Arc::new(config::ConfigReloader::new(
            None,
            config::reload::shared(ServiceConfig::default()),
            AuditLogger::disabled(),
        ));
        let (tx, rx) = control_channel();
        let handle = ControlLoop::new(rx, coordinator.clone(), reloader).spawn();

        tx.send(ControlEvent::Reload { source: ControlSource::Sighup }).unwrap();
        tx.send(ControlEvent::Shutdown { source: ControlSource::Sigterm }).unwrap();
        tx.send(ControlEvent::Shutdown { source: ControlSource::Sigint }).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert_eq!(coordinator.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_reload_event_reads_file_off_the_loop() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rate_limit]\nrequests_per_window = 7").unwrap();

        let live = config::reload::shared(ServiceConfig::default());
        let coordinator = Arc::new(ShutdownCoordinator::new(
            Duration::from_secs(1),
            Readiness::new(),
            AuditLogger::disabled(),
        ));
        let reloader = Arc::new(config::ConfigReloader::new(
            Some(file.path().to_path_buf()),
            live.clone(),
            AuditLogger::disabled(),
        ));
        let (tx, rx) = control_channel();
        let handle = ControlLoop::new(rx, coordinator, reloader).spawn();

        tx.send(ControlEvent::Reload { source: ControlSource::Sighup }).unwrap();
        tx.send(ControlEvent::Shutdown { source: ControlSource::Sigterm }).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

        assert_eq!(live.load().rate_limit.requests_per_window, 7);
    }
}
