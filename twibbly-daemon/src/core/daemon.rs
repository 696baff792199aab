//! Daemon wiring
//!
//! Startup runs every check that can fail fatally (backend, format, ledger,
//! printer resolution) before anything is printed. After that, nothing but
//! the shutdown token ends the process.

use super::config::{ChangeSourceKind, Config};
use crate::printing::{DeliveryLedger, DeliveryTracker, LEDGER_RETENTION_SECS, PrintCoordinator};
use crate::source::{self, ChangeSource, PollSource, RealtimeSource};
use crate::store::{RecordStore, RestStore};
use crate::utils::{AppError, AppResult};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use twibbly_printer::{FontSet, LabelRenderer, PrinterRegistry, select_backend};

pub struct Daemon {
    config: Config,
    store: Arc<dyn RecordStore>,
    coordinator: Arc<PrintCoordinator>,
}

impl Daemon {
    /// Build the pipeline. Every error here is a startup configuration error.
    pub async fn start(config: Config) -> AppResult<Self> {
        let backend = select_backend(config.backend, &config.backend_options)?;

        let format = config
            .label
            .format
            .unwrap_or_else(|| backend.preferred_format());
        if !backend.supports(format) {
            return Err(AppError::Incompatible(format!(
                "{} backend cannot print {} labels",
                backend.kind(),
                format
            )));
        }

        let fonts = FontSet::load(
            config.label.font_path.as_deref(),
            config.label.font_bold_path.as_deref(),
        );
        let renderer = LabelRenderer::new(config.label.geometry)
            .with_fonts(fonts)
            .with_format(format)
            .with_debug(config.label.debug);

        std::fs::create_dir_all(&config.work_dir)?;
        let artifact_dir = config.artifact_dir();
        std::fs::create_dir_all(&artifact_dir)?;
        clear_stale_artifacts(&artifact_dir);

        let ledger = DeliveryLedger::open(config.ledger_path())?;
        let store: Arc<dyn RecordStore> = Arc::new(RestStore::new(&config.store)?);
        let tracker = Arc::new(DeliveryTracker::new(ledger, store.clone()));
        tracker.prune(LEDGER_RETENTION_SECS);

        let registry = PrinterRegistry::new(backend.clone());
        let printer = registry.resolve(config.printer_name.as_deref()).await?;

        tracing::info!(
            backend = %backend.kind(),
            os = std::env::consts::OS,
            printer = %printer,
            source = ?printer.source,
            format = %format,
            width_mm = config.label.geometry.width_mm(),
            height_mm = config.label.geometry.height_mm(),
            margin_mm = config.label.geometry.margin_mm(),
            session_id = %config.store.session_id,
            "Print pipeline ready"
        );

        tracker.reconcile().await;

        let coordinator = PrintCoordinator::new(renderer, registry, tracker, artifact_dir)
            .with_preferred_printer(config.printer_name.clone())
            .with_printer(printer)
            .with_retry_pause(config.retry_pause);

        Ok(Self {
            config,
            store,
            coordinator: Arc::new(coordinator),
        })
    }

    /// Run the change source and coordinator until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        let (tx, rx) = source::channel();

        let change_source: Box<dyn ChangeSource> = match self.config.change_source {
            ChangeSourceKind::Poll => Box::new(PollSource::new(
                self.store.clone(),
                self.config.poll_interval,
            )),
            ChangeSourceKind::Realtime => Box::new(RealtimeSource::new(
                self.config.store.clone(),
                Some(self.store.clone()),
            )),
        };
        tracing::info!(source = change_source.name(), "Starting change source");

        let source_task = tokio::spawn(change_source.run(tx, shutdown.clone()));
        let coordinator_task = tokio::spawn(self.coordinator.clone().run(rx, shutdown.clone()));

        let (source_result, coordinator_result) = tokio::join!(source_task, coordinator_task);
        if let Err(e) = source_result {
            tracing::error!(error = %e, "Change source task failed");
        }
        if let Err(e) = coordinator_result {
            tracing::error!(error = %e, "Print coordinator task failed");
        }

        tracing::info!("Twibbly stopped");
    }
}

/// Remove label files left behind by a crashed run
fn clear_stale_artifacts(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_label = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("label-"));
        if is_label && path.is_file() {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed stale artifact"),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove stale artifact")
                }
            }
        }
    }
}
