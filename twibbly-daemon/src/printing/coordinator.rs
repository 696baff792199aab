//! Print coordinator
//!
//! Receives candidate batches from the change source and drives each entry
//! through render → dispatch → mark_done. Failures are logged per entry and
//! never end the loop; only the shutdown token does.

use super::tracker::DeliveryTracker;
use crate::source::{BatchOrigin, CandidateBatch};
use crate::store::NameEntry;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use twibbly_printer::{LabelRenderer, PrintError, PrinterIdentity, PrinterRegistry};

/// Pause after a failed dispatch
pub const DEFAULT_RETRY_PAUSE: Duration = Duration::from_secs(3);

/// What happened to one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Already printed or currently being printed
    Skipped,
    Printed,
    /// Printed, store flag pending reconciliation
    PrintedUnsynced,
    RenderFailed,
    DispatchFailed,
    /// Backend permanently unavailable
    Disabled,
}

pub struct PrintCoordinator {
    renderer: LabelRenderer,
    registry: PrinterRegistry,
    preferred_printer: Option<String>,
    /// Lazily resolved, cleared when the spooler no longer knows it
    printer: RwLock<Option<PrinterIdentity>>,
    tracker: Arc<DeliveryTracker>,
    artifact_dir: PathBuf,
    retry_pause: Duration,
    disabled: AtomicBool,
}

impl PrintCoordinator {
    pub fn new(
        renderer: LabelRenderer,
        registry: PrinterRegistry,
        tracker: Arc<DeliveryTracker>,
        artifact_dir: PathBuf,
    ) -> Self {
        Self {
            renderer,
            registry,
            preferred_printer: None,
            printer: RwLock::new(None),
            tracker,
            artifact_dir,
            retry_pause: DEFAULT_RETRY_PAUSE,
            disabled: AtomicBool::new(false),
        }
    }

    pub fn with_preferred_printer(mut self, name: Option<String>) -> Self {
        self.preferred_printer = name.filter(|n| !n.trim().is_empty());
        self
    }

    /// Use a printer resolved at startup
    pub fn with_printer(self, printer: PrinterIdentity) -> Self {
        *self.printer.write() = Some(printer);
        self
    }

    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    pub fn tracker(&self) -> &Arc<DeliveryTracker> {
        &self.tracker
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Run until shutdown or until every source is gone
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<CandidateBatch>,
        shutdown: CancellationToken,
    ) {
        tracing::info!(backend = %self.registry.backend().kind(), "Print coordinator started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Print coordinator received shutdown signal");
                    break;
                }
                batch = rx.recv() => {
                    let Some(batch) = batch else {
                        tracing::info!("Change source closed, print coordinator stopping");
                        break;
                    };
                    self.process_batch(batch, &shutdown).await;
                }
            }
        }
    }

    /// Handle a batch in order, then acknowledge it
    pub async fn process_batch(&self, mut batch: CandidateBatch, shutdown: &CancellationToken) {
        let entries = std::mem::take(&mut batch.entries);
        if entries.is_empty() {
            batch.complete();
            return;
        }

        // Pending store writes are retried whatever the source, never reprinted
        self.tracker.reconcile().await;

        let total = entries.len();
        let mut printed = 0;
        for entry in &entries {
            if shutdown.is_cancelled() {
                tracing::info!(origin = %batch.origin, "Shutdown requested, leaving rest of batch");
                break;
            }
            if matches!(
                self.handle(entry).await,
                Outcome::Printed | Outcome::PrintedUnsynced
            ) {
                printed += 1;
            }
        }

        if printed > 0 {
            tracing::info!(origin = %batch.origin, total, printed, "Batch processed");
        }
        batch.complete();
    }

    /// Drive one candidate through the pipeline
    #[instrument(skip(self, entry), fields(entry_id = %entry.id))]
    pub async fn handle(&self, entry: &NameEntry) -> Outcome {
        if self.is_disabled() {
            tracing::debug!("Dispatch disabled, entry left unprinted");
            return Outcome::Disabled;
        }
        if self.tracker.already_handled(entry) {
            return Outcome::Skipped;
        }
        let Some(claim) = self.tracker.try_claim(&entry.id) else {
            return Outcome::Skipped;
        };

        let artifact = match self
            .renderer
            .render(&entry.first_name, &entry.last_name)
            .and_then(|label| label.write_to(&self.artifact_dir, &entry.title()))
        {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::error!(
                    entry_id = %entry.id,
                    first_name = %entry.first_name,
                    last_name = %entry.last_name,
                    error = %e,
                    "Label render failed"
                );
                return Outcome::RenderFailed;
            }
        };

        let printer = match self.current_printer().await {
            Ok(printer) => printer,
            Err(e) => {
                artifact.discard();
                self.dispatch_failed(entry, None, e).await;
                return Outcome::DispatchFailed;
            }
        };

        let result = self.registry.backend().submit(&artifact, &printer).await;
        artifact.discard();

        match result {
            Ok(ack) => {
                tracing::info!(
                    entry_id = %entry.id,
                    first_name = %entry.first_name,
                    last_name = %entry.last_name,
                    printer = %ack.printer,
                    backend = %ack.backend,
                    job_id = ?ack.job_id,
                    "Label printed"
                );
                match self.tracker.mark_done(claim, entry).await {
                    Ok(()) => Outcome::Printed,
                    Err(_) => Outcome::PrintedUnsynced,
                }
            }
            Err(e) => {
                self.dispatch_failed(entry, Some(&printer), e).await;
                Outcome::DispatchFailed
            }
        }
    }

    async fn current_printer(&self) -> Result<PrinterIdentity, PrintError> {
        let cached = self.printer.read().clone();
        if let Some(printer) = cached {
            return Ok(printer);
        }

        let resolved = self
            .registry
            .resolve(self.preferred_printer.as_deref())
            .await?;
        tracing::info!(printer = %resolved, source = ?resolved.source, "Printer resolved");
        *self.printer.write() = Some(resolved.clone());
        Ok(resolved)
    }

    async fn dispatch_failed(
        &self,
        entry: &NameEntry,
        printer: Option<&PrinterIdentity>,
        error: PrintError,
    ) {
        let backend = self.registry.backend().kind();
        let printer = printer.map(|p| p.name.as_str()).unwrap_or("-");

        match &error {
            PrintError::BackendUnavailable(_) | PrintError::UnsupportedArtifact(_) => {
                self.disabled.store(true, Ordering::Release);
                tracing::error!(
                    entry_id = %entry.id,
                    backend = %backend,
                    os = std::env::consts::OS,
                    error = %error,
                    "Print backend cannot be used, dispatch disabled until restart"
                );
                return;
            }
            PrintError::ArtifactUnreadable(_) => {
                tracing::error!(
                    entry_id = %entry.id,
                    first_name = %entry.first_name,
                    last_name = %entry.last_name,
                    error = %error,
                    "Artifact unreadable, entry dropped for this cycle"
                );
                return;
            }
            PrintError::PrinterNotFound(_) | PrintError::NoPrinters => {
                *self.printer.write() = None;
            }
            _ => {}
        }

        tracing::warn!(
            entry_id = %entry.id,
            first_name = %entry.first_name,
            last_name = %entry.last_name,
            printer,
            backend = %backend,
            os = std::env::consts::OS,
            error = %error,
            retry_in_ms = self.retry_pause.as_millis() as u64,
            "Dispatch failed, entry left unprinted"
        );
        tokio::time::sleep(self.retry_pause).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printing::ledger::DeliveryLedger;
    use crate::store::RecordStore;
    use crate::store::memory::{MemoryStore, entry};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use twibbly_printer::{
        ArtifactFormat, BackendKind, LabelGeometry, PrintAck, PrintArtifact, PrintBackend,
        PrintResult,
    };

    /// Backend that records submissions and fails on demand
    #[derive(Default)]
    struct ScriptedBackend {
        printers: Vec<String>,
        failures: Mutex<VecDeque<PrintError>>,
        submitted: Mutex<Vec<(String, PathBuf)>>,
        submits: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedBackend {
        fn new() -> Self {
            Self {
                printers: vec!["DYMO LabelWriter 450".to_string()],
                ..Default::default()
            }
        }

        fn fail_with(&self, error: PrintError) {
            self.failures.lock().push_back(error);
        }

        fn submits(&self) -> usize {
            self.submits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PrintBackend for ScriptedBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::External
        }

        fn supports(&self, _format: ArtifactFormat) -> bool {
            true
        }

        fn preferred_format(&self) -> ArtifactFormat {
            ArtifactFormat::Bitmap
        }

        async fn list_printers(&self) -> PrintResult<Vec<String>> {
            Ok(self.printers.clone())
        }

        async fn default_printer(&self) -> PrintResult<Option<String>> {
            Ok(self.printers.first().cloned())
        }

        async fn submit(
            &self,
            artifact: &PrintArtifact,
            printer: &PrinterIdentity,
        ) -> PrintResult<PrintAck> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            artifact.ensure_readable()?;
            self.submitted
                .lock()
                .push((artifact.title().to_string(), artifact.path().to_path_buf()));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(error) = self.failures.lock().pop_front() {
                return Err(error);
            }
            Ok(PrintAck {
                backend: BackendKind::External,
                printer: printer.name.clone(),
                job_id: None,
            })
        }
    }

    struct Fixture {
        coordinator: PrintCoordinator,
        backend: Arc<ScriptedBackend>,
        store: Arc<MemoryStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture(backend: ScriptedBackend, entries: Vec<NameEntry>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(backend);
        let store = Arc::new(MemoryStore::with_entries(entries));
        let tracker = Arc::new(DeliveryTracker::new(
            DeliveryLedger::open_in_memory().unwrap(),
            store.clone(),
        ));
        let renderer = LabelRenderer::new(LabelGeometry::new(52.0, 60.0, 3.0).unwrap());
        let coordinator = PrintCoordinator::new(
            renderer,
            PrinterRegistry::new(backend.clone()),
            tracker,
            dir.path().to_path_buf(),
        )
        .with_preferred_printer(Some("DYMO LabelWriter 450".into()))
        .with_retry_pause(Duration::ZERO);

        Fixture {
            coordinator,
            backend,
            store,
            _dir: dir,
        }
    }

    fn spool_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    async fn poll_once(f: &Fixture) {
        let entries = f.store.fetch_unprinted().await.unwrap();
        let (batch, done) = CandidateBatch::with_ack(BatchOrigin::Poll, entries);
        f.coordinator
            .process_batch(batch, &CancellationToken::new())
            .await;
        done.await.unwrap();
    }

    #[tokio::test]
    async fn test_prints_and_marks() {
        let f = fixture(ScriptedBackend::new(), vec![entry("1", "John", "Doe")]);

        poll_once(&f).await;

        assert_eq!(f.backend.submits(), 1);
        assert!(f.store.is_printed("1"));
        assert_eq!(f.backend.submitted.lock()[0].0, "John Doe");
        assert!(spool_is_empty(&f.coordinator.artifact_dir));
    }

    #[tokio::test]
    async fn test_empty_batch_does_nothing() {
        let f = fixture(ScriptedBackend::new(), vec![]);

        poll_once(&f).await;

        assert_eq!(f.backend.submits(), 0);
        assert_eq!(f.store.marks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_dispatch_retried_next_cycle() {
        let backend = ScriptedBackend::new();
        backend.fail_with(PrintError::Rejected("paper jam".into()));
        let f = fixture(backend, vec![entry("1", "John", "Doe")]);

        poll_once(&f).await;
        assert_eq!(f.backend.submits(), 1);
        assert!(!f.store.is_printed("1"));
        assert_eq!(f.store.marks.load(Ordering::SeqCst), 0);

        let artifact = f.backend.submitted.lock()[0].1.clone();
        assert!(!artifact.exists());
        assert!(spool_is_empty(&f.coordinator.artifact_dir));

        poll_once(&f).await;
        assert_eq!(f.backend.submits(), 2);
        assert!(f.store.is_printed("1"));
    }

    #[tokio::test]
    async fn test_done_entry_never_resubmitted() {
        let f = fixture(ScriptedBackend::new(), vec![entry("1", "John", "Doe")]);
        let e = entry("1", "John", "Doe");

        assert_eq!(f.coordinator.handle(&e).await, Outcome::Printed);
        // Stale push payload still says printed = false
        assert_eq!(f.coordinator.handle(&e).await, Outcome::Skipped);
        poll_once(&f).await;

        assert_eq!(f.backend.submits(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_dispatch_once() {
        let backend = ScriptedBackend {
            delay: Duration::from_millis(20),
            ..ScriptedBackend::new()
        };
        let f = fixture(backend, vec![entry("1", "John", "Doe")]);
        let from_push = entry("1", "John", "Doe");
        let from_poll = entry("1", "John", "Doe");

        let (a, b) = tokio::join!(
            f.coordinator.handle(&from_push),
            f.coordinator.handle(&from_poll)
        );

        assert_eq!(f.backend.submits(), 1);
        assert!(matches!(
            (a, b),
            (Outcome::Printed, Outcome::Skipped) | (Outcome::Skipped, Outcome::Printed)
        ));
    }

    #[tokio::test]
    async fn test_failed_store_write_does_not_reprint() {
        let f = fixture(ScriptedBackend::new(), vec![entry("1", "John", "Doe")]);
        f.store.fail_next_marks(1);
        let e = entry("1", "John", "Doe");

        assert_eq!(f.coordinator.handle(&e).await, Outcome::PrintedUnsynced);
        assert!(!f.store.is_printed("1"));

        // Next poll still sees printed = false, reconciles instead of printing
        poll_once(&f).await;
        assert_eq!(f.backend.submits(), 1);
        assert!(f.store.is_printed("1"));
    }

    #[tokio::test]
    async fn test_push_mode_reconciles_failed_store_write() {
        let f = fixture(ScriptedBackend::new(), vec![entry("1", "John", "Doe")]);
        f.store.fail_next_marks(1);
        let shutdown = CancellationToken::new();

        let push = CandidateBatch::new(BatchOrigin::Push, vec![entry("1", "John", "Doe")]);
        f.coordinator.process_batch(push, &shutdown).await;
        assert!(!f.store.is_printed("1"));

        // Catch-up after a reconnect still lists the entry as unprinted
        let missed = f.store.fetch_unprinted().await.unwrap();
        let catch_up = CandidateBatch::new(BatchOrigin::CatchUp, missed);
        f.coordinator.process_batch(catch_up, &shutdown).await;

        assert!(f.store.is_printed("1"));
        assert_eq!(f.store.marks.load(Ordering::SeqCst), 2);
        assert_eq!(f.backend.submits(), 1);
    }

    #[tokio::test]
    async fn test_backend_unavailable_latches() {
        let backend = ScriptedBackend::new();
        backend.fail_with(PrintError::BackendUnavailable("lp not installed".into()));
        let f = fixture(
            backend,
            vec![entry("1", "John", "Doe"), entry("2", "Jane", "Roe")],
        );

        poll_once(&f).await;

        assert!(f.coordinator.is_disabled());
        assert_eq!(f.backend.submits(), 1);
        assert!(!f.store.is_printed("1"));
        assert!(!f.store.is_printed("2"));
        assert_eq!(
            f.coordinator.handle(&entry("2", "Jane", "Roe")).await,
            Outcome::Disabled
        );
    }

    #[tokio::test]
    async fn test_printer_not_found_re_resolves() {
        let backend = ScriptedBackend::new();
        backend.fail_with(PrintError::PrinterNotFound("DYMO LabelWriter 450".into()));
        let f = fixture(backend, vec![entry("1", "John", "Doe")]);

        assert_eq!(
            f.coordinator.handle(&entry("1", "John", "Doe")).await,
            Outcome::DispatchFailed
        );
        assert!(f.coordinator.printer.read().is_none());

        assert_eq!(
            f.coordinator.handle(&entry("1", "John", "Doe")).await,
            Outcome::Printed
        );
        assert!(f.coordinator.printer.read().is_some());
    }

    #[tokio::test]
    async fn test_shutdown_stops_run_loop() {
        let f = fixture(ScriptedBackend::new(), vec![entry("1", "John", "Doe")]);
        let coordinator = Arc::new(f.coordinator);
        let (tx, rx) = crate::source::channel();
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(coordinator.clone().run(rx, shutdown.clone()));

        let (batch, done) =
            CandidateBatch::with_ack(BatchOrigin::Push, vec![entry("1", "John", "Doe")]);
        tx.send(batch).await.unwrap();
        done.await.unwrap();
        assert!(f.store.is_printed("1"));

        shutdown.cancel();
        handle.await.unwrap();
    }
}
