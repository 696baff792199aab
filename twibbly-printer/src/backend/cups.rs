//! CUPS backend (IPP over HTTP)

use super::ipp::{self, IppRequest, IppResponse};
use super::{BackendKind, PrintAck, PrintBackend};
use crate::artifact::{ArtifactFormat, PrintArtifact};
use crate::error::{PrintError, PrintResult};
use crate::registry::PrinterIdentity;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument};

pub(crate) const DEFAULT_SERVER: &str = "localhost:631";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUESTING_USER: &str = "twibbly";

/// Prints through a CUPS server
#[derive(Debug)]
pub struct CupsBackend {
    server: String,
    request_id: AtomicU32,
}

impl CupsBackend {
    /// `server` is `host:port`
    pub fn new(server: &str) -> Self {
        Self {
            server: server.trim_end_matches('/').to_string(),
            request_id: AtomicU32::new(1),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    fn next_request_id(&self) -> u32 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn printer_path(name: &str) -> String {
        let mut path = String::from("/printers/");
        for b in name.bytes() {
            if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
                path.push(b as char);
            } else {
                path.push_str(&format!("%{b:02X}"));
            }
        }
        path
    }

    /// POST one IPP request. A fresh client per call keeps no pooled
    /// connection alive after the call returns.
    async fn send(&self, path: &str, body: Vec<u8>) -> PrintResult<IppResponse> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(0)
            .build()?;

        let url = format!("http://{}{}", self.server, path);
        let response = client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/ipp")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PrintError::Rejected(format!("HTTP {status} from {url}")));
        }

        let bytes = response.bytes().await?;
        IppResponse::parse(&bytes)
    }

    /// Like [`send`](Self::send), but an unreachable server means the
    /// backend itself is unusable.
    async fn query(&self, operation: u16, requested: Option<&str>) -> PrintResult<IppResponse> {
        let mut req = IppRequest::new(operation, self.next_request_id());
        req.attr(ipp::NAME, "requesting-user-name", REQUESTING_USER);
        if let Some(attr) = requested {
            req.attr(ipp::KEYWORD, "requested-attributes", attr);
        }

        self.send("/", req.finish(&[])).await.map_err(|e| match e {
            PrintError::Connection(msg) => PrintError::BackendUnavailable(format!(
                "CUPS server {} unreachable: {}",
                self.server, msg
            )),
            other => other,
        })
    }
}

#[async_trait]
impl PrintBackend for CupsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cups
    }

    fn supports(&self, _format: ArtifactFormat) -> bool {
        // CUPS filters handle both PNG and PDF
        true
    }

    fn preferred_format(&self) -> ArtifactFormat {
        ArtifactFormat::Document
    }

    #[instrument(skip(self), fields(server = %self.server))]
    async fn list_printers(&self) -> PrintResult<Vec<String>> {
        let resp = self
            .query(ipp::CUPS_GET_PRINTERS, Some("printer-name"))
            .await?;

        // No printers at all is reported as not-found by CUPS
        if resp.status == ipp::STATUS_NOT_FOUND {
            return Ok(Vec::new());
        }
        if !resp.is_success() {
            return Err(PrintError::Rejected(resp.status_message()));
        }

        let printers = resp.texts("printer-name");
        debug!(count = printers.len(), "CUPS printers enumerated");
        Ok(printers)
    }

    #[instrument(skip(self), fields(server = %self.server))]
    async fn default_printer(&self) -> PrintResult<Option<String>> {
        let resp = self.query(ipp::CUPS_GET_DEFAULT, Some("printer-name")).await?;
        if resp.status == ipp::STATUS_NOT_FOUND {
            return Ok(None);
        }
        if !resp.is_success() {
            return Err(PrintError::Rejected(resp.status_message()));
        }
        Ok(resp.texts("printer-name").into_iter().next())
    }

    #[instrument(skip(self, artifact), fields(printer = %printer.name, title = artifact.title()))]
    async fn submit(
        &self,
        artifact: &PrintArtifact,
        printer: &PrinterIdentity,
    ) -> PrintResult<PrintAck> {
        let document = artifact.read().await?;

        let path = Self::printer_path(&printer.name);
        let printer_uri = format!("ipp://{}{}", self.server, path);

        let mut req = IppRequest::new(ipp::PRINT_JOB, self.next_request_id());
        req.attr(ipp::URI, "printer-uri", &printer_uri)
            .attr(ipp::NAME, "requesting-user-name", REQUESTING_USER)
            .attr(ipp::NAME, "job-name", artifact.title())
            .attr(
                ipp::MIME_MEDIA_TYPE,
                "document-format",
                artifact.format().mime_type(),
            );

        let resp = self.send(&path, req.finish(&document)).await?;

        if resp.status == ipp::STATUS_NOT_FOUND {
            return Err(PrintError::PrinterNotFound(printer.name.clone()));
        }
        if !resp.is_success() {
            return Err(PrintError::Rejected(resp.status_message()));
        }

        let job_id = resp.integer("job-id").map(|id| id.to_string());
        info!(job_id = ?job_id, "Job accepted by CUPS");

        Ok(PrintAck {
            backend: BackendKind::Cups,
            printer: printer.name.clone(),
            job_id,
        })
    }
}
