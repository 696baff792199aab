//! External print program backend
//!
//! Runs a print-capable viewer (SumatraPDF on Windows, `lp` elsewhere) with
//! explicit "print silently to this printer" arguments. Every template token
//! becomes exactly one argument; nothing passes through a shell.

use super::{BackendKind, PrintAck, PrintBackend};
use crate::artifact::{ArtifactFormat, PrintArtifact};
use crate::error::{PrintError, PrintResult};
use crate::registry::PrinterIdentity;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

pub(crate) fn default_program() -> &'static str {
    if cfg!(windows) { "SumatraPDF.exe" } else { "lp" }
}

pub(crate) fn default_args() -> Vec<String> {
    let template = if cfg!(windows) {
        "-print-to {printer} -silent {file}"
    } else {
        "-d {printer} -t {title} {file}"
    };
    template.split_whitespace().map(str::to_string).collect()
}

/// Prints by spawning an external program
pub struct ExternalBackend {
    program: PathBuf,
    args: Vec<String>,
    /// Lists printers on behalf of the program
    enumerator: Arc<dyn PrintBackend>,
}

impl std::fmt::Debug for ExternalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalBackend")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("enumerator", &self.enumerator.kind())
            .finish()
    }
}

impl ExternalBackend {
    /// Locate `program` and keep the argument template.
    ///
    /// A program that cannot be found is a permanent
    /// [`PrintError::BackendUnavailable`].
    pub fn new(
        program: &str,
        args: Vec<String>,
        enumerator: Arc<dyn PrintBackend>,
    ) -> PrintResult<Self> {
        let program = find_program(program).ok_or_else(|| {
            PrintError::BackendUnavailable(format!("print program '{program}' not found"))
        })?;
        if !args.iter().any(|a| a.contains("{file}")) {
            warn!(?args, "Print argument template has no {{file}} token");
        }
        Ok(Self {
            program,
            args,
            enumerator,
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Argument list for one job
    pub fn command_args(&self, file: &Path, printer: &str, title: &str) -> Vec<String> {
        let file = file.to_string_lossy();
        let values = [("{printer}", printer), ("{file}", &*file), ("{title}", title)];
        self.args
            .iter()
            .map(|token| substitute(token, &values))
            .collect()
    }
}

/// Replace placeholders in one pass over the template token, so
/// substituted text is never scanned again
fn substitute(token: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(token.len());
    let mut rest = token;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match values.iter().find(|(key, _)| tail.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Resolve a program name against PATH. Paths with a directory part are
/// checked as given.
fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .flat_map(|dir| {
            let plain = dir.join(program);
            let exe = dir.join(format!("{program}.exe"));
            [plain, exe]
        })
        .find(|p| p.is_file())
}

#[async_trait]
impl PrintBackend for ExternalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::External
    }

    fn supports(&self, _format: ArtifactFormat) -> bool {
        true
    }

    fn preferred_format(&self) -> ArtifactFormat {
        ArtifactFormat::Document
    }

    async fn list_printers(&self) -> PrintResult<Vec<String>> {
        self.enumerator.list_printers().await
    }

    async fn default_printer(&self) -> PrintResult<Option<String>> {
        self.enumerator.default_printer().await
    }

    #[instrument(skip(self, artifact), fields(program = %self.program.display(), printer = %printer.name))]
    async fn submit(
        &self,
        artifact: &PrintArtifact,
        printer: &PrinterIdentity,
    ) -> PrintResult<PrintAck> {
        artifact.ensure_readable()?;

        // Viewers resolve relative paths against their own cwd
        let file = std::path::absolute(artifact.path())?;
        let args = self.command_args(&file, &printer.name, artifact.title());
        debug!(?args, "Spawning print program");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    PrintError::BackendUnavailable(format!("{}: {}", self.program.display(), e))
                }
                _ => PrintError::Io(e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            warn!(code = ?output.status.code(), %stdout, %stderr, "Print program failed");
            return Err(PrintError::Subprocess {
                code: output.status.code(),
                stderr,
            });
        }

        info!(%stdout, "Print program finished");
        Ok(PrintAck {
            backend: BackendKind::External,
            printer: printer.name.clone(),
            job_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PrinterSource;

    struct NoPrinters;

    #[async_trait]
    impl PrintBackend for NoPrinters {
        fn kind(&self) -> BackendKind {
            BackendKind::Cups
        }
        fn supports(&self, _format: ArtifactFormat) -> bool {
            false
        }
        fn preferred_format(&self) -> ArtifactFormat {
            ArtifactFormat::Bitmap
        }
        async fn list_printers(&self) -> PrintResult<Vec<String>> {
            Ok(vec!["Office".into()])
        }
        async fn default_printer(&self) -> PrintResult<Option<String>> {
            Ok(None)
        }
        async fn submit(&self, _: &PrintArtifact, _: &PrinterIdentity) -> PrintResult<PrintAck> {
            Err(PrintError::BackendUnavailable("enumeration only".into()))
        }
    }

    fn identity(name: &str) -> PrinterIdentity {
        PrinterIdentity {
            name: name.to_string(),
            source: PrinterSource::Configured,
            requested: None,
        }
    }

    fn artifact(dir: &Path) -> PrintArtifact {
        let mut file = tempfile::NamedTempFile::new_in(dir).unwrap();
        std::io::Write::write_all(&mut file, b"%PDF-1.4").unwrap();
        PrintArtifact::new(
            file.into_temp_path(),
            ArtifactFormat::Document,
            None,
            "John Doe".into(),
            (52.0, 60.0),
        )
    }

    #[cfg(unix)]
    fn backend(program: &str, args: &[&str]) -> ExternalBackend {
        ExternalBackend::new(
            program,
            args.iter().map(|s| s.to_string()).collect(),
            Arc::new(NoPrinters),
        )
        .unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_tokens_are_not_split() {
        let b = backend("sh", &["-d", "{printer}", "-t", "{title}", "{file}"]);
        let args = b.command_args(
            Path::new("/tmp/label one.pdf"),
            "DYMO LabelWriter 450; rm -rf /",
            "John Doe",
        );
        assert_eq!(
            args,
            vec![
                "-d",
                "DYMO LabelWriter 450; rm -rf /",
                "-t",
                "John Doe",
                "/tmp/label one.pdf"
            ]
        );
    }

    #[test]
    fn test_substituted_values_are_not_rescanned() {
        let values = [
            ("{printer}", "Queue {file}"),
            ("{file}", "/tmp/label.pdf"),
            ("{title}", "{printer} party"),
        ];
        assert_eq!(substitute("{printer}", &values), "Queue {file}");
        assert_eq!(substitute("{title}", &values), "{printer} party");
        assert_eq!(
            substitute("--file={file}:{title}", &values),
            "--file=/tmp/label.pdf:{printer} party"
        );
        assert_eq!(substitute("{unknown}{", &values), "{unknown}{");
    }

    #[test]
    fn test_missing_program_is_unavailable() {
        let err = ExternalBackend::new(
            "definitely-not-a-print-program",
            default_args(),
            Arc::new(NoPrinters),
        )
        .unwrap_err();
        assert!(matches!(err, PrintError::BackendUnavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend("sh", &["-c", "echo jammed >&2; exit 3", "{file}"]);
        let err = b
            .submit(&artifact(dir.path()), &identity("Office"))
            .await
            .unwrap_err();
        match err {
            PrintError::Subprocess { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "jammed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_receives_file_argument() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend("sh", &["-c", "test -s \"$0\"", "{file}"]);
        let ack = b
            .submit(&artifact(dir.path()), &identity("Office"))
            .await
            .unwrap();
        assert_eq!(ack.backend, BackendKind::External);
        assert_eq!(ack.printer, "Office");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_enumeration_is_delegated() {
        let b = backend("sh", &["{file}"]);
        assert_eq!(b.list_printers().await.unwrap(), vec!["Office"]);
        assert_eq!(b.default_printer().await.unwrap(), None);
    }
}
