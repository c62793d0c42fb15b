//! rsync invocation and outcome classification.
//!
//! Every transfer is a single `rsync -avz` run over SSH with key-only,
//! non-interactive authentication. The caller decides direction, dry-run and
//! deletion; this module only builds the command line, runs it and sorts the
//! exit status into a [`TransferOutcome`].
//!
//! # Safety
//!
//! `--delete` is passed exactly when [`TransferRequest::allow_delete`] is
//! set. Guarding first transfers is the orchestrator's job.

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::time::Instant;

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::itemize::{ChangeRecord, parse_itemized_changes};

/// SSH options forcing public-key, non-interactive authentication.
const SSH_OPTIONS: &str = "-o PasswordAuthentication=no -o BatchMode=yes";

/// rsync exit code for an SSH/transport level failure.
const EXIT_TRANSPORT: i32 = 255;

/// rsync exit code for a partial transfer due to errors.
const EXIT_PARTIAL: i32 = 23;

/// Marker rsync prints when the source or destination directory is missing.
const MISSING_PATH_MARKER: &str = "No such file or directory";

/// Errors surfaced by a transfer.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("transfer engine '{program}' not found: {source}")]
    EngineMissing {
        program: PathBuf,
        source: which::Error,
    },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write exclude file: {0}")]
    ExcludeFile(#[source] std::io::Error),

    #[error("ssh connection failed (check public key authentication): {}", .output.trim())]
    TransportFailure { output: String },

    #[error("remote directory does not exist")]
    RemoteNotFound { output: String },

    #[error("rsync failed ({}): {}", exit_label(.code), .output.trim())]
    TransferFailure { code: Option<i32>, output: String },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// Parameters of one transfer.
#[derive(Debug, Clone)]
pub struct TransferRequest<'a> {
    /// Local path or `host:path` remote address.
    pub source: String,
    /// Local path or `host:path` remote address.
    pub destination: String,
    /// SSH port.
    pub port: &'a str,
    /// Patterns written to an `--exclude-from` file.
    pub excludes: &'a [String],
    /// Report what would change without changing anything.
    pub dry_run: bool,
    /// Delete destination files missing from the source.
    pub allow_delete: bool,
}

impl<'a> TransferRequest<'a> {
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        port: &'a str,
        excludes: &'a [String],
    ) -> Self {
        Self {
            source: with_trailing_slash(source.into()),
            destination: with_trailing_slash(destination.into()),
            port,
            excludes,
            dry_run: false,
            allow_delete: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn allow_delete(mut self, allow_delete: bool) -> Self {
        self.allow_delete = allow_delete;
        self
    }

    /// Value for rsync's `-e` option.
    pub fn ssh_command(&self) -> String {
        format!("ssh -p {} {SSH_OPTIONS}", self.port)
    }

    /// Full rsync argument list. `exclude_file` is the `--exclude-from` path.
    pub fn args(&self, exclude_file: Option<&std::path::Path>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-avz".into(), "-e".into(), self.ssh_command().into()];

        if self.dry_run {
            args.push("--dry-run".into());
            args.push("--itemize-changes".into());
        }
        if self.allow_delete {
            args.push("--delete".into());
        }
        if let Some(path) = exclude_file {
            let mut arg = OsString::from("--exclude-from=");
            arg.push(path);
            args.push(arg);
        }

        args.push(self.source.clone().into());
        args.push(self.destination.clone().into());
        args
    }
}

/// Copy directory contents rather than the directory itself.
fn with_trailing_slash(mut path: String) -> String {
    if !path.ends_with('/') {
        path.push('/');
    }
    path
}

/// Classified result of a transfer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Exit 0. `changes` is set for dry runs.
    Success {
        output: String,
        changes: Option<Vec<ChangeRecord>>,
    },
    /// Exit 255: SSH could not connect or authenticate.
    TransportFailure { output: String },
    /// Exit 23 with a missing-path message: the remote side was never created.
    RemoteNotFound { output: String },
    /// Anything else.
    TransferFailure { code: Option<i32>, output: String },
}

impl TransferOutcome {
    /// Sort an exit status and the combined output into an outcome.
    pub fn classify(code: Option<i32>, output: String, dry_run: bool) -> Self {
        match code {
            Some(0) => {
                let changes = dry_run.then(|| parse_itemized_changes(&output));
                Self::Success { output, changes }
            }
            Some(EXIT_TRANSPORT) => Self::TransportFailure { output },
            Some(EXIT_PARTIAL) if output.contains(MISSING_PATH_MARKER) => {
                Self::RemoteNotFound { output }
            }
            code => Self::TransferFailure { code, output },
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::TransportFailure { .. } => "transport_failure",
            Self::RemoteNotFound { .. } => "remote_not_found",
            Self::TransferFailure { .. } => "transfer_failure",
        }
    }

    /// Turn non-success outcomes into errors.
    pub fn into_result(self) -> Result<TransferReport, TransferError> {
        match self {
            Self::Success { output, changes } => Ok(TransferReport { output, changes }),
            Self::TransportFailure { output } => Err(TransferError::TransportFailure { output }),
            Self::RemoteNotFound { output } => Err(TransferError::RemoteNotFound { output }),
            Self::TransferFailure { code, output } => {
                Err(TransferError::TransferFailure { code, output })
            }
        }
    }
}

/// A successful transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Engine output, stdout then stderr.
    pub output: String,
    /// Pending changes, for dry runs.
    pub changes: Option<Vec<ChangeRecord>>,
}

impl TransferReport {
    /// Changes reported by a dry run; empty for real transfers.
    pub fn changes(&self) -> &[ChangeRecord] {
        self.changes.as_deref().unwrap_or_default()
    }
}

/// Runs transfers. Implemented by [`RsyncTransport`]; tests substitute fakes.
pub trait Transport {
    fn transfer(&self, request: &TransferRequest<'_>) -> Result<TransferOutcome, TransferError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn transfer(&self, request: &TransferRequest<'_>) -> Result<TransferOutcome, TransferError> {
        (**self).transfer(request)
    }
}

/// Transport backed by the `rsync` binary.
#[derive(Debug, Clone)]
pub struct RsyncTransport {
    program: PathBuf,
}

impl RsyncTransport {
    /// Use `program`, either a path or a name looked up on `PATH`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Transport for RsyncTransport {
    fn transfer(&self, request: &TransferRequest<'_>) -> Result<TransferOutcome, TransferError> {
        let program = which::which(&self.program).map_err(|source| {
            TransferError::EngineMissing {
                program: self.program.clone(),
                source,
            }
        })?;

        // Removed on drop, whichever way this function returns.
        let exclude_file = if request.excludes.is_empty() {
            None
        } else {
            Some(write_exclude_file(request.excludes).map_err(TransferError::ExcludeFile)?)
        };

        let args = request.args(exclude_file.as_ref().map(NamedTempFile::path));

        tracing::debug!(
            program = %program.display(),
            source = %request.source,
            destination = %request.destination,
            dry_run = request.dry_run,
            delete = request.allow_delete,
            "starting rsync"
        );

        let start = Instant::now();
        let output = Command::new(&program)
            .args(&args)
            .output()
            .map_err(|source| TransferError::Spawn {
                program: program.clone(),
                source,
            })?;
        let duration_ms = start.elapsed().as_millis() as u64;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        let outcome = TransferOutcome::classify(output.status.code(), combined, request.dry_run);
        match &outcome {
            TransferOutcome::Success { .. } => {
                tracing::info!(
                    source = %request.source,
                    destination = %request.destination,
                    dry_run = request.dry_run,
                    duration_ms,
                    "rsync completed"
                );
            }
            other => {
                tracing::warn!(
                    source = %request.source,
                    destination = %request.destination,
                    code = ?output.status.code(),
                    outcome = other.label(),
                    duration_ms,
                    "rsync failed"
                );
            }
        }

        Ok(outcome)
    }
}

/// Write one pattern per line into a fresh temporary file.
fn write_exclude_file(excludes: &[String]) -> std::io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new().prefix("gs-excludes-").tempfile()?;
    for pattern in excludes {
        writeln!(file, "{pattern}")?;
    }
    file.flush()?;
    Ok(file)
}
