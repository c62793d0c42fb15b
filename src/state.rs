//! Per-directory synchronization state.
//!
//! Each tracked directory carries a small `.gs.state` file recording when it
//! was last pushed and pulled:
//!
//! ```text
//! last_push 2024-05-01T09:30:00Z
//! last_pull 2024-05-01T09:12:44.120Z
//! ```
//!
//! The file lives inside the directory it describes so the record moves
//! with it. Reading is forgiving: unknown keys and malformed timestamps are
//! skipped line by line. Writing goes through a temporary file and a rename
//! so readers never observe a half-written record.
//!
//! There is no locking. Two `gs` processes working on the same directory at
//! once can lose an update.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

/// Name of the state file kept in every tracked directory.
pub const STATE_FILE_NAME: &str = ".gs.state";

const LAST_PUSH_KEY: &str = "last_push";
const LAST_PULL_KEY: &str = "last_pull";

#[derive(Error, Debug)]
pub enum StateError {
    #[error("failed to read sync state {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to save sync state {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Last successful transfer times for one directory.
///
/// `None` means the direction has never completed, which is what arms the
/// first-transfer guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncState {
    pub last_push: Option<DateTime<Utc>>,
    pub last_pull: Option<DateTime<Utc>>,
}

impl SyncState {
    /// Path of the state file for `dir`.
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(STATE_FILE_NAME)
    }

    /// Load the state for `dir`; a missing file is an empty state.
    pub fn load(dir: &Path) -> Result<Self, StateError> {
        let path = Self::path(dir);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no sync state yet");
                return Ok(Self::default());
            }
            Err(source) => return Err(StateError::Read { path, source }),
        };

        Ok(Self::parse(&String::from_utf8_lossy(&bytes)))
    }

    /// Parse state file content, ignoring lines that don't fit.
    pub fn parse(content: &str) -> Self {
        let mut state = Self::default();

        for line in content.lines() {
            let mut fields = line.split_whitespace();
            let (Some(key), Some(value), None) = (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };

            let Ok(timestamp) = DateTime::parse_from_rfc3339(value) else {
                tracing::debug!(line, "skipping malformed state line");
                continue;
            };
            let timestamp = timestamp.with_timezone(&Utc);

            match key {
                LAST_PUSH_KEY => state.last_push = Some(timestamp),
                LAST_PULL_KEY => state.last_pull = Some(timestamp),
                _ => {}
            }
        }

        state
    }

    /// Serialized form. Absent timestamps are omitted.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in [(LAST_PUSH_KEY, self.last_push), (LAST_PULL_KEY, self.last_pull)] {
            if let Some(ts) = value {
                out.push_str(key);
                out.push(' ');
                out.push_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true));
                out.push('\n');
            }
        }
        out
    }

    /// Replace the state file for `dir` via write-then-rename.
    pub fn save(&self, dir: &Path) -> Result<(), StateError> {
        let path = Self::path(dir);
        let write_err = |source| StateError::Write {
            path: path.clone(),
            source,
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(".gs.state.")
            .tempfile_in(dir)
            .map_err(write_err)?;
        tmp.write_all(self.render().as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;

        tracing::debug!(
            path = %path.display(),
            last_push = ?self.last_push,
            last_pull = ?self.last_pull,
            "saved sync state"
        );
        Ok(())
    }
}
