//! Interpretation of rsync `--itemize-changes` output.
//!
//! An itemized line starts with an 11-character code followed by a space and
//! the file name, e.g. `>f.st...... notes/todo.md` or `*deleting   old.md`.
//! The first character tells what kind of update it is; only file-level
//! updates are kept. Summary lines (`sending incremental file list`,
//! `sent 1,234 bytes ...`) and attribute-only lines (`.d..t......`) are
//! dropped.

use std::fmt;

/// Width of the itemize code plus the separating space.
const ITEMIZE_PREFIX_WIDTH: usize = 12;

/// Category of a change, from the first itemize character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// `<`: file is sent to the remote.
    Sent,
    /// `>`: file is received from the remote.
    Received,
    /// `c`: local change or creation (directories, symlinks).
    Created,
    /// `*`: message such as `*deleting`.
    Deleted,
}

impl ChangeKind {
    fn from_code(code: char) -> Option<Self> {
        match code {
            '<' => Some(Self::Sent),
            '>' => Some(Self::Received),
            'c' => Some(Self::Created),
            '*' => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// One itemized change line, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    line: String,
    kind: ChangeKind,
}

impl ChangeRecord {
    /// Interpret a single trimmed line.
    pub fn from_line(line: &str) -> Option<Self> {
        if line.len() < ITEMIZE_PREFIX_WIDTH {
            return None;
        }
        let kind = ChangeKind::from_code(line.chars().next()?)?;
        Some(Self {
            line: line.to_string(),
            kind,
        })
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.line
    }
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

/// Extract file-level changes from dry-run output, in emission order.
pub fn parse_itemized_changes(output: &str) -> Vec<ChangeRecord> {
    output
        .lines()
        .map(str::trim)
        .filter_map(ChangeRecord::from_line)
        .collect()
}
