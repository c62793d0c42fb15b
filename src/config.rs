//! Directory mapping registry.
//!
//! The registry binds local directories to subdirectories of a single remote
//! base path and carries the connection parameters shared by every binding.
//! It is persisted as TOML in `~/.config/gs/gs.toml`:
//!
//! ```toml
//! server = "sync@files.example.org"
//! port = "22"
//! remote_path = "/srv/gs"
//! excludes = [".git", "*.tmp", ".gs.state"]
//!
//! [[locals]]
//! name = "notes"
//! path = "~/notes"
//! ```
//!
//! # Invariants
//!
//! - No two bindings share a `name` (the name is the remote subdirectory).
//! - No binding path equals, contains, or is contained in another binding
//!   path. Containment is checked per path component, so `/a/notes` and
//!   `/a/notesbutnotreally` are unrelated.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::STATE_FILE_NAME;

/// Name of the registry file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "gs.toml";

/// Errors raised by the registry and its persistence.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no configuration found at {0} (run 'gs init' first)")]
    Missing(PathBuf),

    #[error("configuration already exists at {0}")]
    AlreadyInitialized(PathBuf),

    #[error("invalid remote '{0}', expected 'user@host:port:/path'")]
    InvalidRemote(String),

    #[error(
        "a directory named '{0}' is already tracked (names must be unique across tracked directories)"
    )]
    DuplicateName(String),

    #[error("path {path} overlaps tracked directory '{existing}'")]
    PathConflict { path: PathBuf, existing: String },

    #[error("cannot track {0}: path has no final component")]
    UntrackablePath(PathBuf),

    #[error("failed to read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write configuration {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// The single remote every binding syncs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    /// Host, optionally prefixed by the login principal (`user@host`).
    pub host: String,
    /// SSH port, kept as text because it is handed to ssh verbatim.
    pub port: String,
    /// Base directory on the remote; never ends with `/`.
    pub base_path: String,
}

impl RemoteEndpoint {
    /// Parse `user@host:port:/path`.
    ///
    /// Splits on the first two colons, so the path part may itself contain
    /// colons. A trailing slash on the path is dropped.
    pub fn parse(remote: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidRemote(remote.to_string());

        let mut parts = remote.splitn(3, ':');
        let (Some(host), Some(port), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        if host.is_empty() || port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            port: port.to_string(),
            base_path: path.strip_suffix('/').unwrap_or(path).to_string(),
        })
    }

    /// Host with any `principal@` prefix removed, suitable for DNS lookup.
    pub fn hostname(&self) -> &str {
        match self.host.rsplit_once('@') {
            Some((_, host)) => host,
            None => &self.host,
        }
    }
}

impl std::fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.base_path)
    }
}

/// A tracked local directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalBinding {
    /// Unique name; also the remote subdirectory under the base path.
    pub name: String,
    /// Absolute local directory.
    pub path: PathBuf,
}

/// Exclusion patterns written into every new registry.
pub fn default_excludes() -> Vec<String> {
    vec![
        ".git".to_string(),
        "*.tmp".to_string(),
        STATE_FILE_NAME.to_string(),
    ]
}

/// On-disk shape of the registry.
#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    server: String,
    port: String,
    remote_path: String,
    #[serde(default)]
    excludes: Vec<String>,
    #[serde(default)]
    locals: Vec<LocalBinding>,
}

/// Owned set of bindings plus the shared remote parameters.
///
/// Bindings can only be changed through [`Registry::add_binding`],
/// [`Registry::track`] and [`Registry::remove_binding`], which keep the
/// uniqueness and non-overlap invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    endpoint: RemoteEndpoint,
    excludes: Vec<String>,
    bindings: Vec<LocalBinding>,
}

impl Registry {
    /// Create an empty registry seeded with the default excludes.
    pub fn new(endpoint: RemoteEndpoint) -> Self {
        Self {
            endpoint,
            excludes: default_excludes(),
            bindings: Vec::new(),
        }
    }

    /// Replace the exclusion patterns.
    pub fn endpoint(&self) -> &RemoteEndpoint {
        &self.endpoint
    }

    pub fn excludes(&self) -> &[String] {
        &self.excludes
    }

    /// Bindings in registry order.
    pub fn bindings(&self) -> impl ExactSizeIterator<Item = &LocalBinding> {
        self.bindings.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Add a binding after checking name uniqueness and path overlap.
    ///
    /// The path is not required to exist.
    pub fn add_binding(
        &mut self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<&LocalBinding, ConfigError> {
        let name = name.into();
        let path = path.into();

        if self.resolve_by_name(&name).is_some() {
            return Err(ConfigError::DuplicateName(name));
        }
        if let Some(existing) = self
            .bindings
            .iter()
            .find(|b| path.starts_with(&b.path) || b.path.starts_with(&path))
        {
            return Err(ConfigError::PathConflict {
                path,
                existing: existing.name.clone(),
            });
        }

        self.bindings.push(LocalBinding { name, path });
        Ok(&self.bindings[self.bindings.len() - 1])
    }

    /// Bind `dir` under its final path component.
    pub fn track(&mut self, dir: &Path) -> Result<&LocalBinding, ConfigError> {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ConfigError::UntrackablePath(dir.to_path_buf()))?;
        self.add_binding(name, dir)
    }

    /// Remove the binding called `name`. Returns it if it existed.
    pub fn remove_binding(&mut self, name: &str) -> Option<LocalBinding> {
        let index = self.bindings.iter().position(|b| b.name == name)?;
        Some(self.bindings.remove(index))
    }

    /// Binding whose directory is `path` or one of its ancestors.
    pub fn resolve_for_path(&self, path: &Path) -> Option<&LocalBinding> {
        let path = expand_path(path);
        self.bindings.iter().find(|b| path.starts_with(&b.path))
    }

    pub fn resolve_by_name(&self, name: &str) -> Option<&LocalBinding> {
        self.bindings.iter().find(|b| b.name == name)
    }

    /// Remote-side argument for a binding: `host:base_path/name`.
    pub fn remote_address_for(&self, binding: &LocalBinding) -> String {
        format!(
            "{}:{}/{}",
            self.endpoint.host, self.endpoint.base_path, binding.name
        )
    }

    /// Default registry location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gs")
            .join(CONFIG_FILE_NAME)
    }

    /// Load the registry, expanding `~/` in binding paths.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::Missing(path.to_path_buf()));
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let file: RegistryFile = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!(path = %path.display(), locals = file.locals.len(), "loaded registry");

        Ok(Self {
            endpoint: RemoteEndpoint {
                host: file.server,
                port: file.port,
                base_path: file.remote_path,
            },
            excludes: file.excludes,
            bindings: file
                .locals
                .into_iter()
                .map(|b| LocalBinding {
                    path: expand_path(&b.path),
                    name: b.name,
                })
                .collect(),
        })
    }

    /// Write the registry atomically, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        let file = RegistryFile {
            server: self.endpoint.host.clone(),
            port: self.endpoint.port.clone(),
            remote_path: self.endpoint.base_path.clone(),
            excludes: self.excludes.clone(),
            locals: self.bindings.clone(),
        };
        let content = toml::to_string_pretty(&file)?;

        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(write_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
        tmp.write_all(content.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;

        tracing::debug!(path = %path.display(), locals = self.bindings.len(), "saved registry");
        Ok(())
    }
}

/// Expand a leading `~/` against the current user's home directory.
pub fn expand_path(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) if path.to_string_lossy().starts_with("~/") => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn endpoint() -> RemoteEndpoint {
        RemoteEndpoint {
            host: "user@host".into(),
            port: "22".into(),
            base_path: "/srv/sync".into(),
        }
    }

    fn registry_with(bindings: &[(&str, &str)]) -> Registry {
        let mut registry = Registry::new(endpoint());
        for (name, path) in bindings {
            registry.add_binding(*name, *path).unwrap();
        }
        registry
    }

    #[test]
    fn test_parse_remote() {
        let cases = [
            ("user@host:22:/path/to/sync", "user@host", "22", "/path/to/sync"),
            ("root@192.168.1.1:2222:/data", "root@192.168.1.1", "2222", "/data"),
            ("sync@s.example.org:45454:/gs/", "sync@s.example.org", "45454", "/gs"),
            ("host:22:/odd:path", "host", "22", "/odd:path"),
        ];
        for (input, host, port, path) in cases {
            let ep = RemoteEndpoint::parse(input).unwrap();
            assert_eq!(ep.host, host, "{input}");
            assert_eq!(ep.port, port, "{input}");
            assert_eq!(ep.base_path, path, "{input}");
        }
    }

    #[test]
    fn test_parse_remote_rejects_malformed() {
        for input in ["user@host:/path", "user@host", "", ":22:/x", "h::/x", "h:ssh:/x"] {
            assert!(
                matches!(RemoteEndpoint::parse(input), Err(ConfigError::InvalidRemote(_))),
                "expected {input:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_hostname_strips_principal() {
        assert_eq!(endpoint().hostname(), "host");
        let ep = RemoteEndpoint::parse("files.local:22:/x").unwrap();
        assert_eq!(ep.hostname(), "files.local");
    }

    #[test]
    fn test_expand_path() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_path(Path::new("~/documents")), home.join("documents"));
        assert_eq!(expand_path(Path::new("/absolute/path")), PathBuf::from("/absolute/path"));
        assert_eq!(expand_path(Path::new("relative/path")), PathBuf::from("relative/path"));
        assert_eq!(expand_path(Path::new("~notexpanded")), PathBuf::from("~notexpanded"));
    }

    #[test]
    fn test_remote_address_for() {
        let registry = registry_with(&[("notes", "/home/user/notes"), ("projects", "/home/user/projects")]);
        let notes = registry.resolve_by_name("notes").unwrap();
        let projects = registry.resolve_by_name("projects").unwrap();
        assert_eq!(registry.remote_address_for(notes), "user@host:/srv/sync/notes");
        assert_eq!(registry.remote_address_for(projects), "user@host:/srv/sync/projects");
    }

    #[test]
    fn test_resolve_for_path() {
        let registry = registry_with(&[("notes", "/home/user/notes"), ("projects", "/home/user/projects")]);
        let cases = [
            ("/home/user/notes", Some("notes")),
            ("/home/user/notes/subdir", Some("notes")),
            ("/home/user/notes/deep/nested/path", Some("notes")),
            ("/home/user/projects", Some("projects")),
            ("/home/user/other", None),
            ("/home/user/notesbutnotreally", None),
            ("/other/path", None),
        ];
        for (path, want) in cases {
            let got = registry.resolve_for_path(Path::new(path)).map(|b| b.name.as_str());
            assert_eq!(got, want, "resolve_for_path({path})");
        }
    }

    #[test]
    fn test_resolve_by_name() {
        let registry = registry_with(&[("notes", "/home/user/notes")]);
        assert_eq!(
            registry.resolve_by_name("notes").map(|b| b.path.clone()),
            Some(PathBuf::from("/home/user/notes"))
        );
        assert!(registry.resolve_by_name("nonexistent").is_none());
    }

    #[test]
    fn test_add_binding_rejects_duplicate_name() {
        let mut registry = registry_with(&[("notes", "/home/user/notes")]);
        let err = registry.add_binding("notes", "/home/user/other").unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName(name) if name == "notes"));
    }

    #[test]
    fn test_add_binding_rejects_overlapping_paths() {
        let mut registry = registry_with(&[("notes", "/home/user/notes")]);
        for path in ["/home/user/notes", "/home/user/notes/subdir", "/home/user"] {
            let err = registry.add_binding("other", path).unwrap_err();
            assert!(
                matches!(err, ConfigError::PathConflict { ref existing, .. } if existing == "notes"),
                "{path}: {err}"
            );
        }
        registry.add_binding("sibling", "/home/user/notesbutnotreally").unwrap();
        assert_eq!(registry.bindings().len(), 2);
    }

    #[test]
    fn test_track_uses_directory_name() {
        let mut registry = Registry::new(endpoint());
        let binding = registry.track(Path::new("/home/u/notes")).unwrap();
        assert_eq!(binding.name, "notes");
        assert_eq!(binding.path, PathBuf::from("/home/u/notes"));

        let err = registry.track(Path::new("/home/u/notes")).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName(_)));

        let err = registry.track(Path::new("/")).unwrap_err();
        assert!(matches!(err, ConfigError::UntrackablePath(_)));
    }

    #[test]
    fn test_remove_binding() {
        let mut registry = registry_with(&[("notes", "/home/user/notes"), ("projects", "/home/user/projects")]);
        assert!(registry.remove_binding("nonexistent").is_none());
        assert_eq!(registry.bindings().len(), 2);

        let removed = registry.remove_binding("notes").unwrap();
        assert_eq!(removed.name, "notes");
        let names: Vec<_> = registry.bindings().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["projects"]);

        registry.remove_binding("projects");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join(CONFIG_FILE_NAME);
        let registry = registry_with(&[("notes", "/home/user/notes"), ("projects", "/home/user/projects")]);

        registry.save(&path).unwrap();
        let loaded = Registry::load(&path).unwrap();
        assert_eq!(loaded, registry);
        assert_eq!(loaded.excludes(), [".git", "*.tmp", ".gs.state"]);
    }

    #[test]
    fn test_load_expands_home() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"
server = "sync@files.example.org"
port = "22"
remote_path = "/srv/gs"
excludes = [".git"]

[[locals]]
name = "notes"
path = "~/notes"
"#,
        )
        .unwrap();

        let registry = Registry::load(&path).unwrap();
        let notes = registry.resolve_by_name("notes").unwrap();
        assert_eq!(notes.path, dirs::home_dir().unwrap().join("notes"));
        assert_eq!(registry.endpoint().hostname(), "files.example.org");
    }

    #[test]
    fn test_load_missing_and_malformed() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        assert!(matches!(Registry::load(&path), Err(ConfigError::Missing(_))));

        std::fs::write(&path, "server = ").unwrap();
        assert!(matches!(Registry::load(&path), Err(ConfigError::Parse { .. })));
    }

    proptest! {
        #[test]
        fn prop_descendants_always_conflict(
            base in "[a-z]{1,8}",
            tail in proptest::collection::vec("[a-z]{1,8}", 0..4),
        ) {
            let root = PathBuf::from("/home").join(&base);
            let mut registry = Registry::new(endpoint());
            registry.add_binding(base.clone(), root.clone()).unwrap();

            let mut candidate = root;
            for part in &tail {
                candidate.push(part);
            }
            let result = registry.add_binding(format!("{base}-other"), candidate);
            let is_conflict = matches!(result, Err(ConfigError::PathConflict { .. }));
            prop_assert!(is_conflict);
        }

        #[test]
        fn prop_same_name_always_duplicate(name in "[a-z]{1,8}", a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
            let mut registry = Registry::new(endpoint());
            registry.add_binding(name.clone(), PathBuf::from("/x").join(&a)).unwrap();
            let result = registry.add_binding(name, PathBuf::from("/y").join(&b));
            let is_duplicate = matches!(result, Err(ConfigError::DuplicateName(_)));
            prop_assert!(is_duplicate);
        }

        #[test]
        fn prop_remote_address_only_varies_in_last_segment(a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
            let registry = Registry::new(endpoint());
            let first = LocalBinding { name: a.clone(), path: PathBuf::from("/p") };
            let second = LocalBinding { name: b.clone(), path: PathBuf::from("/p") };

            prop_assert_eq!(registry.remote_address_for(&first), registry.remote_address_for(&first));
            let addr_a = registry.remote_address_for(&first);
            let addr_b = registry.remote_address_for(&second);
            let prefix_a = addr_a.strip_suffix(a.as_str()).unwrap();
            let prefix_b = addr_b.strip_suffix(b.as_str()).unwrap();
            prop_assert_eq!(prefix_a, prefix_b);
        }
    }
}
