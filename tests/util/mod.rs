//! Shared fixtures for CLI tests.

use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated config location plus a scratch area for tracked directories.
#[allow(dead_code)]
pub struct Sandbox {
    pub tmp: TempDir,
    pub root: PathBuf,
    pub config: PathBuf,
}

#[allow(dead_code)]
impl Sandbox {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("tempdir");
        // Canonical so paths match what the child sees as its cwd.
        let root = tmp.path().canonicalize().expect("canonical tempdir");
        let config = root.join("config").join("gs.toml");
        Self { tmp, root, config }
    }

    /// `gs` with the sandbox config and colors off.
    pub fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = cargo_bin_cmd!("gs");
        cmd.env("GS_CONFIG", &self.config)
            .env("NO_COLOR", "1")
            .env_remove("GS_RSYNC")
            .env_remove("RUST_LOG")
            .current_dir(&self.root);
        cmd
    }

    /// Create a directory under the sandbox root.
    pub fn dir(&self, rel: &str) -> PathBuf {
        let dir = self.root.join(rel);
        fs::create_dir_all(&dir).expect("create dir");
        dir
    }

    /// Write a registry file directly.
    pub fn write_config(&self, port: u16, locals: &[(&str, &Path)]) {
        let mut content = format!(
            "server = \"sync@127.0.0.1\"\nport = \"{port}\"\nremote_path = \"/srv/gs\"\n\
             excludes = [\".git\", \"*.tmp\", \".gs.state\"]\n"
        );
        for (name, path) in locals {
            content.push_str(&format!(
                "\n[[locals]]\nname = \"{name}\"\npath = \"{}\"\n",
                path.display()
            ));
        }
        fs::create_dir_all(self.config.parent().unwrap()).unwrap();
        fs::write(&self.config, content).unwrap();
    }

    pub fn read_config(&self) -> String {
        fs::read_to_string(&self.config).unwrap_or_default()
    }
}

/// A listening socket standing in for the remote SSH port.
#[allow(dead_code)]
pub fn fake_remote() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// A port nothing is listening on.
#[allow(dead_code)]
pub fn closed_port() -> u16 {
    let (listener, port) = fake_remote();
    drop(listener);
    port
}

/// Scripted stand-in for rsync.
///
/// Every invocation appends its arguments to `log`. Dry runs print the
/// contents of `dry_output` and exit with `dry_exit`; real runs print a
/// short transfer list and exit with `real_exit`.
#[cfg(unix)]
#[allow(dead_code)]
pub struct FakeRsync {
    pub program: PathBuf,
    pub log: PathBuf,
}

#[cfg(unix)]
#[allow(dead_code)]
impl FakeRsync {
    pub fn install(dir: &Path, dry_output: &str, dry_exit: i32, real_exit: i32) -> Self {
        use std::os::unix::fs::PermissionsExt;

        let bin = dir.join("bin");
        fs::create_dir_all(&bin).unwrap();
        let program = bin.join("fake-rsync");
        let log = bin.join("rsync.log");
        let dry = bin.join("dry-output.txt");
        fs::write(&dry, dry_output).unwrap();

        let script = format!(
            "#!/bin/sh\n\
             printf '%s\\n' \"$*\" >> '{log}'\n\
             for arg in \"$@\"; do\n\
             \x20 if [ \"$arg\" = \"--dry-run\" ]; then\n\
             \x20   cat '{dry}'\n\
             \x20   exit {dry_exit}\n\
             \x20 fi\n\
             done\n\
             echo 'sending incremental file list'\n\
             exit {real_exit}\n",
            log = log.display(),
            dry = dry.display(),
        );
        fs::write(&program, script).unwrap();
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();

        Self { program, log }
    }

    /// One entry per invocation, in order.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}
