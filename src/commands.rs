//! Command handlers behind the CLI.
//!
//! Each handler loads the registry, resolves the current directory where
//! needed, runs the engine and renders progress with `colored`. Errors are
//! returned to `main`, which prints them on a single line.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, Utc};
use colored::Colorize;

use crate::clock::SystemClock;
use crate::config::{ConfigError, Registry, RemoteEndpoint};
use crate::engine::{AutoPullOptions, Direction, SyncEngine, SyncError, SyncEvent, SyncStatus};
use crate::itemize::{ChangeKind, ChangeRecord};
use crate::probe::{DEFAULT_PROBE_TIMEOUT, Prober, TcpProber};
use crate::state::SyncState;
use crate::transfer::RsyncTransport;

fn current_dir() -> Result<PathBuf> {
    std::env::current_dir().context("failed to get current directory")
}

fn load_registry(config_path: &Path) -> Result<Registry> {
    Ok(Registry::load(config_path)?)
}

fn build_engine<'r>(
    registry: &'r Registry,
    rsync: &Path,
) -> SyncEngine<'r, RsyncTransport, SystemClock> {
    SyncEngine::new(registry, RsyncTransport::new(rsync), SystemClock)
}

fn info(message: impl std::fmt::Display) {
    println!("{} {message}", "~".cyan());
}

fn done(message: impl std::fmt::Display) {
    println!("{} {message}", "✓".green());
}

fn warn(message: impl std::fmt::Display) {
    println!("{} {message}", "!".yellow().bold());
}

fn print_changes(changes: &[ChangeRecord]) {
    for change in changes {
        let line = change.as_str();
        let line = match change.kind() {
            ChangeKind::Sent | ChangeKind::Received => line.normal(),
            ChangeKind::Created => line.green(),
            ChangeKind::Deleted => line.red(),
        };
        println!("  {line}");
    }
}

/// Render an engine event for a human.
fn render_event(event: SyncEvent) {
    match event {
        SyncEvent::CheckingRemote { .. } => info("checking for remote changes..."),
        SyncEvent::UnpulledRemoteChanges { changes, .. } => {
            warn("remote has changes that haven't been pulled:");
            print_changes(&changes);
            println!(
                "  consider running 'gs pull' first; pushing anyway, remote files above may be overwritten"
            );
        }
        SyncEvent::FirstTransferGuard {
            direction, delay, ..
        } => {
            let (side, verb) = match direction {
                Direction::Push => ("on the remote", "push"),
                Direction::Pull => ("locally", "pull"),
            };
            warn(format!(
                "first {verb} uses --delete: files {side} that don't exist on the other side will be removed"
            ));
            println!(
                "  press ctrl+c to abort, or wait {} seconds to continue...",
                delay.as_secs()
            );
        }
        SyncEvent::Transferring { binding, direction } => match direction {
            Direction::Push => info(format!("pushing '{binding}' to remote...")),
            Direction::Pull => info(format!("pulling '{binding}' from remote...")),
        },
        SyncEvent::Transferred {
            binding,
            direction,
            output,
        } => {
            print!("{output}");
            done(format!("{direction} complete for '{binding}'"));
        }
        SyncEvent::WaitingForRemote { address } => info(format!("waiting for {address}...")),
        SyncEvent::RemoteReachable { bindings } => {
            info(format!("remote is reachable, pulling {bindings} directory(s)..."))
        }
        SyncEvent::PullFailed { binding, error } => {
            warn(format!("failed to pull '{binding}': {error}"))
        }
    }
}

fn format_time(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => ts
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => "never".to_string(),
    }
}

/// `gs init`
pub fn init(config_path: &Path, remote: &str) -> Result<()> {
    if config_path.exists() {
        return Err(ConfigError::AlreadyInitialized(config_path.to_path_buf()).into());
    }

    let endpoint = RemoteEndpoint::parse(remote)?;

    print!(
        "{} checking {}:{}... ",
        "~".cyan(),
        endpoint.hostname(),
        endpoint.port
    );
    std::io::stdout().flush()?;
    if !TcpProber.probe(&endpoint, DEFAULT_PROBE_TIMEOUT) {
        println!("{}", "failed".red());
        bail!(
            "cannot reach {} on port {}",
            endpoint.hostname(),
            endpoint.port
        );
    }
    println!("{}", "ok".green());

    let registry = Registry::new(endpoint);
    registry.save(config_path)?;

    done(format!("initialized with remote {}", registry.endpoint()));
    done(format!("config saved to {}", config_path.display()));
    println!("  run 'gs track' in directories you want to sync");
    Ok(())
}

/// `gs track`
pub fn track(config_path: &Path) -> Result<()> {
    let mut registry = load_registry(config_path)?;
    let cwd = current_dir()?;

    let binding = registry.track(&cwd)?.clone();
    registry.save(config_path)?;

    done(format!(
        "tracking '{}' ({}) -> {}",
        binding.name,
        binding.path.display(),
        registry.remote_address_for(&binding)
    ));
    Ok(())
}

/// `gs untrack`
pub fn untrack(config_path: &Path) -> Result<()> {
    let mut registry = load_registry(config_path)?;
    let cwd = current_dir()?;

    let name = match registry.resolve_for_path(&cwd) {
        Some(binding) => binding.name.clone(),
        None => return Err(SyncError::DirectoryNotTracked(cwd).into()),
    };
    registry.remove_binding(&name);
    registry.save(config_path)?;

    done(format!("untracked '{name}'"));
    Ok(())
}

/// `gs list`
pub fn list(config_path: &Path) -> Result<()> {
    let registry = load_registry(config_path)?;

    println!("remote: {}", registry.endpoint().to_string().bold());
    if registry.is_empty() {
        println!("no directories tracked (run 'gs track' in one)");
        return Ok(());
    }

    for binding in registry.bindings() {
        let state = SyncState::load(&binding.path).unwrap_or_else(|e| {
            tracing::warn!(binding = %binding.name, error = %e, "unreadable sync state");
            SyncState::default()
        });
        println!(
            "{} {} -> {}",
            binding.name.bold(),
            binding.path.display(),
            registry.remote_address_for(binding)
        );
        println!(
            "    last push: {}  last pull: {}",
            format_time(state.last_push),
            format_time(state.last_pull)
        );
    }
    Ok(())
}

/// `gs push`
pub fn push(config_path: &Path, rsync: &Path) -> Result<()> {
    let registry = load_registry(config_path)?;
    let engine = build_engine(&registry, rsync);
    let binding = engine.binding_for_path(&current_dir()?)?;

    engine.push(binding, render_event)?;
    Ok(())
}

/// `gs pull`
pub fn pull(config_path: &Path, rsync: &Path) -> Result<()> {
    let registry = load_registry(config_path)?;
    let engine = build_engine(&registry, rsync);
    let binding = engine.binding_for_path(&current_dir()?)?;

    engine.pull(binding, render_event)?;
    Ok(())
}

/// `gs status`
pub fn status(config_path: &Path, rsync: &Path) -> Result<()> {
    let registry = load_registry(config_path)?;
    let engine = build_engine(&registry, rsync);
    let binding = engine.binding_for_path(&current_dir()?)?;

    info(format!("checking status for '{}'...", binding.name));

    match engine.status(binding)? {
        SyncStatus::RemoteUninitialized => {
            warn("remote directory does not exist yet");
            println!("  run 'gs push' to initialize it");
        }
        status @ SyncStatus::Compared { .. } if status.is_in_sync() => {
            done("everything is in sync");
        }
        SyncStatus::Compared {
            local_changes,
            remote_changes,
        } => {
            if !local_changes.is_empty() {
                println!("{}", "local changes (push to sync):".bold());
                print_changes(&local_changes);
            }
            if !remote_changes.is_empty() {
                println!("{}", "remote changes (pull to sync):".bold());
                print_changes(&remote_changes);
            }
        }
    }
    Ok(())
}

/// `gs auto`
pub fn auto(config_path: &Path, rsync: &Path, interval: Duration, timeout: Duration) -> Result<()> {
    let registry = load_registry(config_path)?;
    let engine = build_engine(&registry, rsync);
    let options = AutoPullOptions {
        poll_interval: interval,
        timeout,
    };

    let pulled = engine.auto_pull_all(&TcpProber, options, render_event)?;
    done(format!("auto-pull complete for {pulled} directory(s)"));
    Ok(())
}
