//! Sync orchestration: push, pull, status and unattended pull-all.
//!
//! The engine ties the registry, the per-directory state, the prober and the
//! transport together. It decides transfer parameters, applies the
//! first-transfer guard and stamps state only after a transfer succeeded.
//!
//! # First-transfer guard
//!
//! Real pushes and pulls always run with `--delete`, which is the only
//! irreversible thing `gs` does. The first time a directory is pushed (or
//! pulled) the two sides have never been reconciled, so the engine emits a
//! [`SyncEvent::FirstTransferGuard`] and sleeps for a grace period before
//! starting. The sleep can only be interrupted by killing the process.
//!
//! # Example
//!
//! ```rust,ignore
//! use gs::clock::SystemClock;
//! use gs::engine::SyncEngine;
//! use gs::transfer::RsyncTransport;
//!
//! let engine = SyncEngine::new(&registry, RsyncTransport::new("rsync"), SystemClock);
//! let binding = engine.binding_for_path(&std::env::current_dir()?)?;
//! engine.push(binding, |event| println!("{event:?}"))?;
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::clock::Clock;
use crate::config::{ConfigError, LocalBinding, Registry};
use crate::itemize::ChangeRecord;
use crate::probe::{ProbeError, Prober, wait_until_reachable};
use crate::state::{StateError, SyncState};
use crate::transfer::{TransferError, TransferOutcome, TransferReport, TransferRequest, Transport};

/// Grace period before the first push of a directory.
pub const PUSH_GUARD_DELAY: Duration = Duration::from_secs(5);

/// Grace period before the first pull of a directory.
pub const PULL_GUARD_DELAY: Duration = Duration::from_secs(3);

/// Default pause between reachability probes in [`SyncEngine::auto_pull_all`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default overall wait for the remote in [`SyncEngine::auto_pull_all`].
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{} is not a tracked directory (run 'gs track' first)", .0.display())]
    DirectoryNotTracked(PathBuf),

    #[error("no directories are tracked")]
    NoBindings,

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("failed to pull: {}", .failed.join(", "))]
    PullFailed { failed: Vec<String> },
}

/// Which way data flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local to remote.
    Push,
    /// Remote to local.
    Pull,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Pull => write!(f, "pull"),
        }
    }
}

/// Progress notifications for the caller to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Looking for remote changes before a push.
    CheckingRemote { binding: String },
    /// The remote has changes that were never pulled. Advisory only.
    UnpulledRemoteChanges {
        binding: String,
        changes: Vec<ChangeRecord>,
    },
    /// About to sleep before a first, deleting transfer.
    FirstTransferGuard {
        binding: String,
        direction: Direction,
        delay: Duration,
    },
    /// A real transfer is starting.
    Transferring {
        binding: String,
        direction: Direction,
    },
    /// A real transfer finished.
    Transferred {
        binding: String,
        direction: Direction,
        output: String,
    },
    /// Blocking until the remote accepts connections.
    WaitingForRemote { address: String },
    /// The remote answered; pulls are about to start.
    RemoteReachable { bindings: usize },
    /// One binding failed during pull-all; the rest continue.
    PullFailed { binding: String, error: String },
}

/// Outcome of [`SyncEngine::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// The remote directory does not exist; a push will create it.
    RemoteUninitialized,
    /// Pending changes in each direction.
    Compared {
        /// What a push would change on the remote.
        local_changes: Vec<ChangeRecord>,
        /// What a pull would change locally.
        remote_changes: Vec<ChangeRecord>,
    },
}

impl SyncStatus {
    pub fn is_in_sync(&self) -> bool {
        match self {
            Self::RemoteUninitialized => false,
            Self::Compared {
                local_changes,
                remote_changes,
            } => local_changes.is_empty() && remote_changes.is_empty(),
        }
    }
}

/// Polling parameters for [`SyncEngine::auto_pull_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoPullOptions {
    pub poll_interval: Duration,
    /// Zero waits forever.
    pub timeout: Duration,
}

impl Default for AutoPullOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

/// Runs sync operations for the bindings of one registry.
pub struct SyncEngine<'r, T, C> {
    registry: &'r Registry,
    transport: T,
    clock: C,
}

impl<'r, T: Transport, C: Clock> SyncEngine<'r, T, C> {
    pub fn new(registry: &'r Registry, transport: T, clock: C) -> Self {
        Self {
            registry,
            transport,
            clock,
        }
    }

    /// Binding covering `path`, or [`SyncError::DirectoryNotTracked`].
    pub fn binding_for_path(&self, path: &Path) -> Result<&'r LocalBinding, SyncError> {
        self.registry
            .resolve_for_path(path)
            .ok_or_else(|| SyncError::DirectoryNotTracked(path.to_path_buf()))
    }

    /// Push local changes to the remote, deleting remote files missing locally.
    pub fn push<F>(&self, binding: &LocalBinding, on_event: F) -> Result<TransferReport, SyncError>
    where
        F: Fn(SyncEvent),
    {
        let mut state = SyncState::load(&binding.path)?;

        if state.last_pull.is_some() {
            on_event(SyncEvent::CheckingRemote {
                binding: binding.name.clone(),
            });
            let remote = self.dry_run(binding, Direction::Pull)?.into_result()?;
            let changes = remote.changes().to_vec();
            if !changes.is_empty() {
                tracing::warn!(
                    binding = %binding.name,
                    changes = changes.len(),
                    "remote has unpulled changes"
                );
                on_event(SyncEvent::UnpulledRemoteChanges {
                    binding: binding.name.clone(),
                    changes,
                });
            }
        }

        if state.last_push.is_none() {
            self.first_transfer_guard(binding, Direction::Push, &on_event);
        }

        let report = self.transfer(binding, Direction::Push, &on_event)?;
        state.last_push = Some(self.clock.now());
        state.save(&binding.path)?;
        Ok(report)
    }

    /// Pull remote changes, deleting local files missing on the remote.
    pub fn pull<F>(&self, binding: &LocalBinding, on_event: F) -> Result<TransferReport, SyncError>
    where
        F: Fn(SyncEvent),
    {
        self.pull_inner(binding, true, &on_event)
    }

    /// Compare both sides without changing anything.
    ///
    /// The pull direction is checked first so a missing remote directory can
    /// be reported as [`SyncStatus::RemoteUninitialized`].
    pub fn status(&self, binding: &LocalBinding) -> Result<SyncStatus, SyncError> {
        let remote = match self.dry_run(binding, Direction::Pull)? {
            TransferOutcome::RemoteNotFound { .. } => {
                tracing::info!(binding = %binding.name, "remote directory not initialized");
                return Ok(SyncStatus::RemoteUninitialized);
            }
            other => other.into_result()?,
        };
        let local = self.dry_run(binding, Direction::Push)?.into_result()?;

        Ok(SyncStatus::Compared {
            local_changes: local.changes().to_vec(),
            remote_changes: remote.changes().to_vec(),
        })
    }

    /// Wait for the remote, then pull every binding in registry order.
    ///
    /// Individual failures are reported through `on_event` and collected;
    /// the call fails with [`SyncError::PullFailed`] naming them all after
    /// every binding was attempted. Returns the number of bindings pulled.
    pub fn auto_pull_all<P, F>(
        &self,
        prober: &P,
        options: AutoPullOptions,
        on_event: F,
    ) -> Result<usize, SyncError>
    where
        P: Prober + ?Sized,
        F: Fn(SyncEvent),
    {
        if self.registry.is_empty() {
            return Err(SyncError::NoBindings);
        }

        let endpoint = self.registry.endpoint();
        on_event(SyncEvent::WaitingForRemote {
            address: format!("{}:{}", endpoint.host, endpoint.port),
        });
        wait_until_reachable(
            prober,
            &self.clock,
            endpoint,
            options.poll_interval,
            options.timeout,
        )?;
        on_event(SyncEvent::RemoteReachable {
            bindings: self.registry.bindings().len(),
        });

        let mut failed = Vec::new();
        for binding in self.registry.bindings() {
            if let Err(e) = self.pull_inner(binding, false, &on_event) {
                tracing::warn!(binding = %binding.name, error = %e, "pull failed");
                on_event(SyncEvent::PullFailed {
                    binding: binding.name.clone(),
                    error: e.to_string(),
                });
                failed.push(binding.name.clone());
            }
        }

        if failed.is_empty() {
            Ok(self.registry.bindings().len())
        } else {
            Err(SyncError::PullFailed { failed })
        }
    }

    /// Pull; `guarded` arms the first-transfer delay (off for unattended runs).
    fn pull_inner(
        &self,
        binding: &LocalBinding,
        guarded: bool,
        on_event: &dyn Fn(SyncEvent),
    ) -> Result<TransferReport, SyncError> {
        let mut state = SyncState::load(&binding.path)?;

        if guarded && state.last_pull.is_none() {
            self.first_transfer_guard(binding, Direction::Pull, on_event);
        }

        let report = self.transfer(binding, Direction::Pull, on_event)?;
        state.last_pull = Some(self.clock.now());
        state.save(&binding.path)?;
        Ok(report)
    }

    fn first_transfer_guard(
        &self,
        binding: &LocalBinding,
        direction: Direction,
        on_event: &dyn Fn(SyncEvent),
    ) {
        let delay = match direction {
            Direction::Push => PUSH_GUARD_DELAY,
            Direction::Pull => PULL_GUARD_DELAY,
        };
        tracing::warn!(binding = %binding.name, %direction, ?delay, "first transfer will delete");
        on_event(SyncEvent::FirstTransferGuard {
            binding: binding.name.clone(),
            direction,
            delay,
        });
        self.clock.sleep(delay);
    }

    /// Real transfer with deletion.
    fn transfer(
        &self,
        binding: &LocalBinding,
        direction: Direction,
        on_event: &dyn Fn(SyncEvent),
    ) -> Result<TransferReport, SyncError> {
        on_event(SyncEvent::Transferring {
            binding: binding.name.clone(),
            direction,
        });

        let request = self.request(binding, direction).allow_delete(true);
        let report = self.transport.transfer(&request)?.into_result()?;

        on_event(SyncEvent::Transferred {
            binding: binding.name.clone(),
            direction,
            output: report.output.clone(),
        });
        Ok(report)
    }

    /// Dry run without deletion; the outcome is left for the caller to judge.
    fn dry_run(
        &self,
        binding: &LocalBinding,
        direction: Direction,
    ) -> Result<TransferOutcome, SyncError> {
        let request = self.request(binding, direction).dry_run(true);
        Ok(self.transport.transfer(&request)?)
    }

    fn request(&self, binding: &LocalBinding, direction: Direction) -> TransferRequest<'r> {
        let registry = self.registry;
        let local = binding.path.to_string_lossy().into_owned();
        let remote = registry.remote_address_for(binding);
        let (source, destination) = match direction {
            Direction::Push => (local, remote),
            Direction::Pull => (remote, local),
        };
        TransferRequest::new(
            source,
            destination,
            &registry.endpoint().port,
            registry.excludes(),
        )
    }
}
