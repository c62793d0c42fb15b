//! Remote reachability checks.
//!
//! A probe is a plain TCP connect to the SSH port. It says nothing about
//! authentication; it only tells whether the host is up and listening, which
//! is what `gs init` and `gs auto` need before handing off to rsync.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;

use crate::clock::Clock;
use crate::config::RemoteEndpoint;

/// Per-attempt connect timeout used while polling.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProbeError {
    #[error("timed out after {waited:?} waiting for {address}")]
    ReachabilityTimeout { address: String, waited: Duration },
}

/// Something that can tell whether the remote accepts connections.
pub trait Prober {
    /// Single attempt bounded by `timeout`. Never fails; unreachable is `false`.
    fn probe(&self, endpoint: &RemoteEndpoint, timeout: Duration) -> bool;
}

/// TCP connect prober.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

impl Prober for TcpProber {
    fn probe(&self, endpoint: &RemoteEndpoint, timeout: Duration) -> bool {
        let Ok(port) = endpoint.port.parse::<u16>() else {
            tracing::warn!(port = %endpoint.port, "invalid port, treating remote as unreachable");
            return false;
        };
        let host = endpoint
            .hostname()
            .trim_start_matches('[')
            .trim_end_matches(']');

        let addrs: Vec<SocketAddr> = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                tracing::debug!(host, error = %e, "failed to resolve host");
                return false;
            }
        };

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(_) => {
                    tracing::debug!(%addr, "remote reachable");
                    return true;
                }
                Err(e) => tracing::debug!(%addr, error = %e, "connect failed"),
            }
        }
        false
    }
}

/// Poll until the remote answers.
///
/// Each attempt uses [`DEFAULT_PROBE_TIMEOUT`]; between attempts the clock
/// sleeps `poll_interval`. A zero `overall_timeout` waits forever.
pub fn wait_until_reachable<P, C>(
    prober: &P,
    clock: &C,
    endpoint: &RemoteEndpoint,
    poll_interval: Duration,
    overall_timeout: Duration,
) -> Result<(), ProbeError>
where
    P: Prober + ?Sized,
    C: Clock + ?Sized,
{
    let start = clock.now();
    let mut attempts = 0u64;

    loop {
        attempts += 1;
        if prober.probe(endpoint, DEFAULT_PROBE_TIMEOUT) {
            tracing::info!(attempts, "remote is reachable");
            return Ok(());
        }

        let waited = clock.elapsed_since(start);
        if !overall_timeout.is_zero() && waited >= overall_timeout {
            return Err(ProbeError::ReachabilityTimeout {
                address: format!("{}:{}", endpoint.hostname(), endpoint.port),
                waited,
            });
        }

        tracing::debug!(attempts, ?poll_interval, "remote not reachable yet");
        clock.sleep(poll_interval);
    }
}
