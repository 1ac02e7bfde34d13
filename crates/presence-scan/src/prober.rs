//! Network probing.
//!
//! [`Prober`] is the seam between the scheduler and whatever answers "who is
//! on the segment right now". [`NmapProber`] runs an nmap ARP ping sweep as a
//! child process via `tokio::process::Command`, so the scheduler stays
//! responsive to cancellation while the sweep is in flight.

use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Instant;

use chrono::NaiveDateTime;
use ipnet::Ipv4Net;
use tokio::process::Command;

use presence_core::{timestamp, Snapshot};

use crate::error::{Result, ScanError};
use crate::nmap_xml::{self, NmapRun};

/// Produces one snapshot of the devices reachable in an address range.
pub trait Prober: Send + Sync {
    fn probe(&self, target: &str) -> impl Future<Output = Result<Snapshot>> + Send;
}

/// Check that `range` is an IPv4 CIDR block or a single IPv4 address.
///
/// ARP only exists on IPv4, so an IPv6 range would never yield a device.
pub fn validate_target(range: &str) -> Result<()> {
    if range.parse::<Ipv4Net>().is_ok() || range.parse::<Ipv4Addr>().is_ok() {
        Ok(())
    } else {
        Err(ScanError::InvalidTarget {
            range: range.to_string(),
        })
    }
}

/// Build a snapshot from a ping sweep.
///
/// Only hosts that are up and reported both an IPv4 and a MAC address are
/// kept; the scanning host itself never carries a MAC. MACs are lowercased so
/// one device always maps to one id.
pub fn snapshot_from_run(run: &NmapRun, captured_at: NaiveDateTime) -> Snapshot {
    let mut snapshot = Snapshot::new();
    for host in run.hosts.iter().filter(|h| h.is_up()) {
        if let (Some(ip), Some(mac)) = (host.ipv4(), host.mac()) {
            snapshot.insert(mac.to_ascii_lowercase(), ip, captured_at);
        }
    }
    snapshot
}

/// Wrapper around the nmap binary.
pub struct NmapProber {
    nmap_path: String,
}

impl NmapProber {
    pub fn new(nmap_path: &str) -> Self {
        Self {
            nmap_path: nmap_path.to_string(),
        }
    }

    /// Verify nmap is installed and accessible.
    pub async fn verify_installation(&self) -> Result<String> {
        let output = Command::new(&self.nmap_path)
            .arg("--version")
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        String::from_utf8(output.stdout).map_err(|e| ScanError::XmlParse(e.to_string()))
    }

    fn spawn_error(&self, e: std::io::Error) -> ScanError {
        if e.kind() == std::io::ErrorKind::NotFound {
            ScanError::NmapNotFound {
                path: self.nmap_path.clone(),
            }
        } else {
            ScanError::Io(e)
        }
    }
}

impl Prober for NmapProber {
    /// `-sn` skips port scanning; on a directly attached segment nmap then
    /// discovers hosts with ARP requests and reports each reply's MAC.
    async fn probe(&self, target: &str) -> Result<Snapshot> {
        let start = Instant::now();

        tracing::debug!(target = %target, "Starting ping sweep");

        let output = Command::new(&self.nmap_path)
            .args(["-sn", "-n", "-oX", "-", "--noninteractive"])
            .arg(target)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(ScanError::NmapFailed {
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        let run = nmap_xml::parse_nmap_xml(&output.stdout)?;
        let snapshot = snapshot_from_run(&run, timestamp::now());

        tracing::debug!(
            target = %target,
            hosts_up = run.hosts_up(),
            devices = snapshot.len(),
            duration_ms = start.elapsed().as_millis(),
            "Ping sweep complete"
        );

        Ok(snapshot)
    }
}
