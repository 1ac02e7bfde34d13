//! Nmap XML output deserialization.
//!
//! The ping sweep runs with `-oX -`, so the host list arrives as XML on
//! stdout. Only what the snapshot needs is modeled: host status, addresses,
//! and the up-host count from the run statistics.

use serde::Deserialize;

use crate::error::{Result, ScanError};

/// Root element: `<nmaprun>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "nmaprun")]
pub struct NmapRun {
    // Interleaved with <hosthint> elements; needs quick-xml's overlapped-lists.
    #[serde(rename = "host", default)]
    pub hosts: Vec<NmapHost>,
    pub runstats: Option<RunStats>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NmapHost {
    pub status: Option<HostStatus>,
    #[serde(rename = "address", default)]
    pub addresses: Vec<Address>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostStatus {
    #[serde(rename = "@state")]
    pub state: String,
    #[serde(rename = "@reason")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Address {
    #[serde(rename = "@addr")]
    pub addr: String,
    #[serde(rename = "@addrtype")]
    pub addr_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunStats {
    pub hosts: Option<RunStatsHosts>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunStatsHosts {
    #[serde(rename = "@up")]
    pub up: Option<usize>,
}

impl NmapRun {
    /// Hosts nmap reported as up. Falls back to counting `<host>` entries
    /// when the run statistics are missing.
    pub fn hosts_up(&self) -> usize {
        self.runstats
            .as_ref()
            .and_then(|rs| rs.hosts.as_ref())
            .and_then(|h| h.up)
            .unwrap_or_else(|| self.hosts.iter().filter(|h| h.is_up()).count())
    }
}

impl NmapHost {
    pub fn ipv4(&self) -> Option<&str> {
        self.address_of("ipv4")
    }

    /// Hardware address, present only for hosts that answered on the local
    /// segment.
    pub fn mac(&self) -> Option<&str> {
        self.address_of("mac")
    }

    pub fn is_up(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.state == "up")
    }

    fn address_of(&self, addr_type: &str) -> Option<&str> {
        self.addresses
            .iter()
            .find(|a| a.addr_type == addr_type)
            .map(|a| a.addr.as_str())
    }
}

/// Parse nmap XML bytes into a structured `NmapRun`.
pub fn parse_nmap_xml(xml: &[u8]) -> Result<NmapRun> {
    quick_xml::de::from_reader(xml).map_err(|e| ScanError::XmlParse(format!("{e}")))
}
