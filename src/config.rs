//! Configuration structs for the scan and bus-scan entry points.
//!
//! These are plain data, constructed by a caller (the `clap`-based binary
//! in `main.rs`, or any other embedder) and passed into [`crate::scan`],
//! [`crate::bus_scan`] and friends. The core never parses CLI arguments,
//! environment variables, or config files itself.

use std::time::Duration;

/// KNX transmission medium, as carried in cEMI control field 2 / decoded
/// from a `DEVICE_INFO` DIB. The medium's human-readable name and its
/// associated device-family lookup tables are an external concern (see
/// module docs); this enum only carries the wire-level discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KnxMedium {
    /// Twisted Pair 1 (9600 bit/s), the common wired KNX bus.
    #[default]
    Tp1,
    /// Powerline 110.
    Pl110,
    /// Radio Frequency.
    Rf,
    /// KNX IP (native, not tunnelled).
    KnxIp,
}

/// Configuration for gateway discovery and description ([`crate::discover`]).
#[derive(Debug, Clone, Copy)]
pub struct ScanConfig {
    /// How long to keep collecting `SEARCH_RESPONSE`s after sending the
    /// `SEARCH_REQUEST`.
    pub timeout: Duration,
    /// Local UDP port to send discovery requests from (0 = any).
    pub search_port: u16,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            search_port: 0,
        }
    }
}

/// Configuration for a bus scan through an established tunnel
/// ([`crate::bus_scan`]).
#[derive(Debug, Clone, Copy)]
pub struct BusScanConfig {
    /// Per-probe deadline: how long to wait for `T_Ack` before marking an
    /// address unresponsive.
    pub bus_timeout: Duration,
    /// Maximum number of probes in flight at once.
    pub bus_workers: usize,
    /// Medium to report for responsive devices (the protocol doesn't
    /// carry this per-telegram; it's a property of the bus being probed).
    pub medium: KnxMedium,
    /// If set, attempt `A_Authorize_Request` before privileged reads.
    pub auth_key: Option<u32>,
    /// If true, after a successful connect, also read serial number,
    /// manufacturer ID, hardware type, and program version.
    pub read_properties: bool,
}

impl Default for BusScanConfig {
    fn default() -> Self {
        Self {
            bus_timeout: Duration::from_secs(2),
            bus_workers: 4,
            medium: KnxMedium::Tp1,
            auth_key: None,
            read_properties: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_config_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.search_port, 0);
    }

    #[test]
    fn bus_scan_config_defaults() {
        let config = BusScanConfig::default();
        assert_eq!(config.bus_timeout, Duration::from_secs(2));
        assert_eq!(config.bus_workers, 4);
        assert_eq!(config.medium, KnxMedium::Tp1);
        assert!(config.auth_key.is_none());
        assert!(!config.read_properties);
    }
}
