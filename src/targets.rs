//! Target expansion helpers.
//!
//! Turns user-supplied host ranges and bus-address ranges into the
//! concrete lists `knxmap_rs::discover` and `knxmap_rs::bus_scan` iterate
//! over. Grounded on the reference implementation's `Targets`/`KnxTargets`
//! helper classes, rebuilt around `ipnetwork` and `knxmap_rs`'s own address
//! types instead of Python's `ipaddress` module and string parsing.

use std::net::{Ipv4Addr, SocketAddrV4};

use ipnetwork::Ipv4Network;

use knxmap_rs::addressing::individual::expand_range;
use knxmap_rs::addressing::IndividualAddress;
use knxmap_rs::error::Result;

/// Expand a CIDR network or single host into a list of `(host, port)`
/// socket addresses. A single host (`/32` or a bare address) yields one
/// target; a network yields every usable host address (excluding network
/// and broadcast addresses for prefixes shorter than `/31`).
///
/// # Errors
///
/// Returns an error if `spec` is not a valid IPv4 address or CIDR network.
pub fn expand_hosts(spec: &str, port: u16) -> Result<Vec<SocketAddrV4>> {
    let network: Ipv4Network = spec
        .parse()
        .map_err(|_| knxmap_rs::error::KnxError::invalid_frame())?;

    if network.prefix() >= 31 {
        return Ok(vec![SocketAddrV4::new(network.ip(), port)]);
    }

    Ok(network
        .iter()
        .filter(|ip| *ip != network.network() && *ip != network.broadcast())
        .map(|ip: Ipv4Addr| SocketAddrV4::new(ip, port))
        .collect())
}

/// Expand an inclusive individual-address range `"from-to"` (e.g.
/// `"1.1.1-1.1.255"`) into the addresses a bus scan should probe. A bare
/// address with no dash expands to the single-element list containing it.
///
/// # Errors
///
/// Returns an error if either endpoint fails to parse, or if `from` sorts
/// after `to`.
pub fn expand_bus_range(spec: &str) -> Result<Vec<IndividualAddress>> {
    match spec.split_once('-') {
        Some((from, to)) => {
            let from: IndividualAddress = from.parse()?;
            let to: IndividualAddress = to.parse()?;
            expand_range(from, to)
        }
        None => Ok(vec![spec.parse()?]),
    }
}
