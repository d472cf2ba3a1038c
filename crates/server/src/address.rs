//! Local address discovery.

use std::net::IpAddr;

use clusterboot_types::{BootstrapError, NodeAddress};
use tracing::debug;

/// Determines the address this node registers and advertises to peers.
///
/// An explicit `advertise_addr` wins. Otherwise the first non-loopback IPv4
/// address among the host's interfaces is used.
///
/// # Errors
///
/// Returns [`BootstrapError::Config`] if the interfaces cannot be listed or
/// none carries a usable IPv4 address.
pub fn resolve_node_address(advertise_addr: Option<&str>) -> Result<NodeAddress, BootstrapError> {
    if let Some(addr) = advertise_addr {
        return Ok(NodeAddress::new(addr.trim()));
    }

    let interfaces = if_addrs::get_if_addrs().map_err(|e| BootstrapError::Config {
        message: format!("failed to list network interfaces: {e}"),
    })?;
    for iface in &interfaces {
        debug!(name = %iface.name, ip = %iface.ip(), "Found interface");
    }

    first_routable_ipv4(interfaces.iter().map(if_addrs::Interface::ip))
        .map(NodeAddress::from)
        .ok_or_else(|| BootstrapError::Config {
            message: "no non-loopback IPv4 address found; set advertise_addr".to_string(),
        })
}

fn first_routable_ipv4(ips: impl IntoIterator<Item = IpAddr>) -> Option<IpAddr> {
    ips.into_iter().find(|ip| ip.is_ipv4() && !ip.is_loopback() && !ip.is_unspecified())
}
