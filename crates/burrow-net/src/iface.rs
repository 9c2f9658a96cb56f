//! Network interface inspection.
//!
//! Enumerates the IPv4/IPv6 networks bound to a named interface and picks
//! the primary IPv4 plus the best global-unicast IPv6.

use std::net::{IpAddr, Ipv6Addr};

use burrow_common::{BurrowError, BurrowResult};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};

/// A network with the host's own address on it.
///
/// `ipnet` keeps the concrete address (not just the network base), so the
/// same type describes both a bridge binding and an address handed to a
/// container. `gateway` is the host-side address on that net.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrBinding {
    /// The network, with the bound address and its mask.
    pub ipnet: IpNet,
    /// The host-side gateway address on this net.
    pub gateway: IpAddr,
}

/// Find the networks bound to an interface.
///
/// The first element of the result is always IPv4; a single global-unicast
/// IPv6 net follows when the interface has one. Interfaces with multiple
/// candidates keep the first and log a warning.
pub fn inspect_interface(name: &str) -> BurrowResult<Vec<CidrBinding>> {
    let addrs = nix::ifaddrs::getifaddrs().map_err(|e| BurrowError::Internal {
        message: format!("getifaddrs failed: {e}"),
    })?;

    let mut nets4: Vec<Ipv4Net> = Vec::new();
    let mut nets6: Vec<Ipv6Net> = Vec::new();
    let mut seen = false;

    for entry in addrs.filter(|entry| entry.interface_name == name) {
        seen = true;
        let (Some(address), Some(netmask)) = (entry.address, entry.netmask) else {
            continue;
        };
        if let (Some(sin), Some(mask)) = (address.as_sockaddr_in(), netmask.as_sockaddr_in()) {
            let prefix = u32::from(mask.ip()).count_ones() as u8;
            let net = Ipv4Net::new(sin.ip(), prefix).map_err(|e| BurrowError::Internal {
                message: format!("invalid IPv4 prefix on {name}: {e}"),
            })?;
            nets4.push(net);
        } else if let (Some(sin6), Some(mask6)) =
            (address.as_sockaddr_in6(), netmask.as_sockaddr_in6())
        {
            let prefix = u128::from(mask6.ip()).count_ones() as u8;
            let net = Ipv6Net::new(sin6.ip(), prefix).map_err(|e| BurrowError::Internal {
                message: format!("invalid IPv6 prefix on {name}: {e}"),
            })?;
            nets6.push(net);
        }
    }

    if !seen {
        return Err(BurrowError::InterfaceNotFound {
            name: name.to_string(),
        });
    }

    let Some(best4) = nets4.first().copied() else {
        return Err(BurrowError::NoIpv4 {
            interface: name.to_string(),
        });
    };
    if nets4.len() > 1 {
        tracing::warn!(
            interface = name,
            address = %best4.addr(),
            "interface has more than one IPv4 address, using the first"
        );
    }

    let globals: Vec<Ipv6Net> = nets6
        .into_iter()
        .filter(|net| is_global_unicast(&net.addr()))
        .collect();
    let best6 = globals.first().copied();
    match (&best6, globals.len()) {
        (None, _) => tracing::debug!(interface = name, "no suitable IPv6 address, IPv6 disabled"),
        (Some(net), n) if n > 1 => tracing::warn!(
            interface = name,
            address = %net.addr(),
            "interface has more than one global IPv6 address, using the first"
        ),
        _ => {}
    }

    let mut networks = vec![CidrBinding {
        ipnet: IpNet::V4(best4),
        gateway: IpAddr::V4(best4.addr()),
    }];
    if let Some(net6) = best6 {
        networks.push(CidrBinding {
            ipnet: IpNet::V6(net6),
            gateway: IpAddr::V6(net6.addr()),
        });
    }

    Ok(networks)
}

/// Global-unicast test: not unspecified, loopback, multicast or link-local.
fn is_global_unicast(ip: &Ipv6Addr) -> bool {
    let link_local = (ip.segments()[0] & 0xffc0) == 0xfe80;
    !ip.is_unspecified() && !ip.is_loopback() && !ip.is_multicast() && !link_local
}
