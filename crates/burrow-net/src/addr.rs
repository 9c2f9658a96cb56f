//! IPv4/IPv6 address arithmetic.
//!
//! Small helpers over [`ipnet`] types, all working on the integer form of
//! the addresses.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{IpNet, Ipv4Net};

/// First (network) and last (broadcast) address of a network.
pub fn network_range(net: &Ipv4Net) -> (Ipv4Addr, Ipv4Addr) {
    (net.network(), net.broadcast())
}

/// Number of addresses covered by the network's mask.
pub fn network_size(net: &Ipv4Net) -> u32 {
    (!u32::from(net.netmask())).wrapping_add(1)
}

/// Whether two networks share any addresses.
///
/// Networks of different address families never overlap.
pub fn networks_overlap(a: &IpNet, b: &IpNet) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

/// The `n`-th successor of an address, wrapping within the address family.
pub fn ip_add(ip: IpAddr, n: u32) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => IpAddr::V4(Ipv4Addr::from(u32::from(v4).wrapping_add(n))),
        IpAddr::V6(v6) => IpAddr::V6(Ipv6Addr::from(u128::from(v6).wrapping_add(u128::from(n)))),
    }
}
