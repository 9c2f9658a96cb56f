//! Bridge provisioning.
//!
//! Picks a private subnet that does not collide with any installed route,
//! creates the bridge device and sets up masquerading for egress.

use burrow_common::{BurrowError, BurrowResult};
use ipnet::{IpNet, Ipv4Net};

use crate::addr;
use crate::cmd;

/// Candidate bridge addresses, tried in order.
const BRIDGE_CANDIDATES: &[&str] = &["172.16.42.1/24", "10.0.42.1/24", "192.168.42.1/24"];

/// Check a candidate network against one `ip route` table dump.
///
/// Blank lines and the default route are skipped; any other line must
/// parse as a CIDR.
fn check_route_overlaps(candidate: &IpNet, routes: &str) -> BurrowResult<()> {
    for line in routes.lines() {
        let line = line.trim();
        if line.is_empty() || line.contains("default") {
            continue;
        }
        let field = line.split_whitespace().next().unwrap_or(line);
        let route: IpNet = field.parse().map_err(|_| BurrowError::RouteParse {
            line: line.to_string(),
        })?;
        if addr::networks_overlap(candidate, &route) {
            return Err(BurrowError::AlreadyRouted {
                network: candidate.to_string(),
                route: line.to_string(),
            });
        }
    }
    Ok(())
}

/// Pick the first candidate subnet free of the given routing table.
///
/// Returns `Ok(None)` when every candidate collides; unparseable route
/// lines are fatal.
fn pick_bridge_network(routes: &str) -> BurrowResult<Option<Ipv4Net>> {
    for candidate in BRIDGE_CANDIDATES {
        let net: Ipv4Net = candidate.parse().map_err(|e| BurrowError::Internal {
            message: format!("bad candidate network {candidate}: {e}"),
        })?;
        match check_route_overlaps(&IpNet::V4(net), routes) {
            Ok(()) => return Ok(Some(net)),
            Err(BurrowError::AlreadyRouted { route, .. }) => {
                tracing::debug!(candidate, route, "candidate network is already routed");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

/// Create a bridge device with a free private subnet.
///
/// Issues `ip link add`, `ip addr add` and `ip link set up`, installs the
/// POSTROUTING masquerade rule for the chosen subnet and enables IPv4
/// forwarding. A failure part-way through leaves the earlier steps in
/// place.
pub fn create_bridge(name: &str) -> BurrowResult<()> {
    let routes = cmd::run_ip(&["route"])?;
    let Some(network) = pick_bridge_network(&routes)? else {
        return Err(BurrowError::NoAvailableSubnet {
            bridge: name.to_string(),
        });
    };
    let cidr = network.to_string();
    tracing::debug!(bridge = name, network = %cidr, "creating bridge");

    cmd::run_ip(&["link", "add", name, "type", "bridge"])?;
    cmd::run_ip(&["addr", "add", &cidr, "dev", name])?;
    cmd::run_ip(&["link", "set", name, "up"])?;
    cmd::run_iptables(&[
        "-t",
        "nat",
        "-A",
        "POSTROUTING",
        "-s",
        &cidr,
        "!",
        "-d",
        &cidr,
        "-j",
        "MASQUERADE",
    ])?;
    enable_ip_forwarding()?;

    tracing::info!(bridge = name, network = %cidr, "bridge created");
    Ok(())
}

/// Enable IPv4 forwarding on the host.
pub fn enable_ip_forwarding() -> BurrowResult<()> {
    std::fs::write("/proc/sys/net/ipv4/ip_forward", "1")?;
    tracing::debug!("IPv4 forwarding enabled");
    Ok(())
}
