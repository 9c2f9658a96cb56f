//! Network manager and per-container interfaces.
//!
//! The manager composes the bridge, the IP allocator, the port allocator
//! and the port mapper. Containers get a [`NetworkInterface`] each, which
//! is the unit of resource release. Only one manager per host machine may
//! be used.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use burrow_common::{BurrowError, BurrowResult};
use ipnet::IpNet;

use crate::bridge;
use crate::config::NetworkConfig;
use crate::iface::{self, CidrBinding};
use crate::ipalloc::IpAllocator;
use crate::portalloc::PortAllocator;
use crate::portmap::{Nat, PortMapper};

/// The allocator capabilities an interface needs to give resources back.
#[derive(Clone)]
struct Allocators {
    ips: Arc<IpAllocator>,
    ports: Arc<PortAllocator>,
    mapper: Arc<PortMapper>,
}

/// Manages a set of container network interfaces on one bridge.
pub struct NetworkManager {
    bridge: String,
    networks: Vec<CidrBinding>,
    allocators: Allocators,
}

impl NetworkManager {
    /// Create the manager, provisioning the bridge when it is missing.
    pub async fn new(config: NetworkConfig) -> BurrowResult<Self> {
        let networks = match iface::inspect_interface(&config.bridge) {
            Ok(networks) => networks,
            Err(error) => {
                tracing::debug!(bridge = %config.bridge, %error, "bridge not usable, creating it");
                bridge::create_bridge(&config.bridge)?;
                iface::inspect_interface(&config.bridge)?
            }
        };

        let allocators = Allocators {
            ips: Arc::new(IpAllocator::new(networks.clone())?),
            ports: Arc::new(PortAllocator::new()),
            mapper: Arc::new(PortMapper::new()?),
        };

        Ok(Self {
            bridge: config.bridge,
            networks,
            allocators,
        })
    }

    /// Allocate a network interface for one container.
    pub async fn allocate(&self) -> BurrowResult<NetworkInterface> {
        let nets = self.allocators.ips.acquire().await?;
        let primary = primary_ipv4(&nets)?;
        tracing::debug!(ip = %primary, "allocated container addresses");
        Ok(NetworkInterface {
            nets,
            primary,
            ext_ports: Vec::new(),
            allocators: self.allocators.clone(),
        })
    }

    /// Name of the managed bridge device.
    pub fn bridge(&self) -> &str {
        &self.bridge
    }

    /// The networks bound to the bridge; the first is always IPv4.
    pub fn networks(&self) -> &[CidrBinding] {
        &self.networks
    }
}

/// The networking stack of a container.
pub struct NetworkInterface {
    nets: Vec<CidrBinding>,
    primary: Ipv4Addr,
    ext_ports: Vec<u16>,
    allocators: Allocators,
}

impl NetworkInterface {
    /// The container's bindings, one per bridge net, first always IPv4.
    pub fn ips(&self) -> &[CidrBinding] {
        &self.nets
    }

    /// The container's address in the primary IPv4 subnet.
    pub fn ipv4(&self) -> Ipv4Addr {
        self.primary
    }

    /// Host ports currently mapped to this container.
    pub fn mapped_ports(&self) -> &[u16] {
        &self.ext_ports
    }

    /// Allocate an external TCP port and map it to this interface.
    ///
    /// `spec` follows the publication grammar of [`Nat`]; a frontend of 0
    /// (the `"<back>"` shape) picks any free ephemeral port.
    pub async fn allocate_port(&mut self, spec: &str) -> BurrowResult<Nat> {
        let mut nat: Nat = spec.parse()?;
        nat.frontend = self.allocators.ports.acquire(nat.frontend).await?;

        let backend = SocketAddrV4::new(self.primary, nat.backend);
        if let Err(error) = self.allocators.mapper.map(nat.frontend, backend).await {
            self.allocators.ports.release(nat.frontend);
            return Err(error);
        }

        self.ext_ports.push(nat.frontend);
        Ok(nat)
    }

    /// Release every resource held by this interface.
    ///
    /// Unmaps and frees all external ports, then returns the primary
    /// address to the pool. Failures are logged, never surfaced.
    pub async fn release(self) {
        for port in &self.ext_ports {
            if let Err(error) = self.allocators.mapper.unmap(*port) {
                tracing::warn!(port, %error, "unable to unmap port");
            }
            self.allocators.ports.release(*port);
        }
        self.allocators.ips.release(self.primary).await;
    }
}

fn primary_ipv4(nets: &[CidrBinding]) -> BurrowResult<Ipv4Addr> {
    match nets.first() {
        Some(CidrBinding {
            ipnet: IpNet::V4(net),
            ..
        }) => Ok(net.addr()),
        _ => Err(BurrowError::Internal {
            message: "allocated bindings carry no primary IPv4".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    #[test]
    fn primary_ipv4_requires_a_v4_head() {
        let v4 = CidrBinding {
            ipnet: "10.0.42.5/24".parse().unwrap(),
            gateway: "10.0.42.1".parse::<IpAddr>().unwrap(),
        };
        let v6 = CidrBinding {
            ipnet: "fd00::5/64".parse().unwrap(),
            gateway: "fd00::1".parse::<IpAddr>().unwrap(),
        };

        assert_eq!(
            primary_ipv4(&[v4.clone(), v6.clone()]).unwrap(),
            Ipv4Addr::new(10, 0, 42, 5)
        );
        assert!(primary_ipv4(&[v6]).is_err());
        assert!(primary_ipv4(&[]).is_err());
    }
}
