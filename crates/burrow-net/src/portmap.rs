//! Port mapping and forwarding for containers.
//!
//! Every published port pairs a DNAT rule in a dedicated nat chain with a
//! userspace TCP forwarder on loopback. The kernel shortcuts
//! host-originated connections to `127.0.0.1` past the OUTPUT hook, so
//! the forwarder is what makes those reach the container.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;

use burrow_common::{BurrowError, BurrowResult};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::cmd;

/// The nat-table chain holding one DNAT rule per published port.
const CHAIN: &str = "DOCKER";

/// Protocol for port mapping. UDP exposure is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// TCP protocol.
    Tcp,
}

impl Protocol {
    /// Get the protocol string for iptables.
    fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed port publication: host-side frontend, container-side backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nat {
    /// Protocol of the mapping.
    pub proto: Protocol,
    /// Host port; `0` means "assign any ephemeral port".
    pub frontend: u16,
    /// Container port.
    pub backend: u16,
}

/// Parses the compact publication grammar:
///
/// * `"<back>"`: backend only, any ephemeral frontend,
/// * `"<front>:<back>"`: both explicit,
/// * `":<back>"`: frontend equals backend.
impl FromStr for Nat {
    type Err = BurrowError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = || BurrowError::InvalidPortSpec {
            spec: spec.to_string(),
        };

        let (frontend, backend) = match spec.split_once(':') {
            Some((front, back)) => {
                if back.contains(':') {
                    return Err(invalid());
                }
                let backend: u16 = back.parse().map_err(|_| invalid())?;
                let frontend = if front.is_empty() {
                    // Same port on both sides; may fail later if taken.
                    backend
                } else {
                    front.parse().map_err(|_| invalid())?
                };
                (frontend, backend)
            }
            None => (0, spec.parse().map_err(|_| invalid())?),
        };

        Ok(Nat {
            proto: Protocol::Tcp,
            frontend,
            backend,
        })
    }
}

/// Maps external ports to container backends.
///
/// Keeps a DNAT rule and a loopback forwarder per mapping and can unmap
/// at will. Construction wipes whatever a previous run left in the chain,
/// so at most one mapper may exist per host.
pub struct PortMapper {
    mappings: parking_lot::Mutex<HashMap<u16, SocketAddrV4>>,
    proxies: parking_lot::Mutex<HashMap<u16, JoinHandle<()>>>,
}

impl PortMapper {
    /// Create the mapper: purge stale rules from prior runs, then create
    /// the chain and the PREROUTING/OUTPUT jumps into it.
    pub fn new() -> BurrowResult<Self> {
        let mapper = Self {
            mappings: parking_lot::Mutex::new(HashMap::new()),
            proxies: parking_lot::Mutex::new(HashMap::new()),
        };
        mapper.cleanup();
        mapper.setup()?;
        Ok(mapper)
    }

    fn cleanup(&self) {
        // Ignore errors - the chains may never have been set up
        let _ = cmd::run_iptables(&[
            "-t", "nat", "-D", "PREROUTING", "-m", "addrtype", "--dst-type", "LOCAL", "-j", CHAIN,
        ]);
        let _ = cmd::run_iptables(&[
            "-t",
            "nat",
            "-D",
            "OUTPUT",
            "-m",
            "addrtype",
            "--dst-type",
            "LOCAL",
            "!",
            "--dst",
            "127.0.0.0/8",
            "-j",
            CHAIN,
        ]);
        // Shapes installed by older releases
        let _ = cmd::run_iptables(&[
            "-t", "nat", "-D", "OUTPUT", "-m", "addrtype", "--dst-type", "LOCAL", "-j", CHAIN,
        ]);
        let _ = cmd::run_iptables(&["-t", "nat", "-D", "PREROUTING", "-j", CHAIN]);
        let _ = cmd::run_iptables(&["-t", "nat", "-D", "OUTPUT", "-j", CHAIN]);
        let _ = cmd::run_iptables(&["-t", "nat", "-F", CHAIN]);
        let _ = cmd::run_iptables(&["-t", "nat", "-X", CHAIN]);
    }

    fn setup(&self) -> BurrowResult<()> {
        cmd::run_iptables(&["-t", "nat", "-N", CHAIN])?;
        cmd::run_iptables(&[
            "-t", "nat", "-A", "PREROUTING", "-m", "addrtype", "--dst-type", "LOCAL", "-j", CHAIN,
        ])?;
        // Loopback destinations are excluded: the kernel never DNATs
        // host-originated traffic to 127.0.0.1, the forwarder carries it.
        cmd::run_iptables(&[
            "-t",
            "nat",
            "-A",
            "OUTPUT",
            "-m",
            "addrtype",
            "--dst-type",
            "LOCAL",
            "!",
            "--dst",
            "127.0.0.0/8",
            "-j",
            CHAIN,
        ])?;
        Ok(())
    }

    fn forward_rule(&self, action: &str, port: u16, backend: SocketAddrV4) -> BurrowResult<()> {
        let port = port.to_string();
        let destination = backend.to_string();
        cmd::run_iptables(&[
            "-t",
            "nat",
            action,
            CHAIN,
            "-p",
            "tcp",
            "--dport",
            &port,
            "-j",
            "DNAT",
            "--to-destination",
            &destination,
        ])
    }

    /// Publish `port`: install the DNAT rule and start the loopback
    /// forwarder towards `backend`.
    pub async fn map(&self, port: u16, backend: SocketAddrV4) -> BurrowResult<()> {
        tracing::debug!(port, %backend, "mapping port");
        self.forward_rule("-A", port, backend)?;
        self.mappings.lock().insert(port, backend);

        let listener = match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
            Ok(listener) => listener,
            Err(e) => {
                let _ = self.unmap(port);
                return Err(e.into());
            }
        };
        let handle = tokio::spawn(proxy(listener, backend));
        self.proxies.lock().insert(port, handle);
        Ok(())
    }

    /// Withdraw a published port: stop the forwarder, then delete the
    /// DNAT rule.
    pub fn unmap(&self, port: u16) -> BurrowResult<()> {
        tracing::debug!(port, "unmapping port");
        let Some(backend) = self.mappings.lock().get(&port).copied() else {
            return Err(BurrowError::PortNotMapped { port });
        };
        if let Some(handle) = self.proxies.lock().remove(&port) {
            // Aborting the forwarder closes its listener.
            handle.abort();
        }
        self.forward_rule("-D", port, backend)?;
        self.mappings.lock().remove(&port);
        Ok(())
    }

    /// Backend address of a published port, if any.
    pub fn backend(&self, port: u16) -> Option<SocketAddrV4> {
        self.mappings.lock().get(&port).copied()
    }
}

/// Accept connections forever and forward each to the backend.
///
/// A dial failure drops the inbound connection and keeps listening; a
/// one-sided EOF half-closes the other direction and drains the rest.
async fn proxy(listener: TcpListener, backend: SocketAddrV4) {
    loop {
        let mut src = match listener.accept().await {
            Ok((src, _)) => src,
            Err(_) => return,
        };
        tokio::spawn(async move {
            let mut dst = match TcpStream::connect(backend).await {
                Ok(dst) => dst,
                Err(error) => {
                    tracing::warn!(%backend, %error, "cannot reach backend, dropping connection");
                    return;
                }
            };
            let _ = tokio::io::copy_bidirectional(&mut src, &mut dst).await;
        });
    }
}
