//! Container IP allocation.
//!
//! A single owner task holds the in-use set and the scan cursor; callers
//! talk to it over two channels. Acquire is a rendezvous (the owner scans
//! and replies only when a requester is waiting, and an offset is marked
//! in use only once the requester has taken it), release is
//! fire-and-forget. Pending releases are always drained before the next
//! request is served, so a freed address is visible to the very next
//! acquire.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

use burrow_common::{BurrowError, BurrowResult};
use ipnet::IpNet;
use tokio::sync::{mpsc, oneshot};

use crate::addr;
use crate::iface::CidrBinding;

type Assignment = BurrowResult<Vec<CidrBinding>>;

/// Allocator of container addresses on the bridge's subnets.
///
/// Addresses are allocated in the primary IPv4 subnet; every other net
/// bound to the bridge contributes a parallel binding at the same host
/// offset. IPv6 bindings ride that offset and are never allocated
/// independently.
pub struct IpAllocator {
    acquire_tx: mpsc::Sender<oneshot::Sender<Assignment>>,
    release_tx: mpsc::Sender<Ipv4Addr>,
}

impl IpAllocator {
    /// Create the allocator for the given interface snapshot and spawn its
    /// owner task on the current Tokio runtime.
    ///
    /// The first binding must be IPv4 (it defines the address space).
    pub fn new(networks: Vec<CidrBinding>) -> BurrowResult<Self> {
        let Some(primary) = networks.first() else {
            return Err(BurrowError::Internal {
                message: "IP allocator needs at least one interface net".to_string(),
            });
        };
        let (IpNet::V4(primary_net), IpAddr::V4(gateway)) = (primary.ipnet, primary.gateway) else {
            return Err(BurrowError::Internal {
                message: "the primary interface net must be IPv4".to_string(),
            });
        };

        let (first_ip, _) = addr::network_range(&primary_net);
        let size = addr::network_size(&primary_net);
        let state = Owner {
            networks,
            in_use: HashSet::new(),
            ip_num: u32::from(first_ip),
            own_ip: u32::from(gateway),
            // The first and last addresses are the network and broadcast.
            max: size.saturating_sub(2),
            pos: 1,
            exhausted: false,
        };

        let (acquire_tx, acquire_rx) = mpsc::channel(1);
        let (release_tx, release_rx) = mpsc::channel(1);
        tokio::spawn(state.run(acquire_rx, release_rx));

        Ok(Self {
            acquire_tx,
            release_tx,
        })
    }

    /// Acquire one binding per interface net, all at the same host offset.
    ///
    /// Fails with [`BurrowError::PoolExhausted`] when every address of the
    /// primary subnet is held.
    pub async fn acquire(&self) -> Assignment {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.acquire_tx
            .send(reply_tx)
            .await
            .map_err(|_| owner_gone())?;
        reply_rx.await.map_err(|_| owner_gone())?
    }

    /// Return an address to the pool.
    ///
    /// `ip` must be the primary-subnet IPv4 address that was handed out.
    pub async fn release(&self, ip: Ipv4Addr) {
        tracing::debug!(%ip, "releasing address");
        // Fire and forget; the owner only goes away when the allocator does.
        let _ = self.release_tx.send(ip).await;
    }
}

fn owner_gone() -> BurrowError {
    BurrowError::Internal {
        message: "IP allocator task ended unexpectedly".to_string(),
    }
}

struct Owner {
    networks: Vec<CidrBinding>,
    in_use: HashSet<u32>,
    /// Primary subnet's network address, host order.
    ip_num: u32,
    /// The gateway's address, never handed out.
    own_ip: u32,
    /// Allocatable offsets are `1..=max`.
    max: u32,
    /// Rotating scan cursor.
    pos: u32,
    /// Whether the previous scan found the pool exhausted.
    exhausted: bool,
}

impl Owner {
    async fn run(
        mut self,
        mut acquire_rx: mpsc::Receiver<oneshot::Sender<Assignment>>,
        mut release_rx: mpsc::Receiver<Ipv4Addr>,
    ) {
        loop {
            tokio::select! {
                biased;
                released = release_rx.recv() => match released {
                    Some(ip) => self.handle_release(ip),
                    None => break,
                },
                request = acquire_rx.recv() => match request {
                    Some(reply) => self.serve(reply),
                    None => break,
                },
            }
        }
    }

    fn serve(&mut self, reply: oneshot::Sender<Assignment>) {
        match self.scan() {
            Some(new_num) => {
                let assignment = self.bindings_at(new_num.wrapping_sub(self.ip_num));
                let ok = assignment.is_ok();
                if reply.send(assignment).is_ok() && ok {
                    self.in_use.insert(new_num);
                }
            }
            None => {
                self.exhausted = true;
                let _ = reply.send(Err(BurrowError::PoolExhausted));
            }
        }
    }

    /// Find the first unused address, giving up after one whole round.
    fn scan(&mut self) -> Option<u32> {
        for _ in 0..self.max {
            let candidate = self.ip_num.wrapping_add(self.pos);
            self.pos = self.pos % self.max + 1;
            if candidate == self.own_ip {
                continue;
            }
            if !self.in_use.contains(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// One binding per interface net at the given host offset.
    fn bindings_at(&self, offset: u32) -> Assignment {
        let mut bindings = Vec::with_capacity(self.networks.len());
        for network in &self.networks {
            let ip = addr::ip_add(network.ipnet.network(), offset);
            let ipnet =
                IpNet::new(ip, network.ipnet.prefix_len()).map_err(|e| BurrowError::Internal {
                    message: format!("bad prefix for allocated net: {e}"),
                })?;
            bindings.push(CidrBinding {
                ipnet,
                gateway: network.gateway,
            });
        }
        Ok(bindings)
    }

    fn handle_release(&mut self, ip: Ipv4Addr) {
        let num = u32::from(ip);
        self.in_use.remove(&num);
        if self.exhausted {
            // The released offset is the only free one; scan it first.
            let offset = num.wrapping_sub(self.ip_num);
            if (1..=self.max).contains(&offset) {
                self.pos = offset;
            }
            self.exhausted = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(nets: &[&str]) -> Vec<CidrBinding> {
        nets.iter()
            .map(|s| {
                let ipnet: IpNet = s.parse().unwrap();
                CidrBinding {
                    ipnet,
                    gateway: ipnet.addr(),
                }
            })
            .collect()
    }

    fn primary_v4(assignment: &[CidrBinding]) -> Ipv4Addr {
        match assignment[0].ipnet {
            IpNet::V4(net) => net.addr(),
            IpNet::V6(_) => panic!("primary binding must be IPv4"),
        }
    }

    #[tokio::test]
    async fn tiny_subnet_exhausts_and_reuses() {
        // /30: .0 network, .1 gateway, .3 broadcast; one usable address.
        let alloc = IpAllocator::new(bindings(&["10.0.0.1/30"])).unwrap();

        let first = alloc.acquire().await.unwrap();
        assert_eq!(primary_v4(&first), Ipv4Addr::new(10, 0, 0, 2));

        let err = alloc.acquire().await.unwrap_err();
        assert!(matches!(err, BurrowError::PoolExhausted));

        alloc.release(Ipv4Addr::new(10, 0, 0, 2)).await;
        let again = alloc.acquire().await.unwrap();
        assert_eq!(primary_v4(&again), Ipv4Addr::new(10, 0, 0, 2));
    }

    #[tokio::test]
    async fn full_subnet_hands_out_every_host() {
        let alloc = IpAllocator::new(bindings(&["192.168.42.1/24"])).unwrap();

        let mut held = HashSet::new();
        for _ in 0..253 {
            let ip = primary_v4(&alloc.acquire().await.unwrap());
            assert!(held.insert(ip), "duplicate address {ip}");
            assert_ne!(ip, Ipv4Addr::new(192, 168, 42, 1), "gateway handed out");
        }

        let err = alloc.acquire().await.unwrap_err();
        assert!(matches!(err, BurrowError::PoolExhausted));

        let released = Ipv4Addr::new(192, 168, 42, 100);
        alloc.release(released).await;
        assert_eq!(primary_v4(&alloc.acquire().await.unwrap()), released);
    }

    #[tokio::test]
    async fn parallel_nets_share_the_host_offset() {
        let alloc = IpAllocator::new(bindings(&["10.0.42.1/24", "fd00:42::1/64"])).unwrap();

        let assignment = alloc.acquire().await.unwrap();
        assert_eq!(assignment.len(), 2);
        assert_eq!(primary_v4(&assignment), Ipv4Addr::new(10, 0, 42, 2));
        match assignment[1].ipnet {
            IpNet::V6(net) => {
                assert_eq!(net.addr(), "fd00:42::2".parse::<std::net::Ipv6Addr>().unwrap());
                assert_eq!(net.prefix_len(), 64);
            }
            IpNet::V4(_) => panic!("second binding must be IPv6"),
        }
        assert_eq!(assignment[1].gateway, "fd00:42::1".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn addresses_rotate_rather_than_repeat() {
        let alloc = IpAllocator::new(bindings(&["10.0.42.1/24"])).unwrap();

        let a = primary_v4(&alloc.acquire().await.unwrap());
        alloc.release(a).await;
        let b = primary_v4(&alloc.acquire().await.unwrap());
        // The cursor keeps moving; a freshly released address is not
        // reused while others are free.
        assert_ne!(a, b);
    }

    #[test]
    fn first_net_must_be_ipv4() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let _guard = rt.enter();
        assert!(IpAllocator::new(bindings(&["fd00::1/64"])).is_err());
        assert!(IpAllocator::new(vec![]).is_err());
    }
}
