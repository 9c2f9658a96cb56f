//! Concurrent allocation behaviour across the two allocators.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use burrow_net::{CidrBinding, IpAllocator, PortAllocator};
use ipnet::IpNet;

fn bridge_nets() -> Vec<CidrBinding> {
    let ipnet: IpNet = "172.16.42.1/24".parse().unwrap();
    vec![CidrBinding {
        ipnet,
        gateway: ipnet.addr(),
    }]
}

fn primary(assignment: &[CidrBinding]) -> Ipv4Addr {
    match assignment[0].ipnet {
        IpNet::V4(net) => net.addr(),
        IpNet::V6(_) => panic!("first binding must be IPv4"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_containers_get_distinct_resources() {
    let ips = Arc::new(IpAllocator::new(bridge_nets()).unwrap());
    let ports = Arc::new(PortAllocator::new());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ips = Arc::clone(&ips);
            let ports = Arc::clone(&ports);
            tokio::spawn(async move {
                let ip = primary(&ips.acquire().await.unwrap());
                let port = ports.acquire(0).await.unwrap();
                (ip, port)
            })
        })
        .collect();

    let mut seen_ips = HashSet::new();
    let mut seen_ports = HashSet::new();
    for handle in handles {
        let (ip, port) = handle.await.unwrap();
        assert!(seen_ips.insert(ip), "duplicate address {ip}");
        assert!(seen_ports.insert(port), "duplicate port {port}");
        assert!((49153..65535).contains(&port));
        assert_ne!(ip, Ipv4Addr::new(172, 16, 42, 1));
    }
}

#[tokio::test]
async fn release_makes_address_and_port_reusable() {
    let ips = IpAllocator::new(bridge_nets()).unwrap();
    let ports = PortAllocator::new();

    let ip = primary(&ips.acquire().await.unwrap());
    let port = ports.acquire(0).await.unwrap();

    ips.release(ip).await;
    ports.release(port);

    // The same port is immediately reservable again by number.
    assert_eq!(ports.acquire(port).await.unwrap(), port);

    // The address comes back around once the rest of the pool is used up.
    let mut reused = false;
    for _ in 0..253 {
        if primary(&ips.acquire().await.unwrap()) == ip {
            reused = true;
            break;
        }
    }
    assert!(reused, "released address never came back");
}
