//! End-to-end tests against the host network stack.
//!
//! These mutate the nat table and create bridge devices, so they are
//! ignored by default. Run them as root, ideally inside a throwaway
//! network namespace:
//!
//! ```text
//! sudo unshare -n cargo test -p burrow-net --test host_system -- --ignored
//! ```

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use burrow_net::{NetworkConfig, NetworkManager, PortMapper};
use tokio::net::TcpStream;

const TEST_BRIDGE: &str = "burrow-test0";

fn scrub_bridge() {
    let _ = std::process::Command::new("ip")
        .args(["link", "del", TEST_BRIDGE])
        .status();
}

#[tokio::test]
#[ignore = "requires root and iptables"]
async fn map_pairs_rule_with_listener_and_unmap_removes_both() {
    let mapper = PortMapper::new().unwrap();
    let backend = SocketAddrV4::new(Ipv4Addr::new(172, 16, 42, 5), 80);

    mapper.map(49200, backend).await.unwrap();
    assert_eq!(mapper.backend(49200), Some(backend));

    // The loopback forwarder is listening even though the backend is not
    // reachable.
    TcpStream::connect((Ipv4Addr::LOCALHOST, 49200))
        .await
        .unwrap();

    mapper.unmap(49200).unwrap();
    assert_eq!(mapper.backend(49200), None);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(TcpStream::connect((Ipv4Addr::LOCALHOST, 49200))
        .await
        .is_err());

    // A second unmap has nothing to remove.
    assert!(mapper.unmap(49200).is_err());

    // No stale rule or listener: the port maps cleanly again.
    mapper.map(49200, backend).await.unwrap();
    mapper.unmap(49200).unwrap();
}

#[tokio::test]
#[ignore = "requires root, iproute2 and iptables"]
async fn manager_lifecycle_releases_everything() {
    scrub_bridge();

    let manager = NetworkManager::new(NetworkConfig::default().with_bridge(TEST_BRIDGE))
        .await
        .unwrap();

    let mut first = manager.allocate().await.unwrap();
    let mut second = manager.allocate().await.unwrap();
    assert_ne!(first.ipv4(), second.ipv4());

    let nat = first.allocate_port("0:80").await.unwrap();
    assert!((49153..65535).contains(&nat.frontend));
    assert_eq!(nat.backend, 80);
    assert_eq!(first.mapped_ports(), &[nat.frontend]);

    let frontend = nat.frontend;
    first.release().await;

    // The frontend is free again: another container can claim it by
    // number.
    let reclaimed = second
        .allocate_port(&format!("{frontend}:80"))
        .await
        .unwrap();
    assert_eq!(reclaimed.frontend, frontend);
    second.release().await;

    scrub_bridge();
}
