//! # burrow-net
//!
//! Host-side container networking for a Linux host.
//!
//! This crate provisions a private bridge on a non-overlapping subnet,
//! hands out container IP addresses on it, and exposes container backends
//! through ephemeral host ports (destination NAT plus a userspace TCP
//! forwarder for loopback traffic). Container lifecycle, image handling
//! and namespace plumbing live elsewhere; the only collaborators here are
//! the `ip` and `iptables` binaries and the host kernel.

#![warn(missing_docs)]

pub mod addr;
pub mod bridge;
mod cmd;
pub mod config;
pub mod iface;
pub mod ipalloc;
pub mod manager;
pub mod portalloc;
pub mod portmap;

pub use bridge::create_bridge;
pub use config::NetworkConfig;
pub use iface::{CidrBinding, inspect_interface};
pub use ipalloc::IpAllocator;
pub use manager::{NetworkInterface, NetworkManager};
pub use portalloc::PortAllocator;
pub use portmap::{Nat, PortMapper, Protocol};
