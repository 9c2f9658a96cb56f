//! Common error types for the burrow crates.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`BurrowError`].
pub type BurrowResult<T> = Result<T, BurrowError>;

/// Common errors across the burrow crates.
#[derive(Error, Diagnostic, Debug)]
pub enum BurrowError {
    /// A required system binary was not found on `PATH`.
    #[error("command not found: {command}")]
    #[diagnostic(
        code(burrow::command_not_found),
        help("Install the iproute2 and iptables packages and make sure they are on PATH")
    )]
    CommandNotFound {
        /// The binary that could not be located.
        command: String,
    },

    /// A system command exited with a non-zero status.
    #[error("{command} failed: {output}")]
    #[diagnostic(code(burrow::command_failed))]
    CommandFailed {
        /// The full command line that was run.
        command: String,
        /// Captured stderr of the failed command.
        output: String,
    },

    /// A line of `ip route` output could not be parsed as a CIDR.
    #[error("unexpected ip route output: {line}")]
    #[diagnostic(code(burrow::route_parse))]
    RouteParse {
        /// The offending route line.
        line: String,
    },

    /// A candidate bridge network collides with an installed route.
    #[error("network {network} is already routed: '{route}'")]
    #[diagnostic(code(burrow::already_routed))]
    AlreadyRouted {
        /// The candidate network.
        network: String,
        /// The route it collides with.
        route: String,
    },

    /// Every candidate subnet overlaps an installed route.
    #[error("could not find a free IP address range for bridge '{bridge}'")]
    #[diagnostic(
        code(burrow::no_available_subnet),
        help("Configure an address on the bridge manually and restart the manager")
    )]
    NoAvailableSubnet {
        /// The bridge that could not be provisioned.
        bridge: String,
    },

    /// The named network interface does not exist.
    #[error("network interface '{name}' not found")]
    #[diagnostic(code(burrow::interface_not_found))]
    InterfaceNotFound {
        /// The interface name.
        name: String,
    },

    /// The bridge carries no IPv4 address.
    #[error("interface '{interface}' has no IPv4 addresses")]
    #[diagnostic(code(burrow::no_ipv4))]
    NoIpv4 {
        /// The interface that was inspected.
        interface: String,
    },

    /// The address pool has no unallocated IP left.
    #[error("no unallocated IP address available")]
    #[diagnostic(code(burrow::pool_exhausted))]
    PoolExhausted,

    /// The requested port is already held.
    #[error("port already in use: {port}")]
    #[diagnostic(code(burrow::port_in_use))]
    PortInUse {
        /// The requested port.
        port: u16,
    },

    /// Unmap was called for a port that is not mapped.
    #[error("port is not mapped: {port}")]
    #[diagnostic(code(burrow::port_not_mapped))]
    PortNotMapped {
        /// The port that was not mapped.
        port: u16,
    },

    /// A port specification string did not match any accepted shape.
    #[error("invalid port format: '{spec}'")]
    #[diagnostic(
        code(burrow::invalid_port_spec),
        help("Accepted shapes are '<backend>', '<frontend>:<backend>' and ':<backend>'")
    )]
    InvalidPortSpec {
        /// The rejected specification.
        spec: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(burrow::io))]
    Io(#[from] std::io::Error),

    /// Internal error (should not happen).
    #[error("internal error: {message}")]
    #[diagnostic(code(burrow::internal))]
    Internal {
        /// The error message.
        message: String,
    },
}
