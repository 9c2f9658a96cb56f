//! Manager configuration.

/// Default bridge device name.
pub const DEFAULT_BRIDGE: &str = "burrow0";

/// Configuration options for the network manager.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Name of the bridge device to use or create.
    pub bridge: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bridge: DEFAULT_BRIDGE.to_string(),
        }
    }
}

impl NetworkConfig {
    /// Use a different bridge device.
    #[must_use]
    pub fn with_bridge(mut self, bridge: impl Into<String>) -> Self {
        self.bridge = bridge.into();
        self
    }
}
