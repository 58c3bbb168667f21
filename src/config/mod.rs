//! Configuration for the cipherwave client

pub mod chains;

pub use chains::ChainBindings;

/// Gateway endpoint environment variable name
pub const GATEWAY_URL_ENV: &str = "FHEVM_GATEWAY_URL";

const DEFAULT_GATEWAY_URL: &str = "https://gateway.cipherwave.dev";

/// Top-level client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Local chain -> RPC endpoint bindings
    pub bindings: ChainBindings,
    /// FHE gateway used to provision real engines and relay encrypted inputs
    pub gateway_url: String,
}

impl ClientConfig {
    /// Build configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let gateway_url =
            std::env::var(GATEWAY_URL_ENV).unwrap_or_else(|_| DEFAULT_GATEWAY_URL.to_string());

        Self {
            bindings: ChainBindings::from_env(),
            gateway_url,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_gateway_and_local_chains() {
        let config = ClientConfig::default();

        assert!(!config.gateway_url.is_empty());
        assert!(config.bindings.is_local(chains::HARDHAT));
    }
}
