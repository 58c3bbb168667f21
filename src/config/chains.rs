//! Local chain bindings
//!
//! Maps the recognized local development chain IDs to their JSON-RPC
//! endpoints. Any chain ID outside this table is treated as a production
//! chain: reads go through the wallet transport and real engine
//! provisioning is required.
//!
//! # Examples
//!
//! ```bash
//! # Override the endpoint for both local chains
//! export LOCAL_RPC_URL="http://127.0.0.1:9545"
//!
//! # Or per chain
//! export HARDHAT_RPC_URL="http://127.0.0.1:8545"
//! export DEV_RPC_URL="http://127.0.0.1:7545"
//! ```

use std::collections::HashMap;

/// Hardhat network default chain ID
pub const HARDHAT: u64 = 31337;
/// Legacy localhost / Ganache default chain ID
pub const DEV: u64 = 1337;

/// Environment variable names
mod env_vars {
    // Applies to both local chains unless a per-chain var is set
    pub const LOCAL_RPC_URL: &str = "LOCAL_RPC_URL";

    pub const HARDHAT_RPC_URL: &str = "HARDHAT_RPC_URL";
    pub const DEV_RPC_URL: &str = "DEV_RPC_URL";
}

const DEFAULT_LOCAL_RPC: &str = "http://127.0.0.1:8545";

/// Endpoint table for the recognized local development chains.
///
/// The key set defines what counts as a local chain; the values are the
/// direct JSON-RPC endpoints used for reads and for the bypass signer.
#[derive(Debug, Clone)]
pub struct ChainBindings {
    urls: HashMap<u64, String>,
}

impl ChainBindings {
    /// Build bindings from environment variables, falling back to the
    /// standard dev-node endpoint for both recognized chains.
    pub fn from_env() -> Self {
        let shared = std::env::var(env_vars::LOCAL_RPC_URL)
            .unwrap_or_else(|_| DEFAULT_LOCAL_RPC.to_string());

        let mut urls = HashMap::new();
        urls.insert(
            HARDHAT,
            std::env::var(env_vars::HARDHAT_RPC_URL).unwrap_or_else(|_| shared.clone()),
        );
        urls.insert(
            DEV,
            std::env::var(env_vars::DEV_RPC_URL).unwrap_or_else(|_| shared.clone()),
        );

        Self { urls }
    }

    /// Create with an explicit chain -> endpoint table
    pub fn with_urls(urls: HashMap<u64, String>) -> Self {
        Self { urls }
    }

    /// Direct RPC endpoint for a local chain, if the chain is recognized
    pub fn local_rpc(&self, chain_id: u64) -> Option<&str> {
        self.urls.get(&chain_id).map(|s| s.as_str())
    }

    /// Whether a chain ID denotes a local development network
    pub fn is_local(&self, chain_id: u64) -> bool {
        self.urls.contains_key(&chain_id)
    }

    /// All recognized local chain IDs
    pub fn chains(&self) -> impl Iterator<Item = &u64> {
        self.urls.keys()
    }
}

impl Default for ChainBindings {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_both_local_chains() {
        let bindings = ChainBindings::from_env();

        assert!(bindings.is_local(HARDHAT));
        assert!(bindings.is_local(DEV));
        assert!(bindings.local_rpc(HARDHAT).is_some());
    }

    #[test]
    fn production_chains_are_not_local() {
        let bindings = ChainBindings::from_env();

        assert!(!bindings.is_local(1));
        assert!(!bindings.is_local(11155111));
        assert_eq!(bindings.local_rpc(1), None);
    }

    #[test]
    fn explicit_urls_define_the_local_set() {
        let mut urls = HashMap::new();
        urls.insert(31337, "http://localhost:9000".to_string());
        let bindings = ChainBindings::with_urls(urls);

        assert!(bindings.is_local(31337));
        assert!(!bindings.is_local(1337));
        assert_eq!(bindings.local_rpc(31337), Some("http://localhost:9000"));
    }
}
