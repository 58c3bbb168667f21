//! Injected wallet transport
//!
//! Models the EIP-1193 surface the rest of the crate consumes: a
//! request/response call plus `accountsChanged` / `chainChanged`
//! notifications. Only [`crate::session::SessionManager`] issues
//! connection-lifecycle calls against a transport; everything else reads
//! through derived signer contexts.

use crate::{Error, Result};
use alloy::hex;
use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Provider-level notification, delivered with a fresh value
#[derive(Debug, Clone)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
}

/// EIP-1193-like wallet transport
#[async_trait]
pub trait WalletTransport: Send + Sync {
    /// Issue a JSON-RPC request through the wallet
    async fn request(&self, method: &str, params: Value) -> Result<Value>;

    /// Subscribe to provider notifications
    fn events(&self) -> broadcast::Receiver<WalletEvent>;
}

/// Thin typed wrapper over a shared wallet transport
#[derive(Clone)]
pub struct WalletRpc {
    transport: Arc<dyn WalletTransport>,
}

impl WalletRpc {
    pub fn new(transport: Arc<dyn WalletTransport>) -> Self {
        Self { transport }
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.transport.request(method, params).await
    }
}

impl std::fmt::Debug for WalletRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletRpc").finish_non_exhaustive()
    }
}

fn expect_str(value: &Value) -> Result<&str> {
    value
        .as_str()
        .ok_or_else(|| Error::Rpc(format!("expected string, got {value}")))
}

/// Parse a `0x`-prefixed quantity ("0x7a69" -> 31337)
pub(crate) fn parse_quantity(value: &Value) -> Result<u64> {
    let s = expect_str(value)?;
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| Error::Rpc(format!("quantity missing 0x prefix: {s}")))?;
    u64::from_str_radix(digits, 16).map_err(|e| Error::Rpc(format!("bad quantity {s}: {e}")))
}

/// Parse a hex-encoded byte string
pub(crate) fn parse_bytes(value: &Value) -> Result<Bytes> {
    let s = expect_str(value)?;
    let raw = hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|e| Error::Rpc(format!("bad hex {s}: {e}")))?;
    Ok(Bytes::from(raw))
}

/// Parse a 32-byte hash
pub(crate) fn parse_b256(value: &Value) -> Result<B256> {
    let s = expect_str(value)?;
    B256::from_str(s).map_err(|e| Error::Rpc(format!("bad hash {s}: {e}")))
}

/// Parse an array of account addresses
pub(crate) fn parse_addresses(value: &Value) -> Result<Vec<Address>> {
    let entries = value
        .as_array()
        .ok_or_else(|| Error::Rpc(format!("expected account array, got {value}")))?;

    entries
        .iter()
        .map(|entry| {
            let s = expect_str(entry)?;
            Address::from_str(s).map_err(|e| Error::Rpc(format!("bad address {s}: {e}")))
        })
        .collect()
}

/// Injected-wallet stand-in backed by a local dev node.
///
/// Answers the account/chain discovery methods locally and forwards
/// everything else as plain JSON-RPC to the node, which keeps the rest of
/// the pipeline agnostic to whether a browser wallet is present. Intended
/// for harnesses and integration testing against Hardhat-style nodes.
pub struct NodeBackedTransport {
    rpc_url: String,
    chain_id: u64,
    accounts: Vec<Address>,
    http: reqwest::Client,
    events: broadcast::Sender<WalletEvent>,
    next_id: AtomicU64,
}

impl NodeBackedTransport {
    pub fn new(rpc_url: impl Into<String>, chain_id: u64, accounts: Vec<Address>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            rpc_url: rpc_url.into(),
            chain_id,
            accounts,
            http: reqwest::Client::new(),
            events,
            next_id: AtomicU64::new(1),
        }
    }

    /// Simulate the user switching accounts in the wallet
    pub fn emit_accounts_changed(&self, accounts: Vec<Address>) {
        let _ = self.events.send(WalletEvent::AccountsChanged(accounts));
    }

    /// Simulate the wallet switching networks
    pub fn emit_chain_changed(&self, chain_id: u64) {
        let _ = self.events.send(WalletEvent::ChainChanged(chain_id));
    }

    async fn forward(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response: Value = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.get("error") {
            return Err(Error::Transport(format!("{method}: {error}")));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| Error::Rpc(format!("{method}: response missing result")))
    }
}

#[async_trait]
impl WalletTransport for NodeBackedTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        match method {
            "eth_requestAccounts" | "eth_accounts" => {
                let accounts: Vec<String> =
                    self.accounts.iter().map(|a| format!("{a:#x}")).collect();
                Ok(json!(accounts))
            }
            "eth_chainId" => Ok(json!(format!("{:#x}", self.chain_id))),
            _ => self.forward(method, params).await,
        }
    }

    fn events(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted in-memory transport for unit tests
    pub(crate) struct MockTransport {
        pub chain_id: Mutex<u64>,
        pub accounts: Mutex<Vec<Address>>,
        pub requests: Mutex<Vec<String>>,
        pub responses: Mutex<HashMap<String, Value>>,
        pub failures: Mutex<Vec<String>>,
        pub events: broadcast::Sender<WalletEvent>,
    }

    impl MockTransport {
        pub(crate) fn new(chain_id: u64, accounts: Vec<Address>) -> Arc<Self> {
            let (events, _) = broadcast::channel(16);
            Arc::new(Self {
                chain_id: Mutex::new(chain_id),
                accounts: Mutex::new(accounts),
                requests: Mutex::new(Vec::new()),
                responses: Mutex::new(HashMap::new()),
                failures: Mutex::new(Vec::new()),
                events,
            })
        }

        pub(crate) fn request_count(&self, method: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.as_str() == method)
                .count()
        }
    }

    #[async_trait]
    impl WalletTransport for MockTransport {
        async fn request(&self, method: &str, _params: Value) -> Result<Value> {
            self.requests.lock().unwrap().push(method.to_string());

            if self.failures.lock().unwrap().iter().any(|m| m == method) {
                return Err(Error::Transport(format!("scripted failure for {method}")));
            }

            if let Some(canned) = self.responses.lock().unwrap().get(method) {
                return Ok(canned.clone());
            }

            match method {
                "eth_requestAccounts" | "eth_accounts" => {
                    let accounts: Vec<String> = self
                        .accounts
                        .lock()
                        .unwrap()
                        .iter()
                        .map(|a| format!("{a:#x}"))
                        .collect();
                    Ok(json!(accounts))
                }
                "eth_chainId" => Ok(json!(format!("{:#x}", *self.chain_id.lock().unwrap()))),
                "personal_sign" => Ok(json!(format!("0x{}", "11".repeat(65)))),
                "eth_call" => Ok(json!("0x")),
                "eth_sendTransaction" => Ok(json!(format!("0x{}", "22".repeat(32)))),
                other => Err(Error::Transport(format!("unhandled method {other}"))),
            }
        }

        fn events(&self) -> broadcast::Receiver<WalletEvent> {
            self.events.subscribe()
        }
    }
}
