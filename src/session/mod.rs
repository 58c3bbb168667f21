//! Wallet session tracking
//!
//! [`SessionManager`] owns the live wallet connection state and is the only
//! component that issues connection-lifecycle calls against the injected
//! transport. Downstream consumers observe snapshots through a watch
//! channel and re-derive their own state on change; the manager knows
//! nothing about them.

use crate::transport::{parse_addresses, parse_quantity, WalletEvent, WalletTransport};
use crate::{Error, Result};
use alloy::primitives::Address;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Identity tuple used by derived components to detect real change
pub(crate) type DerivationKey = (Option<usize>, Option<u64>, Vec<Address>, bool);

/// Snapshot of the live wallet connection.
///
/// `connected == false` with a present transport means the wallet is
/// installed but has granted no accounts; an absent transport means the
/// wallet is not installed at all. The two must not be conflated.
#[derive(Clone, Default)]
pub struct WalletSession {
    pub transport: Option<Arc<dyn WalletTransport>>,
    pub chain_id: Option<u64>,
    pub accounts: Vec<Address>,
    pub connected: bool,
    pub last_error: Option<String>,
}

impl WalletSession {
    /// First connected account, if any
    pub fn active_account(&self) -> Option<Address> {
        self.accounts.first().copied()
    }

    pub(crate) fn derivation_key(&self) -> DerivationKey {
        (
            self.transport
                .as_ref()
                .map(|t| Arc::as_ptr(t).cast::<()>() as usize),
            self.chain_id,
            self.accounts.clone(),
            self.connected,
        )
    }
}

impl std::fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSession")
            .field("transport_present", &self.transport.is_some())
            .field("chain_id", &self.chain_id)
            .field("accounts", &self.accounts)
            .field("connected", &self.connected)
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// Tracks the injected wallet connection and publishes session snapshots
pub struct SessionManager {
    transport: Option<Arc<dyn WalletTransport>>,
    state: watch::Sender<WalletSession>,
}

impl SessionManager {
    /// Create a manager over an injected transport, or over none when the
    /// wallet is not installed.
    pub fn new(transport: Option<Arc<dyn WalletTransport>>) -> Self {
        let (state, _) = watch::channel(WalletSession {
            transport: transport.clone(),
            ..WalletSession::default()
        });
        Self { transport, state }
    }

    /// Current session snapshot
    pub fn session(&self) -> WalletSession {
        self.state.borrow().clone()
    }

    /// Observe session changes
    pub fn subscribe(&self) -> watch::Receiver<WalletSession> {
        self.state.subscribe()
    }

    /// Request the wallet establish or confirm a connection.
    ///
    /// Idempotent: a no-op when the session is already connected. Fails
    /// with [`Error::ProviderAbsent`] when no transport is installed. A
    /// wallet that grants zero accounts leaves the session present but
    /// disconnected; that is not an error.
    pub async fn connect(&self) -> Result<WalletSession> {
        let Some(transport) = self.transport.clone() else {
            return Err(Error::ProviderAbsent);
        };

        if self.state.borrow().connected {
            debug!("connect: session already connected");
            return Ok(self.session());
        }

        let accounts = match transport.request("eth_requestAccounts", json!([])).await {
            Ok(value) => parse_addresses(&value)?,
            Err(e) => {
                let message = e.to_string();
                self.state
                    .send_modify(|s| s.last_error = Some(message.clone()));
                warn!(error = %message, "wallet connect request failed");
                return Err(e);
            }
        };

        let chain_id = match transport.request("eth_chainId", json!([])).await {
            Ok(value) => parse_quantity(&value)?,
            Err(e) => {
                let message = e.to_string();
                self.state
                    .send_modify(|s| s.last_error = Some(message.clone()));
                warn!(error = %message, "wallet chain query failed");
                return Err(e);
            }
        };

        self.state.send_modify(|s| {
            s.accounts = accounts.clone();
            s.chain_id = Some(chain_id);
            s.connected = !accounts.is_empty();
            s.last_error = None;
        });

        info!(
            chain_id,
            accounts = accounts.len(),
            "wallet session established"
        );
        Ok(self.session())
    }

    /// Apply a provider notification, replacing only the field it carries.
    ///
    /// Updates are atomic per notification and observed in arrival order.
    pub fn handle_event(&self, event: WalletEvent) {
        match event {
            WalletEvent::AccountsChanged(accounts) => {
                debug!(accounts = accounts.len(), "accountsChanged");
                self.state.send_modify(|s| {
                    s.connected = !accounts.is_empty();
                    s.accounts = accounts;
                });
            }
            WalletEvent::ChainChanged(chain_id) => {
                debug!(chain_id, "chainChanged");
                self.state.send_modify(|s| s.chain_id = Some(chain_id));
            }
        }
    }

    /// Drive [`Self::handle_event`] from the transport's notification
    /// stream. Returns `None` when no transport is installed.
    pub fn spawn_event_loop(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        let transport = self.transport.clone()?;
        let manager = Arc::clone(self);

        Some(tokio::spawn(async move {
            let mut events = transport.events();
            loop {
                match events.recv().await {
                    Ok(event) => manager.handle_event(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "wallet event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use std::str::FromStr;

    fn dev_account() -> Address {
        Address::from_str("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266").unwrap()
    }

    fn as_dyn(transport: &Arc<MockTransport>) -> Arc<dyn WalletTransport> {
        transport.clone()
    }

    #[tokio::test]
    async fn connect_populates_session() {
        let transport = MockTransport::new(31337, vec![dev_account()]);
        let manager = SessionManager::new(Some(as_dyn(&transport)));

        let session = manager.connect().await.unwrap();

        assert!(session.connected);
        assert_eq!(session.chain_id, Some(31337));
        assert_eq!(session.accounts, vec![dev_account()]);
        assert!(session.last_error.is_none());
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let transport = MockTransport::new(31337, vec![dev_account()]);
        let manager = SessionManager::new(Some(as_dyn(&transport)));

        manager.connect().await.unwrap();
        manager.connect().await.unwrap();

        assert_eq!(transport.request_count("eth_requestAccounts"), 1);
    }

    #[tokio::test]
    async fn missing_provider_is_distinct_from_zero_accounts() {
        // No wallet installed at all
        let manager = SessionManager::new(None);
        assert!(matches!(
            manager.connect().await,
            Err(Error::ProviderAbsent)
        ));

        // Wallet installed, but no accounts granted
        let transport = MockTransport::new(31337, vec![]);
        let manager = SessionManager::new(Some(as_dyn(&transport)));
        let session = manager.connect().await.unwrap();

        assert!(session.transport.is_some());
        assert!(!session.connected);
        assert!(session.accounts.is_empty());
    }

    #[tokio::test]
    async fn events_replace_single_fields() {
        let transport = MockTransport::new(31337, vec![dev_account()]);
        let manager = SessionManager::new(Some(as_dyn(&transport)));
        manager.connect().await.unwrap();

        manager.handle_event(WalletEvent::ChainChanged(1337));
        let session = manager.session();
        assert_eq!(session.chain_id, Some(1337));
        assert_eq!(session.accounts, vec![dev_account()]);

        manager.handle_event(WalletEvent::AccountsChanged(vec![]));
        let session = manager.session();
        assert!(!session.connected);
        assert!(session.accounts.is_empty());
        // Chain identity survives a disconnect
        assert_eq!(session.chain_id, Some(1337));
    }

    #[tokio::test]
    async fn chain_query_failure_is_recorded() {
        let transport = MockTransport::new(31337, vec![dev_account()]);
        transport
            .failures
            .lock()
            .unwrap()
            .push("eth_chainId".to_string());
        let manager = SessionManager::new(Some(as_dyn(&transport)));

        assert!(manager.connect().await.is_err());
        let session = manager.session();
        assert!(session.last_error.is_some());
        assert!(!session.connected);
    }

    #[tokio::test]
    async fn connect_rejects_malformed_account_response() {
        let transport = MockTransport::new(31337, vec![dev_account()]);
        transport.responses.lock().unwrap().insert(
            "eth_requestAccounts".to_string(),
            serde_json::Value::String("not-an-array".to_string()),
        );
        let manager = SessionManager::new(Some(as_dyn(&transport)));

        assert!(manager.connect().await.is_err());
    }
}
