//! Signer resolution
//!
//! Derives read and write execution contexts from the current
//! [`WalletSession`]. Reads on local chains bypass the wallet transport
//! (wallets cache view-call results against dev nodes, which produces
//! stale reads); writes always go through the wallet so a human confirms
//! them. On local chains a recognized dev account additionally gets a
//! private-key bypass signer that sidesteps the wallet's request-rate
//! limits.

use crate::config::ChainBindings;
use crate::session::{DerivationKey, WalletSession};
use crate::transport::{parse_b256, parse_bytes, parse_quantity, WalletRpc};
use crate::{Error, Result};
use alloy::hex;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Contract-call-capable read handle bound to the best available transport
#[derive(Clone, Debug)]
pub enum ReadContext {
    /// Reads through the injected wallet (production chains)
    Wallet(WalletRpc),
    /// Direct reads against a local node (local chains)
    Node(DynProvider),
}

impl ReadContext {
    fn node(rpc_url: &str) -> Result<Self> {
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e| Error::Config(format!("invalid local RPC url {rpc_url}: {e}")))?;
        Ok(Self::Node(ProviderBuilder::new().connect_http(url).erased()))
    }

    /// Execute an `eth_call`
    pub async fn call(&self, tx: TransactionRequest) -> Result<Bytes> {
        match self {
            Self::Wallet(rpc) => {
                let params = json!([serde_json::to_value(&tx)?, "latest"]);
                parse_bytes(&rpc.request("eth_call", params).await?)
            }
            Self::Node(provider) => provider
                .call(tx)
                .await
                .map_err(|e| Error::Rpc(e.to_string())),
        }
    }

    /// Current block height
    pub async fn block_number(&self) -> Result<u64> {
        match self {
            Self::Wallet(rpc) => parse_quantity(&rpc.request("eth_blockNumber", json!([])).await?),
            Self::Node(provider) => provider
                .get_block_number()
                .await
                .map_err(|e| Error::Rpc(e.to_string())),
        }
    }
}

/// Transacting handle bound to the wallet's active account
#[derive(Clone, Debug)]
pub struct WriteContext {
    rpc: WalletRpc,
    account: Address,
}

impl WriteContext {
    pub fn account(&self) -> Address {
        self.account
    }

    /// Submit a transaction through the wallet; the wallet prompts the
    /// user and signs with the active account.
    pub async fn send_transaction(&self, mut tx: TransactionRequest) -> Result<B256> {
        tx.from = Some(self.account);
        let value = self
            .rpc
            .request("eth_sendTransaction", json!([serde_json::to_value(&tx)?]))
            .await?;
        parse_b256(&value)
    }

    /// Sign an arbitrary message with the active account (`personal_sign`)
    pub async fn sign_message(&self, message: &str) -> Result<Bytes> {
        let data = format!("0x{}", hex::encode(message.as_bytes()));
        let value = self
            .rpc
            .request("personal_sign", json!([data, format!("{:#x}", self.account)]))
            .await?;
        parse_bytes(&value)
    }
}

/// Private-key-backed signer over a local RPC endpoint.
///
/// Exists only as a performance escape hatch for local testing; it is
/// never built for a chain without a configured local endpoint.
#[derive(Clone)]
pub struct DirectWriteContext {
    address: Address,
    signer: PrivateKeySigner,
    provider: DynProvider,
}

impl DirectWriteContext {
    pub fn new(signer: PrivateKeySigner, rpc_url: &str) -> Result<Self> {
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e| Error::Config(format!("invalid local RPC url {rpc_url}: {e}")))?;
        let address = signer.address();
        let wallet = alloy::network::EthereumWallet::from(signer.clone());
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(url)
            .erased();

        Ok(Self {
            address,
            signer,
            provider,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Submit a transaction signed locally, without the wallet prompt
    pub async fn send_transaction(&self, mut tx: TransactionRequest) -> Result<B256> {
        tx.from = Some(self.address);
        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| Error::Rpc(e.to_string()))?;
        Ok(*pending.tx_hash())
    }

    /// Sign a message locally (EIP-191), no wallet round trip
    pub fn sign_message(&self, message: &str) -> Result<Bytes> {
        let signature = self
            .signer
            .sign_message_sync(message.as_bytes())
            .map_err(|e| Error::Wallet(format!("signing failed: {e}")))?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }
}

impl std::fmt::Debug for DirectWriteContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectWriteContext")
            .field("address", &self.address)
            .field("signer", &"[REDACTED]")
            .finish()
    }
}

/// Execution contexts derived from one session snapshot
#[derive(Clone, Debug)]
pub struct SignerBundle {
    pub read: ReadContext,
    pub write: WriteContext,
    /// Present only on a local chain when the active account is in the
    /// dev registry. Absence is a capability gap, not an error.
    pub direct_write: Option<DirectWriteContext>,
}

/// Builds [`SignerBundle`]s from session snapshots, rebuilding only when
/// the `(transport, chain, accounts, connected)` tuple actually changes.
pub struct SignerResolver {
    bindings: ChainBindings,
    cache: Mutex<Option<(DerivationKey, Option<SignerBundle>)>>,
    rebuilds: AtomicU64,
}

impl SignerResolver {
    pub fn new(bindings: ChainBindings) -> Self {
        Self {
            bindings,
            cache: Mutex::new(None),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// Derive the signer bundle for a session snapshot.
    ///
    /// Returns `Ok(None)` when there is no usable session (no transport,
    /// no chain, no accounts, or not connected) — a distinct state from a
    /// session that merely lacks write capability.
    pub fn resolve(&self, session: &WalletSession) -> Result<Option<SignerBundle>> {
        let key = session.derivation_key();

        let mut cache = self.cache.lock().expect("signer cache lock poisoned");
        if let Some((cached_key, bundle)) = cache.as_ref() {
            if *cached_key == key {
                return Ok(bundle.clone());
            }
        }

        let bundle = self.build(session)?;
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        *cache = Some((key, bundle.clone()));
        Ok(bundle)
    }

    /// Like [`Self::resolve`] but treats an absent session as an error
    pub fn require(&self, session: &WalletSession) -> Result<SignerBundle> {
        self.resolve(session)?.ok_or(Error::NotConnected)
    }

    fn build(&self, session: &WalletSession) -> Result<Option<SignerBundle>> {
        let (Some(transport), Some(chain_id), Some(account), true) = (
            session.transport.clone(),
            session.chain_id,
            session.active_account(),
            session.connected,
        ) else {
            debug!("no usable session, signer bundle absent");
            return Ok(None);
        };

        let rpc = WalletRpc::new(transport);

        let read = match self.bindings.local_rpc(chain_id) {
            Some(url) => ReadContext::node(url)?,
            None => ReadContext::Wallet(rpc.clone()),
        };

        let write = WriteContext {
            rpc,
            account,
        };

        #[cfg(feature = "local-accounts")]
        let direct_write = match self.bindings.local_rpc(chain_id) {
            Some(url) => crate::wallet::direct_write_context(url, account)?,
            None => None,
        };
        #[cfg(not(feature = "local-accounts"))]
        let direct_write = None;

        debug!(
            chain_id,
            account = %account,
            local = self.bindings.is_local(chain_id),
            direct_write = direct_write.is_some(),
            "signer bundle rebuilt"
        );

        Ok(Some(SignerBundle {
            read,
            write,
            direct_write,
        }))
    }

    #[cfg(test)]
    pub(crate) fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use std::collections::HashMap;
    use std::str::FromStr;
    use std::sync::Arc;

    const SEPOLIA: u64 = 11155111;

    fn dev_account() -> Address {
        Address::from_str("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266").unwrap()
    }

    fn unknown_account() -> Address {
        Address::from_str("0x000000000000000000000000000000000000beef").unwrap()
    }

    fn session(chain_id: u64, accounts: Vec<Address>) -> WalletSession {
        let connected = !accounts.is_empty();
        let transport: Arc<dyn crate::transport::WalletTransport> =
            MockTransport::new(chain_id, accounts.clone());
        WalletSession {
            transport: Some(transport),
            chain_id: Some(chain_id),
            accounts,
            connected,
            last_error: None,
        }
    }

    fn resolver() -> SignerResolver {
        let mut urls = HashMap::new();
        urls.insert(31337, "http://127.0.0.1:8545".to_string());
        urls.insert(1337, "http://127.0.0.1:8545".to_string());
        SignerResolver::new(ChainBindings::with_urls(urls))
    }

    #[test]
    fn absent_session_yields_no_bundle() {
        let resolver = resolver();

        assert!(resolver
            .resolve(&WalletSession::default())
            .unwrap()
            .is_none());

        let mut disconnected = session(31337, vec![dev_account()]);
        disconnected.connected = false;
        assert!(resolver.resolve(&disconnected).unwrap().is_none());

        assert!(matches!(
            resolver.require(&WalletSession::default()),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn production_chain_never_gets_direct_write() {
        let resolver = resolver();
        let bundle = resolver
            .resolve(&session(SEPOLIA, vec![dev_account()]))
            .unwrap()
            .unwrap();

        assert!(bundle.direct_write.is_none());
        assert!(matches!(bundle.read, ReadContext::Wallet(_)));
        assert_eq!(bundle.write.account(), dev_account());
    }

    #[test]
    fn local_chain_reads_bypass_the_wallet() {
        let resolver = resolver();
        let bundle = resolver
            .resolve(&session(31337, vec![unknown_account()]))
            .unwrap()
            .unwrap();

        assert!(matches!(bundle.read, ReadContext::Node(_)));
        // Unknown account: read/write still defined, bypass absent
        assert!(bundle.direct_write.is_none());
        assert_eq!(bundle.write.account(), unknown_account());
    }

    #[cfg(feature = "local-accounts")]
    #[test]
    fn every_registry_account_gets_a_bypass_signer() {
        let resolver = resolver();

        for (addr, _) in crate::wallet::registry::entries() {
            let account = Address::from_str(addr).unwrap();
            let bundle = resolver
                .resolve(&session(31337, vec![account]))
                .unwrap()
                .unwrap();

            let direct = bundle.direct_write.expect("registry account");
            assert_eq!(direct.address(), account);
        }
    }

    #[test]
    fn bundle_is_cached_until_the_session_changes() {
        let resolver = resolver();
        let s = session(31337, vec![dev_account()]);

        resolver.resolve(&s).unwrap();
        resolver.resolve(&s).unwrap();
        assert_eq!(resolver.rebuild_count(), 1);

        // Account change forces a rebuild
        let mut changed = s.clone();
        changed.accounts = vec![unknown_account()];
        resolver.resolve(&changed).unwrap();
        assert_eq!(resolver.rebuild_count(), 2);
    }

    #[test]
    fn disconnect_then_reconnect_rebuilds_an_equivalent_bundle() {
        let resolver = resolver();
        let connected = session(31337, vec![dev_account()]);

        let before = resolver.resolve(&connected).unwrap().unwrap();

        let mut dropped = connected.clone();
        dropped.accounts.clear();
        dropped.connected = false;
        assert!(resolver.resolve(&dropped).unwrap().is_none());

        let after = resolver.resolve(&connected).unwrap().unwrap();
        assert_eq!(before.write.account(), after.write.account());
        assert_eq!(
            before.direct_write.is_some(),
            after.direct_write.is_some()
        );
    }
}
