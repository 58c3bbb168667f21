//! Encryption engine lifecycle
//!
//! [`EncryptionManager`] owns the engine handle bound to the active chain:
//! local chains get a simulation engine synchronously, other chains go
//! through asynchronous gateway provisioning with cancellation. A
//! generation counter guards against late-arriving results from
//! superseded provisioning cycles and invalidates builders that outlive a
//! reinitialization.

pub mod input;
pub mod provision;

use crate::config::ClientConfig;
use crate::session::WalletSession;
use crate::{Error, Result};
use alloy::primitives::{Address, Bytes, B256, U256};
use futures::future::{AbortHandle, Abortable, Aborted};
use input::{EncryptedInput, EncryptedInputBuilder, ValueWidth};
use provision::{EngineProvisioner, GatewayProvisioner};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lifecycle phase of the engine bound to the active chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineStatus {
    #[default]
    Idle,
    Initializing,
    Ready,
    Error,
}

/// Observable engine lifecycle state.
///
/// Invariant: `engine` is present exactly when `status == Ready`, and the
/// engine's bound chain equals `chain_id`.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub chain_id: Option<u64>,
    pub status: EngineStatus,
    pub engine: Option<Engine>,
    pub error: Option<Arc<Error>>,
    pub generation: u64,
}

impl EngineState {
    /// True while no engine is available but no failure occurred either
    pub fn is_loading(&self) -> bool {
        matches!(self.status, EngineStatus::Idle | EngineStatus::Initializing)
    }
}

/// Ready encryption backend bound to one chain.
///
/// One capability surface over both backends so calling code is agnostic
/// to whether inputs are simulated or really encrypted.
#[derive(Debug, Clone)]
pub enum Engine {
    Local(LocalEngine),
    Remote(RemoteEngine),
}

impl Engine {
    pub fn chain_id(&self) -> u64 {
        match self {
            Self::Local(e) => e.chain_id(),
            Self::Remote(e) => e.chain_id(),
        }
    }

    /// Start a fresh input draft for `(contract, user)`
    pub fn create_encrypted_input(&self, contract: Address, user: Address) -> EncryptedInputBuilder {
        EncryptedInputBuilder::new(self.clone(), contract, user)
    }

    /// Decrypt one of the caller's own values, gated on a wallet
    /// signature over [`decryption_message`].
    pub async fn user_decrypt(&self, handle: B256, auth: &DecryptionAuth) -> Result<U256> {
        if auth.signature.is_empty() {
            return Err(Error::Decryption("missing wallet signature".to_string()));
        }
        match self {
            Self::Local(e) => e.user_decrypt(handle),
            Self::Remote(e) => e.user_decrypt(handle, auth).await,
        }
    }
}

/// Wallet-signed authorization for a decryption request
#[derive(Debug, Clone)]
pub struct DecryptionAuth {
    pub account: Address,
    pub signature: Bytes,
}

/// Canonical message a user signs to authorize decrypting `handle`
pub fn decryption_message(handle: B256, chain_id: u64) -> String {
    format!("cipherwave: decrypt {handle} on chain {chain_id}")
}

// Handle issuance must survive engine re-creation: a fresh engine after a
// reinitialization may never reissue a handle an older engine produced.
static NEXT_LOCAL_HANDLE: AtomicU64 = AtomicU64::new(0);

/// Simulation engine for local dev chains.
///
/// Produces unique, order-preserving handles from a process-wide counter
/// and records handle -> plaintext so local decryption round-trips. No
/// cryptography.
#[derive(Debug, Clone)]
pub struct LocalEngine {
    chain_id: u64,
    plaintexts: Arc<Mutex<HashMap<B256, u128>>>,
}

impl LocalEngine {
    pub(crate) fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            plaintexts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub(crate) fn finalize(
        &self,
        contract: Address,
        user: Address,
        values: &[(ValueWidth, u128)],
    ) -> EncryptedInput {
        let mut plaintexts = self.plaintexts.lock().expect("plaintext map lock poisoned");
        let handles = values
            .iter()
            .map(|(_, magnitude)| {
                let n = NEXT_LOCAL_HANDLE.fetch_add(1, Ordering::Relaxed) + 1;
                let mut raw = [0u8; 32];
                raw[24..].copy_from_slice(&n.to_be_bytes());
                let handle = B256::from(raw);
                plaintexts.insert(handle, *magnitude);
                handle
            })
            .collect();

        debug!(
            chain_id = self.chain_id,
            contract = %contract,
            user = %user,
            values = values.len(),
            "simulated encryption"
        );

        EncryptedInput {
            handles,
            // Placeholder; the dev-node contract accepts any proof
            proof: Bytes::new(),
        }
    }

    fn user_decrypt(&self, handle: B256) -> Result<U256> {
        self.plaintexts
            .lock()
            .expect("plaintext map lock poisoned")
            .get(&handle)
            .map(|v| U256::from(*v))
            .ok_or_else(|| Error::Decryption(format!("unknown handle {handle}")))
    }
}

/// Real engine provisioned from the FHE gateway
#[derive(Debug, Clone)]
pub struct RemoteEngine {
    chain_id: u64,
    gateway_url: String,
    public_key: Bytes,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct InputEntry {
    bits: u32,
    value: String,
}

#[derive(Serialize)]
struct InputProofRequest {
    contract_address: String,
    user_address: String,
    chain_id: u64,
    inputs: Vec<InputEntry>,
}

#[derive(Deserialize)]
struct InputProofResponse {
    handles: Vec<String>,
    input_proof: String,
}

#[derive(Serialize)]
struct DecryptRequest {
    handle: String,
    chain_id: u64,
    account: String,
    signature: String,
}

#[derive(Deserialize)]
struct DecryptResponse {
    value: String,
}

impl RemoteEngine {
    pub(crate) fn new(
        chain_id: u64,
        gateway_url: String,
        public_key: Bytes,
        http: reqwest::Client,
    ) -> Self {
        Self {
            chain_id,
            gateway_url,
            public_key,
            http,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// FHE public key this engine was provisioned with
    pub fn public_key(&self) -> &Bytes {
        &self.public_key
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.gateway_url.trim_end_matches('/'))
    }

    pub(crate) async fn finalize(
        &self,
        contract: Address,
        user: Address,
        values: &[(ValueWidth, u128)],
    ) -> Result<EncryptedInput> {
        let request = InputProofRequest {
            contract_address: format!("{contract:#x}"),
            user_address: format!("{user:#x}"),
            chain_id: self.chain_id,
            inputs: values
                .iter()
                .map(|(width, magnitude)| InputEntry {
                    bits: width.bits(),
                    value: magnitude.to_string(),
                })
                .collect(),
        };

        let response: InputProofResponse = self
            .http
            .post(self.endpoint("/v1/input-proof"))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.handles.len() != values.len() {
            return Err(Error::Rpc(format!(
                "gateway returned {} handles for {} values",
                response.handles.len(),
                values.len()
            )));
        }

        let handles = response
            .handles
            .iter()
            .map(|s| {
                s.parse::<B256>()
                    .map_err(|e| Error::Rpc(format!("bad handle {s}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let proof = response
            .input_proof
            .parse::<Bytes>()
            .map_err(|e| Error::Rpc(format!("bad proof: {e}")))?;

        Ok(EncryptedInput { handles, proof })
    }

    async fn user_decrypt(&self, handle: B256, auth: &DecryptionAuth) -> Result<U256> {
        let request = DecryptRequest {
            handle: format!("{handle}"),
            chain_id: self.chain_id,
            account: format!("{:#x}", auth.account),
            signature: format!("{}", auth.signature),
        };

        let response: DecryptResponse = self
            .http
            .post(self.endpoint("/v1/user-decrypt"))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .value
            .parse::<U256>()
            .map_err(|e| Error::Decryption(format!("bad plaintext {}: {e}", response.value)))
    }
}

struct ManagerInner {
    config: ClientConfig,
    provisioner: Arc<dyn EngineProvisioner>,
    state: watch::Sender<EngineState>,
    generation: Arc<AtomicU64>,
    inflight: Mutex<Option<AbortHandle>>,
}

/// Drives the engine lifecycle from session snapshots
#[derive(Clone)]
pub struct EncryptionManager {
    inner: Arc<ManagerInner>,
}

impl EncryptionManager {
    pub fn new(config: ClientConfig, provisioner: Arc<dyn EngineProvisioner>) -> Self {
        let (state, _) = watch::channel(EngineState::default());
        Self {
            inner: Arc::new(ManagerInner {
                config,
                provisioner,
                state,
                generation: Arc::new(AtomicU64::new(0)),
                inflight: Mutex::new(None),
            }),
        }
    }

    /// Manager with the default gateway-backed provisioner
    pub fn with_gateway(config: ClientConfig) -> Self {
        Self::new(config, Arc::new(GatewayProvisioner::new()))
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        self.inner.state.borrow().clone()
    }

    /// Observe lifecycle transitions (progress display only)
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.inner.state.subscribe()
    }

    /// Reconcile the engine with the session's chain.
    ///
    /// Idempotent for a chain the manager is already bound to (or busy
    /// provisioning for); a chain change supersedes any in-flight cycle.
    /// Remote provisioning is spawned on the current tokio runtime.
    pub fn sync(&self, session: &WalletSession) {
        let Some(chain_id) = session.chain_id else {
            return;
        };

        let mut inflight = self.inner.inflight.lock().expect("engine lock poisoned");
        {
            let state = self.inner.state.borrow();
            if state.chain_id == Some(chain_id) && state.status != EngineStatus::Idle {
                return;
            }
        }
        self.begin_cycle(&mut inflight, chain_id, session);
    }

    /// Discard the current engine and force a fresh provisioning cycle,
    /// even from `Ready`.
    pub fn reinitialize(&self, session: &WalletSession) {
        info!("engine reinitialization requested");
        let mut inflight = self.inner.inflight.lock().expect("engine lock poisoned");
        if let Some(handle) = inflight.take() {
            handle.abort();
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_state(EngineState {
            generation,
            ..EngineState::default()
        });

        if let Some(chain_id) = session.chain_id {
            self.begin_cycle(&mut inflight, chain_id, session);
        }
    }

    /// Builder from the ready engine, stamped with the current generation
    pub fn create_encrypted_input(
        &self,
        contract: Address,
        user: Address,
    ) -> Result<EncryptedInputBuilder> {
        let state = self.inner.state.borrow().clone();
        let engine = state.engine.ok_or(Error::EngineNotReady)?;

        Ok(engine
            .create_encrypted_input(contract, user)
            .with_epoch(state.generation, Arc::clone(&self.inner.generation)))
    }

    /// Re-run [`Self::sync`] on every session change
    pub fn spawn_session_watcher(
        &self,
        mut sessions: watch::Receiver<WalletSession>,
    ) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                let session = sessions.borrow_and_update().clone();
                manager.sync(&session);
                if sessions.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    fn begin_cycle(
        &self,
        inflight: &mut Option<AbortHandle>,
        chain_id: u64,
        session: &WalletSession,
    ) {
        if let Some(handle) = inflight.take() {
            debug!("aborting superseded provisioning task");
            handle.abort();
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // Pass through idle so observers see the reset
        if self.inner.state.borrow().status != EngineStatus::Idle {
            self.set_state(EngineState {
                generation,
                ..EngineState::default()
            });
        }

        if self.inner.config.bindings.is_local(chain_id) {
            info!(chain_id, "using local simulation engine");
            self.set_state(EngineState {
                chain_id: Some(chain_id),
                status: EngineStatus::Ready,
                engine: Some(Engine::Local(LocalEngine::new(chain_id))),
                error: None,
                generation,
            });
            return;
        }

        if session.transport.is_none() {
            debug!(chain_id, "no transport yet, engine stays idle");
            return;
        }

        self.set_state(EngineState {
            chain_id: Some(chain_id),
            status: EngineStatus::Initializing,
            engine: None,
            error: None,
            generation,
        });

        let (abort, registration) = AbortHandle::new_pair();
        *inflight = Some(abort);

        let manager = self.clone();
        let provisioner = Arc::clone(&self.inner.provisioner);
        let endpoint = self.inner.config.gateway_url.clone();
        tokio::spawn(async move {
            let provisioning =
                Abortable::new(provisioner.provision(&endpoint, chain_id), registration);
            match provisioning.await {
                Ok(result) => manager.complete(generation, chain_id, result),
                Err(Aborted) => debug!(chain_id, "provisioning cancelled"),
            }
        });
    }

    fn complete(&self, generation: u64, chain_id: u64, result: Result<RemoteEngine>) {
        let mut inflight = self.inner.inflight.lock().expect("engine lock poisoned");

        // Late-arrival guard: a superseded cycle must not overwrite newer
        // state, whatever its outcome was.
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            debug!(chain_id, "stale provisioning result ignored");
            return;
        }
        *inflight = None;

        match result {
            Ok(engine) if engine.chain_id() == chain_id => {
                info!(chain_id, "encryption engine provisioned");
                self.set_state(EngineState {
                    chain_id: Some(chain_id),
                    status: EngineStatus::Ready,
                    engine: Some(Engine::Remote(engine)),
                    error: None,
                    generation,
                });
            }
            Ok(engine) => {
                let error = Error::Provisioning(format!(
                    "engine bound to chain {}, requested {chain_id}",
                    engine.chain_id()
                ));
                warn!(%error, "provisioning returned a mismatched engine");
                self.fail(chain_id, generation, error);
            }
            Err(error) => {
                warn!(chain_id, %error, "engine provisioning failed");
                self.fail(chain_id, generation, error);
            }
        }
    }

    fn fail(&self, chain_id: u64, generation: u64, error: Error) {
        self.set_state(EngineState {
            chain_id: Some(chain_id),
            status: EngineStatus::Error,
            engine: None,
            error: Some(Arc::new(error)),
            generation,
        });
    }

    fn set_state(&self, next: EngineState) {
        let previous = self.inner.state.send_replace(next);
        let current = self.inner.state.borrow();
        if previous.status != current.status {
            info!(
                from = ?previous.status,
                to = ?current.status,
                chain_id = ?current.chain_id,
                "engine status changed"
            );
        }
    }
}
