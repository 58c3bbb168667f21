//! Cipherwave client core
//!
//! Wallet-facing plumbing for contracts that compute on encrypted values:
//! - Track the injected wallet session (accounts, chain, connection)
//! - Derive read/write signer contexts from the live session
//! - Provision an encryption engine per chain, with cancellation on
//!   chain switches
//! - Draft encrypted inputs and decrypt the caller's own values
//!
//! # Trust model
//!
//! - Writes go through the wallet so a human confirms every transaction
//! - Reads on local chains bypass the wallet to avoid stale cached calls
//! - Dev-account private keys exist only behind the `local-accounts`
//!   feature and never apply to a chain without a local RPC binding
//! - Decryption of a user's own values requires a wallet signature

pub mod config;
pub mod engine;
pub mod session;
pub mod signer;
pub mod transport;
#[cfg(feature = "local-accounts")]
pub mod wallet;

mod error;

// Re-export commonly used types
pub use config::{chains, ChainBindings, ClientConfig};
pub use engine::input::{EncryptedInput, EncryptedInputBuilder, ValueWidth};
pub use engine::provision::{EngineProvisioner, GatewayProvisioner};
pub use engine::{
    decryption_message, DecryptionAuth, EncryptionManager, Engine, EngineState, EngineStatus,
    LocalEngine, RemoteEngine,
};
pub use error::{Error, Result};
pub use session::{SessionManager, WalletSession};
pub use signer::{
    DirectWriteContext, ReadContext, SignerBundle, SignerResolver, WriteContext,
};
pub use transport::{NodeBackedTransport, WalletEvent, WalletRpc, WalletTransport};
