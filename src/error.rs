//! Error types for the cipherwave client

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("wallet provider is not installed")]
    ProviderAbsent,

    #[error("wallet session is not connected")]
    NotConnected,

    #[error("transport request failed: {0}")]
    Transport(String),

    #[error("invalid RPC response: {0}")]
    Rpc(String),

    #[error("engine provisioning failed: {0}")]
    Provisioning(String),

    #[error("encryption engine is not ready")]
    EngineNotReady,

    #[error("encryption engine was superseded by a reinitialization")]
    EngineSuperseded,

    #[error("encrypted input draft already finalized")]
    DraftReused,

    #[error("value {value} does not fit in {bits} bits")]
    ValueOutOfRange { bits: u32, value: u128 },

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
