//! Bypass signer construction
//!
//! Builds [`DirectWriteContext`]s from the dev-account registry. Only
//! consulted when the active chain has a configured local RPC endpoint;
//! compiled out of production builds with the `local-accounts` feature.

pub mod registry;

use crate::signer::DirectWriteContext;
use crate::{Error, Result};
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use tracing::debug;

/// Build a private-key-backed write context for a known dev account.
///
/// Returns `Ok(None)` when the account is not in the registry — callers
/// treat that as "direct write unavailable", not a failure.
pub fn direct_write_context(
    rpc_url: &str,
    account: Address,
) -> Result<Option<DirectWriteContext>> {
    let Some(key) = registry::private_key_for(&account) else {
        debug!(account = %account, "account not in dev registry, direct write unavailable");
        return Ok(None);
    };

    let signer: PrivateKeySigner = key
        .parse()
        .map_err(|e| Error::Wallet(format!("invalid registry key: {e}")))?;

    Ok(Some(DirectWriteContext::new(signer, rpc_url)?))
}
