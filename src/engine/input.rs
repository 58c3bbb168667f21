//! Encrypted input drafting
//!
//! A short-lived, per-submission builder obtained from a ready engine
//! handle. Plaintext values accumulate in call order and are finalized
//! exactly once into ciphertext handles plus one joint validity proof.

use crate::engine::Engine;
use crate::{Error, Result};
use alloy::primitives::{Address, Bytes, B256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Declared width of one encrypted value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueWidth {
    U8,
    U16,
    U32,
    U64,
}

impl ValueWidth {
    pub const fn bits(self) -> u32 {
        match self {
            Self::U8 => 8,
            Self::U16 => 16,
            Self::U32 => 32,
            Self::U64 => 64,
        }
    }

    pub const fn max_value(self) -> u128 {
        (1u128 << self.bits()) - 1
    }
}

/// Finalized ciphertext material, ready to pass to a contract call.
///
/// `handles` preserves the insertion order of the accumulated values;
/// `proof` covers all handles jointly.
#[derive(Debug, Clone)]
pub struct EncryptedInput {
    pub handles: Vec<B256>,
    pub proof: Bytes,
}

/// Accumulates typed plaintext values for one submission.
///
/// The draft is consumed exactly once by [`Self::finalize`]; adding values
/// afterwards, or finalizing twice, fails with [`Error::DraftReused`].
pub struct EncryptedInputBuilder {
    engine: Engine,
    contract: Address,
    user: Address,
    values: Vec<(ValueWidth, u128)>,
    finalized: bool,
    // Generation stamp from the owning manager; a builder outliving a
    // reinitialization must fail fast rather than use a stale engine.
    epoch: Option<(u64, Arc<AtomicU64>)>,
}

impl EncryptedInputBuilder {
    pub(crate) fn new(engine: Engine, contract: Address, user: Address) -> Self {
        Self {
            engine,
            contract,
            user,
            values: Vec::new(),
            finalized: false,
            epoch: None,
        }
    }

    pub(crate) fn with_epoch(mut self, generation: u64, counter: Arc<AtomicU64>) -> Self {
        self.epoch = Some((generation, counter));
        self
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn user(&self) -> Address {
        self.user
    }

    /// Number of values accumulated so far
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Append one value to the draft.
    ///
    /// Magnitudes are unsigned and must fit the declared width;
    /// out-of-range values are rejected, never truncated, and leave the
    /// draft otherwise usable.
    pub fn add_value(&mut self, width: ValueWidth, magnitude: u128) -> Result<&mut Self> {
        if self.finalized {
            return Err(Error::DraftReused);
        }
        if magnitude > width.max_value() {
            return Err(Error::ValueOutOfRange {
                bits: width.bits(),
                value: magnitude,
            });
        }
        self.values.push((width, magnitude));
        Ok(self)
    }

    /// Append a 32-bit value
    pub fn add32(&mut self, value: u32) -> Result<&mut Self> {
        self.add_value(ValueWidth::U32, value as u128)
    }

    /// Append a 64-bit value
    pub fn add64(&mut self, value: u64) -> Result<&mut Self> {
        self.add_value(ValueWidth::U64, value as u128)
    }

    /// Consume the draft, producing one handle per value (in insertion
    /// order) and a joint validity proof.
    ///
    /// The draft counts as consumed even when encryption fails; callers
    /// retry with a fresh builder.
    pub async fn finalize(&mut self) -> Result<EncryptedInput> {
        if self.finalized {
            return Err(Error::DraftReused);
        }
        self.finalized = true;

        if let Some((generation, counter)) = &self.epoch {
            if counter.load(Ordering::SeqCst) != *generation {
                return Err(Error::EngineSuperseded);
            }
        }

        match &self.engine {
            Engine::Local(local) => Ok(local.finalize(self.contract, self.user, &self.values)),
            Engine::Remote(remote) => {
                remote
                    .finalize(self.contract, self.user, &self.values)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LocalEngine;
    use std::str::FromStr;

    fn builder() -> EncryptedInputBuilder {
        let engine = Engine::Local(LocalEngine::new(31337));
        let contract = Address::from_str("0x5fbdb2315678afecb367f032d93f642f64180aa3").unwrap();
        let user = Address::from_str("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266").unwrap();
        engine.create_encrypted_input(contract, user)
    }

    #[test]
    fn handles_match_insertion_order_and_count() {
        let mut b = builder();
        b.add64(7_000_000_000).unwrap();
        b.add32(1_700_000_000).unwrap();

        let input = tokio_test::block_on(b.finalize()).unwrap();
        assert_eq!(input.handles.len(), 2);
        assert_ne!(input.handles[0], input.handles[1]);
        // The counter is monotonic, so position in the handle vector
        // follows insertion order
        assert!(input.handles[0] < input.handles[1]);
    }

    #[test]
    fn finalize_twice_is_draft_reuse() {
        let mut b = builder();
        b.add64(1).unwrap();

        tokio_test::block_on(b.finalize()).unwrap();
        assert!(matches!(
            tokio_test::block_on(b.finalize()),
            Err(Error::DraftReused)
        ));
        assert!(matches!(b.add32(5), Err(Error::DraftReused)));
    }

    #[test]
    fn rejects_out_of_range_magnitudes() {
        let mut b = builder();

        assert!(matches!(
            b.add_value(ValueWidth::U32, 1u128 << 32),
            Err(Error::ValueOutOfRange { bits: 32, .. })
        ));
        // One past max fails, max itself succeeds
        b.add_value(ValueWidth::U32, (1u128 << 32) - 1).unwrap();

        // The draft survives a rejected value
        b.add64(9).unwrap();
        let input = tokio_test::block_on(b.finalize()).unwrap();
        assert_eq!(input.handles.len(), 2);
    }

    #[test]
    fn supports_chained_calls() {
        let mut b = builder();
        b.add64(1).unwrap().add32(2).unwrap().add32(3).unwrap();
        assert_eq!(b.len(), 3);
    }

    #[test]
    fn width_limits() {
        assert_eq!(ValueWidth::U8.max_value(), 255);
        assert_eq!(ValueWidth::U32.max_value(), u32::MAX as u128);
        assert_eq!(ValueWidth::U64.max_value(), u64::MAX as u128);
    }
}
