// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transfer records and the values that travel with them.

use std::collections::HashMap;
use std::fmt;

use alloy::primitives::{keccak256, Bytes, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blockchain::{ChainAddress, ChainFamily};
use crate::error::{WitnessError, WitnessResult};

/// Lifecycle of a witnessed transfer.
///
/// `New → Confirmed → Signed → Submitted → Settled`, with `Failed` reachable
/// from every non-terminal state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    New,
    Confirmed,
    Signed,
    Submitted,
    Settled,
    Failed,
}

impl TransferStatus {
    pub const ALL: [TransferStatus; 6] = [
        Self::New,
        Self::Confirmed,
        Self::Signed,
        Self::Submitted,
        Self::Settled,
        Self::Failed,
    ];

    /// Stable single-byte code used in storage keys.
    pub fn code(self) -> u8 {
        match self {
            Self::New => 0,
            Self::Confirmed => 1,
            Self::Signed => 2,
            Self::Submitted => 3,
            Self::Settled => 4,
            Self::Failed => 5,
        }
    }

    pub fn next(self) -> Option<Self> {
        match self {
            Self::New => Some(Self::Confirmed),
            Self::Confirmed => Some(Self::Signed),
            Self::Signed => Some(Self::Submitted),
            Self::Submitted => Some(Self::Settled),
            Self::Settled | Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Settled | Self::Failed)
    }

    /// Forward by exactly one stage, or into `Failed` from a live state.
    pub fn can_transition_to(self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Self::Failed || self.next() == Some(to)
    }

    pub fn ensure_transition(self, to: Self) -> WitnessResult<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(WitnessError::InvalidTransition { from: self, to })
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Confirmed => "confirmed",
            Self::Signed => "signed",
            Self::Submitted => "submitted",
            Self::Settled => "settled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = WitnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.to_string() == s.to_ascii_lowercase())
            .ok_or_else(|| WitnessError::Decode(format!("unknown transfer status {s}")))
    }
}

/// Dedup key of a transfer inside one recorder scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferKey {
    pub tx_hash: Bytes,
    pub log_index: u64,
}

impl TransferKey {
    pub fn new(tx_hash: impl Into<Bytes>, log_index: u64) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            log_index,
        }
    }

    /// `tx_hash ‖ log_index (big-endian)`.
    pub fn encode(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.tx_hash.len() + 8);
        key.extend_from_slice(&self.tx_hash);
        key.extend_from_slice(&self.log_index.to_be_bytes());
        key
    }
}

impl fmt::Display for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.log_index)
    }
}

/// A deposit event as decoded by a chain client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub block_height: u64,
    pub block_hash: Option<Bytes>,
    pub tx_hash: Bytes,
    pub log_index: u64,
    /// Contract (or program) that emitted the event
    pub emitter: ChainAddress,
    pub token: ChainAddress,
    /// Deposit counter assigned by the cashier contract
    pub index: U256,
    pub sender: ChainAddress,
    /// Recipient in the destination chain's text encoding
    pub recipient: String,
    pub amount: U256,
    pub fee: U256,
}

/// Witnessed transfer record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Recorder scope that owns this transfer
    pub cashier: String,
    pub source_chain: ChainFamily,
    pub tx_hash: Bytes,
    pub log_index: u64,
    pub block_height: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<Bytes>,
    pub cashier_contract: ChainAddress,
    pub index: U256,
    pub token: ChainAddress,
    pub co_token: ChainAddress,
    pub sender: ChainAddress,
    pub recipient: ChainAddress,
    pub amount: U256,
    pub rounded_amount: U256,
    pub fee: U256,
    pub status: TransferStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_tx: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    pub fn key(&self) -> TransferKey {
        TransferKey::new(self.tx_hash.clone(), self.log_index)
    }

    /// Attestation digest signed by the witness:
    /// `keccak256(cashier ‖ coToken ‖ index ‖ sender ‖ recipient ‖ roundedAmount)`
    /// with the two integers as 32-byte big-endian words.
    pub fn digest(&self) -> B256 {
        let mut packed = Vec::with_capacity(
            self.cashier_contract.len()
                + self.co_token.len()
                + self.sender.len()
                + self.recipient.len()
                + 64,
        );
        packed.extend_from_slice(self.cashier_contract.as_bytes());
        packed.extend_from_slice(self.co_token.as_bytes());
        packed.extend_from_slice(&self.index.to_be_bytes::<32>());
        packed.extend_from_slice(self.sender.as_bytes());
        packed.extend_from_slice(self.recipient.as_bytes());
        packed.extend_from_slice(&self.rounded_amount.to_be_bytes::<32>());
        keccak256(packed)
    }
}

/// Destination side of a token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub destination: ChainAddress,
    /// Number of low-order decimal digits zeroed before witnessing
    pub decimal_round: u32,
}

/// Source token → destination token mapping of one cashier.
#[derive(Debug, Clone, Default)]
pub struct TokenPairs {
    pairs: HashMap<ChainAddress, TokenPair>,
}

impl TokenPairs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: ChainAddress, destination: ChainAddress) -> WitnessResult<()> {
        if self.pairs.contains_key(&source) {
            return Err(WitnessError::Config(format!("duplicate token key {source}")));
        }
        self.pairs.insert(
            source,
            TokenPair {
                destination,
                decimal_round: 0,
            },
        );
        Ok(())
    }

    pub fn set_decimal_round(&mut self, source: &ChainAddress, digits: u32) -> WitnessResult<()> {
        if digits > MAX_DECIMAL_ROUND {
            return Err(WitnessError::Config(format!(
                "decimal round {digits} for {source} exceeds {MAX_DECIMAL_ROUND}"
            )));
        }
        let pair = self.pairs.get_mut(source).ok_or_else(|| {
            WitnessError::Config(format!("decimal round for unpaired token {source}"))
        })?;
        pair.decimal_round = digits;
        Ok(())
    }

    pub fn get(&self, source: &ChainAddress) -> Option<&TokenPair> {
        self.pairs.get(source)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Largest power of ten that fits in a `U256`.
pub const MAX_DECIMAL_ROUND: u32 = 77;

/// Zero the last `digits` decimal digits of `amount`.
pub fn round_amount(amount: U256, digits: u32) -> U256 {
    if digits == 0 {
        return amount;
    }
    match U256::from(10u64).checked_pow(U256::from(digits)) {
        Some(unit) => amount - amount % unit,
        None => U256::ZERO,
    }
}

/// Last fully scanned source block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub height: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<Bytes>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_single_step_or_failed() {
        use TransferStatus::*;
        assert!(New.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(Signed));
        assert!(Signed.can_transition_to(Submitted));
        assert!(Submitted.can_transition_to(Settled));
        assert!(!New.can_transition_to(Signed));
        assert!(!Signed.can_transition_to(Confirmed));
        assert!(!Submitted.can_transition_to(New));
        for status in [New, Confirmed, Signed, Submitted] {
            assert!(status.can_transition_to(Failed));
        }
        assert!(!Settled.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(New));
        assert!(matches!(
            Settled.ensure_transition(Failed),
            Err(WitnessError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn status_parses_from_lowercase_names() {
        for status in TransferStatus::ALL {
            assert_eq!(status.to_string().parse::<TransferStatus>().unwrap(), status);
        }
        assert_eq!("SIGNED".parse::<TransferStatus>().unwrap(), TransferStatus::Signed);
        assert!("pending".parse::<TransferStatus>().is_err());
    }

    #[test]
    fn decimal_rounding_zeroes_low_digits() {
        assert_eq!(round_amount(U256::from(12345u64), 2), U256::from(12300u64));
        assert_eq!(round_amount(U256::from(12345u64), 0), U256::from(12345u64));
        assert_eq!(round_amount(U256::from(99u64), 2), U256::ZERO);
        assert_eq!(round_amount(U256::MAX, MAX_DECIMAL_ROUND) % U256::from(10u64), U256::ZERO);
        assert_eq!(round_amount(U256::from(12345u64), 256), U256::ZERO);
    }

    #[test]
    fn duplicate_token_pair_is_rejected() {
        let mut pairs = TokenPairs::new();
        let src = ChainAddress::new(vec![1u8; 20]);
        pairs.insert(src.clone(), ChainAddress::new(vec![2u8; 20])).unwrap();
        assert!(pairs.insert(src.clone(), ChainAddress::new(vec![3u8; 20])).is_err());
        pairs.set_decimal_round(&src, 6).unwrap();
        assert_eq!(pairs.get(&src).unwrap().decimal_round, 6);
        assert!(matches!(
            pairs.set_decimal_round(&src, 256),
            Err(WitnessError::Config(_))
        ));
        pairs.set_decimal_round(&src, MAX_DECIMAL_ROUND).unwrap();
        assert!(pairs
            .set_decimal_round(&ChainAddress::new(vec![9u8; 20]), 2)
            .is_err());
    }

    #[test]
    fn transfer_key_encoding_appends_log_index() {
        let key = TransferKey::new(vec![0xab; 32], 7);
        let encoded = key.encode();
        assert_eq!(encoded.len(), 40);
        assert_eq!(&encoded[32..], &7u64.to_be_bytes());
    }
}
