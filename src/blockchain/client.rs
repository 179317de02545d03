// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chain access contract used by cashiers.
//!
//! A cashier reads its source chain and writes to its destination chain
//! through this trait only. There are no push subscriptions; the core polls
//! ranges of finalized blocks.

use alloy::primitives::Bytes;
use async_trait::async_trait;

use super::address::{ChainAddress, ChainFamily};
use super::payload::Instruction;
use crate::error::WitnessResult;
use crate::models::RawEvent;

/// Destination-specific transaction body produced by a payload encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionPayload {
    /// ABI-encoded call to a contract.
    ContractCall {
        contract: ChainAddress,
        calldata: Bytes,
    },
    /// Program instructions executed in one transaction.
    Instructions(Vec<Instruction>),
}

/// Outcome of a submitted transaction on the destination chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Pending,
    Settled,
    Reverted,
}

/// Per-chain read and write capability.
///
/// Transport failures and timeouts must surface as
/// [`WitnessError::ChainUnavailable`](crate::error::WitnessError::ChainUnavailable);
/// a destination refusing a transaction is
/// [`WitnessError::SubmissionRejected`](crate::error::WitnessError::SubmissionRejected).
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn family(&self) -> ChainFamily;

    /// Latest block height (slot on Solana).
    async fn current_height(&self) -> WitnessResult<u64>;

    /// Hash of the block at `height`; `None` when the chain has no block there.
    async fn block_hash(&self, height: u64) -> WitnessResult<Option<Bytes>>;

    /// Deposit events emitted by `contract` in `[from, to]`, ascending.
    async fn logs_in_range(
        &self,
        contract: &ChainAddress,
        from: u64,
        to: u64,
    ) -> WitnessResult<Vec<RawEvent>>;

    /// Broadcast a payload; returns the destination transaction hash.
    async fn submit(&self, payload: &SubmissionPayload) -> WitnessResult<String>;

    async fn submission_status(&self, tx_hash: &str) -> WitnessResult<SubmissionState>;
}
