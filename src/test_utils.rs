// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fixtures shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use chrono::Utc;

use crate::blockchain::{
    ChainAddress, ChainClient, ChainFamily, SubmissionPayload, SubmissionState,
};
use crate::error::{WitnessError, WitnessResult};
use crate::models::{RawEvent, Transfer, TransferStatus};

pub const CASHIER_CONTRACT: u8 = 0xca;
pub const SOURCE_TOKEN: u8 = 0x01;
pub const DESTINATION_TOKEN: u8 = 0x02;

pub fn evm_address(byte: u8) -> ChainAddress {
    ChainAddress::from(Address::repeat_byte(byte))
}

/// Transaction hash unique per height.
pub fn tx_hash(height: u64) -> Bytes {
    let mut hash = [0u8; 32];
    hash[24..].copy_from_slice(&height.to_be_bytes());
    Bytes::copy_from_slice(&hash)
}

/// Default block hash the mock chain reports for `height`.
pub fn block_hash(height: u64) -> Bytes {
    let mut hash = [0xbbu8; 32];
    hash[24..].copy_from_slice(&height.to_be_bytes());
    Bytes::copy_from_slice(&hash)
}

pub fn sample_transfer(scope: &str, height: u64, log_index: u64) -> Transfer {
    let now = Utc::now();
    Transfer {
        cashier: scope.to_string(),
        source_chain: ChainFamily::Evm,
        tx_hash: tx_hash(height),
        log_index,
        block_height: height,
        block_hash: Some(block_hash(height)),
        cashier_contract: evm_address(CASHIER_CONTRACT),
        index: U256::from(height * 100 + log_index),
        token: evm_address(SOURCE_TOKEN),
        co_token: evm_address(DESTINATION_TOKEN),
        sender: evm_address(0x03),
        recipient: evm_address(0x04),
        amount: U256::from(12_345u64),
        rounded_amount: U256::from(12_345u64),
        fee: U256::ZERO,
        status: TransferStatus::New,
        signature: None,
        submission_tx: None,
        attempts: 0,
        last_error: None,
        discovered_at: now,
        updated_at: now,
    }
}

/// Deposit of `amount` of the source token to an EVM recipient.
pub fn sample_event(height: u64, log_index: u64, amount: u64) -> RawEvent {
    RawEvent {
        block_height: height,
        block_hash: Some(block_hash(height)),
        tx_hash: tx_hash(height),
        log_index,
        emitter: evm_address(CASHIER_CONTRACT),
        token: evm_address(SOURCE_TOKEN),
        index: U256::from(height * 100 + log_index),
        sender: evm_address(0x03),
        recipient: format!("{}", Address::repeat_byte(0x04)),
        amount: U256::from(amount),
        fee: U256::ZERO,
    }
}

#[derive(Default)]
struct MockState {
    head: u64,
    hashes: HashMap<u64, Bytes>,
    events: Vec<RawEvent>,
    unavailable: bool,
    submit_results: VecDeque<WitnessResult<()>>,
    submissions: Vec<SubmissionPayload>,
    statuses: HashMap<String, SubmissionState>,
    log_queries: Vec<(u64, u64)>,
}

/// Scripted in-memory chain.
pub struct MockChain {
    family: ChainFamily,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(family: ChainFamily) -> Arc<Self> {
        Arc::new(Self {
            family,
            state: Mutex::new(MockState::default()),
        })
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn set_block_hash(&self, height: u64, hash: Bytes) {
        self.state.lock().unwrap().hashes.insert(height, hash);
    }

    pub fn push_event(&self, event: RawEvent) {
        self.state.lock().unwrap().events.push(event);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    /// Queue the outcome of the next `submit` calls; unscripted calls succeed.
    pub fn script_submit(&self, result: WitnessResult<()>) {
        self.state.lock().unwrap().submit_results.push_back(result);
    }

    pub fn set_submission_status(&self, tx: &str, state: SubmissionState) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(tx.to_string(), state);
    }

    pub fn submissions(&self) -> Vec<SubmissionPayload> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().log_queries.clone()
    }

    fn check_available(state: &MockState) -> WitnessResult<()> {
        if state.unavailable {
            return Err(WitnessError::ChainUnavailable("mock chain offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn family(&self) -> ChainFamily {
        self.family
    }

    async fn current_height(&self) -> WitnessResult<u64> {
        let state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        Ok(state.head)
    }

    async fn block_hash(&self, height: u64) -> WitnessResult<Option<Bytes>> {
        let state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        if height > state.head {
            return Ok(None);
        }
        Ok(Some(
            state
                .hashes
                .get(&height)
                .cloned()
                .unwrap_or_else(|| block_hash(height)),
        ))
    }

    async fn logs_in_range(
        &self,
        contract: &ChainAddress,
        from: u64,
        to: u64,
    ) -> WitnessResult<Vec<RawEvent>> {
        let mut state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        state.log_queries.push((from, to));
        let mut events: Vec<RawEvent> = state
            .events
            .iter()
            .filter(|e| &e.emitter == contract && e.block_height >= from && e.block_height <= to)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.block_height, e.log_index));
        Ok(events)
    }

    async fn submit(&self, payload: &SubmissionPayload) -> WitnessResult<String> {
        let mut state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        if let Some(result) = state.submit_results.pop_front() {
            result?;
        }
        state.submissions.push(payload.clone());
        Ok(format!("{}", B256::with_last_byte(state.submissions.len() as u8)))
    }

    async fn submission_status(&self, tx_hash: &str) -> WitnessResult<SubmissionState> {
        let state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        Ok(state
            .statuses
            .get(tx_hash)
            .copied()
            .unwrap_or(SubmissionState::Pending))
    }
}
