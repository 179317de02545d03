// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Token Cashier
//!
//! Bridges one cashier contract on a source chain to one validator on a
//! destination chain.
//!
//! ## Stages
//!
//! 1. **Pull**: scan finalized blocks after the cursor for deposit events,
//!    record new transfers, then advance the cursor.
//! 2. **Confirm** (`NEW → CONFIRMED`): re-check each transfer's block hash.
//! 3. **Settle** (`SUBMITTED → SETTLED | FAILED`): poll the destination for
//!    the outcome of earlier submissions.
//! 4. **Sign and submit** (`CONFIRMED → SIGNED → SUBMITTED`).
//!
//! Every status change goes through the recorder's compare-and-set, so two
//! actors running the same stage never process a transfer twice.
//!
//! ## Reverse flow
//!
//! An EVM cashier may also watch a reverse cashier contract. Its transfers
//! are kept in a second recorder scoped `<id>.reverse` and go through the
//! same stages. The forward cursor covers both scans.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Bytes;
use async_trait::async_trait;
use chrono::Utc;
use redb::Database;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{Interval, MissedTickBehavior};

use crate::blockchain::{
    AddressDecoder, ChainAddress, ChainClient, ChainFamily, PayloadEncoder, SignHandler,
    SubmissionState, Witness,
};
use crate::error::{WitnessError, WitnessResult};
use crate::models::{round_amount, Cursor, RawEvent, TokenPairs, Transfer, TransferStatus};
use crate::notifier::Notifier;
use crate::storage::Recorder;

/// Default confirmation depth.
pub const DEFAULT_CONFIRM_BLOCKS: u64 = 20;

/// Default number of blocks per `logs_in_range` query.
pub const DEFAULT_CHUNK_SIZE: u64 = 1000;

/// Highest accepted `qps_limit`.
pub const MAX_QPS_LIMIT: u32 = 1000;

/// Capability contract shared by every cashier variant.
#[async_trait]
pub trait TokenCashier: Send + Sync {
    fn id(&self) -> &str;

    fn pull_enabled(&self) -> bool;

    fn submit_enabled(&self) -> bool;

    /// Scan finalized blocks after the cursor, up to `up_to`.
    /// Returns the number of newly recorded transfers.
    async fn pull(&self, up_to: u64) -> WitnessResult<usize>;

    /// Scan exactly one finalized block without moving the cursor.
    async fn pull_block(&self, height: u64) -> WitnessResult<usize>;

    /// `NEW → CONFIRMED` for up to `limit` transfers per scope.
    async fn confirm(&self, limit: usize) -> WitnessResult<usize>;

    /// Resolve up to `limit` submitted transfers per scope.
    async fn check_settlement(&self, limit: usize) -> WitnessResult<usize>;

    /// Up to `batch_size` submission candidates across all scopes: SIGNED
    /// leftovers first, then CONFIRMED.
    async fn candidates(&self, batch_size: usize) -> WitnessResult<Vec<Transfer>>;

    async fn sign_and_submit(
        &self,
        transfers: &[Transfer],
        signer: &dyn SignHandler,
    ) -> WitnessResult<SubmitReport>;

    fn summary(&self) -> WitnessResult<CashierSummary>;

    fn transfers(&self, status: TransferStatus, limit: usize) -> WitnessResult<Vec<Transfer>>;
}

/// Outcome of one `sign_and_submit` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitReport {
    pub signed: usize,
    pub submitted: usize,
    /// Attempts the destination refused or could not be reached for
    pub rejected: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSummary {
    pub scope: String,
    pub counts: BTreeMap<TransferStatus, u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashierSummary {
    pub id: String,
    pub source: ChainFamily,
    pub destination: ChainFamily,
    pub cursor: Option<u64>,
    pub pull_enabled: bool,
    pub submit_enabled: bool,
    pub scopes: Vec<ScopeSummary>,
}

/// Per-cashier knobs.
#[derive(Debug, Clone)]
pub struct CashierOptions {
    pub confirm_blocks: u64,
    /// Scan floor on first run
    pub start_height: u64,
    pub chunk_size: u64,
    /// Submissions per second; 0 means unlimited
    pub qps_limit: u32,
    pub disable_pull: bool,
    pub disable_submit: bool,
}

impl Default for CashierOptions {
    fn default() -> Self {
        Self {
            confirm_blocks: DEFAULT_CONFIRM_BLOCKS,
            start_height: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            qps_limit: 0,
            disable_pull: false,
            disable_submit: false,
        }
    }
}

/// Reverse cashier contract and the tokens it accepts.
#[derive(Debug, Clone)]
pub struct ReverseConfig {
    pub contract: ChainAddress,
    pub tokens: Vec<ChainAddress>,
}

#[derive(Debug, Clone)]
pub struct CashierConfig {
    pub id: String,
    pub contract: ChainAddress,
    pub pairs: TokenPairs,
    pub reverse: Option<ReverseConfig>,
    pub options: CashierOptions,
}

/// Chain-facing collaborators of a cashier.
pub struct CashierChains {
    pub source: Arc<dyn ChainClient>,
    pub destination: Arc<dyn ChainClient>,
    /// Parses recipients into the destination chain's address format
    pub recipients: Arc<dyn AddressDecoder>,
    pub encoder: Arc<dyn PayloadEncoder>,
}

/// One watched contract with its token mapping and ledger.
struct Lane {
    contract: ChainAddress,
    pairs: TokenPairs,
    recorder: Recorder,
}

pub struct Cashier {
    id: String,
    chains: CashierChains,
    /// Forward lane first, reverse lane (if any) second
    lanes: Vec<Lane>,
    options: CashierOptions,
    notifier: Arc<dyn Notifier>,
    throttle: Mutex<Option<Interval>>,
}

impl Cashier {
    pub fn new(
        config: CashierConfig,
        chains: CashierChains,
        db: Arc<Database>,
        notifier: Arc<dyn Notifier>,
    ) -> WitnessResult<Self> {
        if config.options.chunk_size == 0 {
            return Err(WitnessError::Config(format!(
                "cashier {}: chunk size must be positive",
                config.id
            )));
        }
        if config.options.qps_limit > MAX_QPS_LIMIT {
            return Err(WitnessError::Config(format!(
                "cashier {}: qps limit {} exceeds {MAX_QPS_LIMIT}",
                config.id, config.options.qps_limit
            )));
        }

        let mut lanes = vec![Lane {
            contract: config.contract,
            pairs: config.pairs,
            recorder: Recorder::new(db.clone(), config.id.clone())?,
        }];

        if let Some(reverse) = config.reverse {
            if chains.source.family() != ChainFamily::Evm {
                return Err(WitnessError::Config(format!(
                    "cashier {}: reverse flow requires an EVM source",
                    config.id
                )));
            }
            let mut pairs = TokenPairs::new();
            for token in reverse.tokens {
                pairs.insert(token.clone(), token)?;
            }
            lanes.push(Lane {
                contract: reverse.contract,
                pairs,
                recorder: Recorder::new(db, format!("{}.reverse", config.id))?,
            });
        }

        Ok(Self {
            id: config.id,
            chains,
            lanes,
            options: config.options,
            notifier,
            throttle: Mutex::new(None),
        })
    }

    fn forward(&self) -> &Lane {
        &self.lanes[0]
    }

    fn lane_for(&self, scope: &str) -> WitnessResult<&Lane> {
        self.lanes
            .iter()
            .find(|lane| lane.recorder.scope() == scope)
            .ok_or_else(|| {
                WitnessError::Config(format!("cashier {} has no scope {scope}", self.id))
            })
    }

    /// Highest height that is `confirm_blocks` below the head, if any.
    async fn finality_tip(&self) -> WitnessResult<Option<u64>> {
        let head = self.chains.source.current_height().await?;
        Ok(head.checked_sub(self.options.confirm_blocks))
    }

    /// The block at the cursor must still be on the canonical chain.
    async fn verify_cursor(&self, cursor: &Cursor) -> WitnessResult<()> {
        let Some(recorded) = &cursor.block_hash else {
            return Ok(());
        };
        let current = self.chains.source.block_hash(cursor.height).await?;
        ensure_same_block(cursor.height, recorded, current.as_ref())
    }

    /// Fetch and record the events of `[from, to]` on every lane.
    async fn scan_range(&self, from: u64, to: u64) -> WitnessResult<usize> {
        let mut recorded = 0;
        for lane in &self.lanes {
            let events = self
                .chains
                .source
                .logs_in_range(&lane.contract, from, to)
                .await?;
            let transfers = self.to_transfers(lane, events).await;
            recorded += lane.recorder.add_transfers(&transfers)?;
        }
        Ok(recorded)
    }

    async fn to_transfers(&self, lane: &Lane, events: Vec<RawEvent>) -> Vec<Transfer> {
        let mut transfers = Vec::with_capacity(events.len());
        for event in events {
            let Some(pair) = lane.pairs.get(&event.token) else {
                tracing::debug!(
                    cashier = %self.id,
                    token = %event.token,
                    tx_hash = %event.tx_hash,
                    "Ignoring deposit of unpaired token"
                );
                continue;
            };
            let recipient = match self.chains.recipients.decode_string(&event.recipient) {
                Ok(recipient) => recipient,
                Err(e) => {
                    tracing::warn!(
                        cashier = %self.id,
                        tx_hash = %event.tx_hash,
                        log_index = event.log_index,
                        recipient = %event.recipient,
                        error = %e,
                        "Skipping deposit with invalid recipient"
                    );
                    self.notifier
                        .notify(&format!(
                            "cashier {}: skipped deposit {}:{} with invalid recipient {:?}",
                            self.id, event.tx_hash, event.log_index, event.recipient
                        ))
                        .await;
                    continue;
                }
            };

            let now = Utc::now();
            transfers.push(Transfer {
                cashier: lane.recorder.scope().to_string(),
                source_chain: self.chains.source.family(),
                tx_hash: event.tx_hash,
                log_index: event.log_index,
                block_height: event.block_height,
                block_hash: event.block_hash,
                cashier_contract: lane.contract.clone(),
                index: event.index,
                token: event.token,
                co_token: pair.destination.clone(),
                sender: event.sender,
                recipient,
                amount: event.amount,
                rounded_amount: round_amount(event.amount, pair.decimal_round),
                fee: event.fee,
                status: TransferStatus::New,
                signature: None,
                submission_tx: None,
                attempts: 0,
                last_error: None,
                discovered_at: now,
                updated_at: now,
            });
        }
        transfers
    }

    async fn throttle(&self) {
        if self.options.qps_limit == 0 {
            return;
        }
        let mut guard = self.throttle.lock().await;
        let interval = guard.get_or_insert_with(|| {
            let period = Duration::from_secs(1) / self.options.qps_limit;
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        interval.tick().await;
    }

    /// Signature to submit for `transfer`, signing first if it is CONFIRMED.
    /// A SIGNED snapshot is checked against the stored record. `None` means
    /// another actor already moved it.
    fn witness_signature(
        &self,
        lane: &Lane,
        transfer: &Transfer,
        signer: &dyn SignHandler,
    ) -> WitnessResult<Option<Bytes>> {
        match transfer.status {
            TransferStatus::Confirmed => {
                let signature = signer.sign(transfer.digest().as_slice())?;
                if lane
                    .recorder
                    .mark_signed(&transfer.key(), signature.clone())?
                {
                    Ok(Some(signature))
                } else {
                    Ok(None)
                }
            }
            TransferStatus::Signed => match lane.recorder.transfer(&transfer.key())? {
                Some(current) if current.status == TransferStatus::Signed => Ok(current.signature),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }
}

fn ensure_same_block(height: u64, recorded: &Bytes, current: Option<&Bytes>) -> WitnessResult<()> {
    if current == Some(recorded) {
        return Ok(());
    }
    Err(WitnessError::ReorgDetected {
        height,
        recorded: recorded.to_string(),
        current: current.map_or_else(|| "none".to_string(), |h| h.to_string()),
    })
}

#[async_trait]
impl TokenCashier for Cashier {
    fn id(&self) -> &str {
        &self.id
    }

    fn pull_enabled(&self) -> bool {
        !self.options.disable_pull
    }

    fn submit_enabled(&self) -> bool {
        !self.options.disable_submit
    }

    async fn pull(&self, up_to: u64) -> WitnessResult<usize> {
        let cursor = self.forward().recorder.cursor()?;
        if let Some(cursor) = &cursor {
            self.verify_cursor(cursor).await?;
        }

        let Some(tip) = self.finality_tip().await? else {
            return Ok(0);
        };
        let from = cursor
            .as_ref()
            .map_or(0, |c| c.height + 1)
            .max(self.options.start_height);
        let to = up_to.min(tip);
        if from > to {
            return Ok(0);
        }

        let mut recorded = 0;
        let mut chunk_from = from;
        while chunk_from <= to {
            let chunk_to = chunk_from
                .saturating_add(self.options.chunk_size - 1)
                .min(to);
            recorded += self.scan_range(chunk_from, chunk_to).await?;

            let block_hash = self.chains.source.block_hash(chunk_to).await?;
            self.forward().recorder.set_cursor(&Cursor {
                height: chunk_to,
                block_hash,
            })?;
            tracing::debug!(
                cashier = %self.id,
                from_block = chunk_from,
                to_block = chunk_to,
                "Scanned block range"
            );
            chunk_from = chunk_to + 1;
        }
        Ok(recorded)
    }

    async fn pull_block(&self, height: u64) -> WitnessResult<usize> {
        let tip = self.finality_tip().await?;
        match tip {
            Some(tip) if height <= tip => self.scan_range(height, height).await,
            tip => Err(WitnessError::NotFinal {
                height,
                tip: tip.unwrap_or(0),
            }),
        }
    }

    async fn confirm(&self, limit: usize) -> WitnessResult<usize> {
        let mut confirmed = 0;
        for lane in &self.lanes {
            for transfer in lane.recorder.transfers_by_status(TransferStatus::New, limit)? {
                if let Some(recorded) = &transfer.block_hash {
                    let current = self.chains.source.block_hash(transfer.block_height).await?;
                    ensure_same_block(transfer.block_height, recorded, current.as_ref())?;
                }
                let key = transfer.key();
                if transfer.rounded_amount.is_zero() {
                    lane.recorder.failed(&[key], "amount rounds to zero")?;
                    tracing::warn!(
                        cashier = %self.id,
                        transfer = %transfer.key(),
                        amount = %transfer.amount,
                        "Transfer amount rounds to zero"
                    );
                    continue;
                }
                confirmed += lane.recorder.mark_status(
                    &[key],
                    TransferStatus::New,
                    TransferStatus::Confirmed,
                )?;
            }
        }
        Ok(confirmed)
    }

    async fn check_settlement(&self, limit: usize) -> WitnessResult<usize> {
        let mut resolved = 0;
        for lane in &self.lanes {
            for transfer in lane
                .recorder
                .transfers_by_status(TransferStatus::Submitted, limit)?
            {
                let Some(tx) = &transfer.submission_tx else {
                    continue;
                };
                match self.chains.destination.submission_status(tx).await? {
                    SubmissionState::Pending => {}
                    SubmissionState::Settled => {
                        resolved += lane.recorder.settled(&[transfer.key()])?;
                    }
                    SubmissionState::Reverted => {
                        resolved += lane
                            .recorder
                            .failed(&[transfer.key()], &format!("submission {tx} reverted"))?;
                        tracing::error!(
                            cashier = %self.id,
                            transfer = %transfer.key(),
                            submission = %tx,
                            "Submission reverted on destination"
                        );
                        self.notifier
                            .notify(&format!(
                                "cashier {}: submission {tx} of transfer {} reverted",
                                self.id,
                                transfer.key()
                            ))
                            .await;
                    }
                }
            }
        }
        Ok(resolved)
    }

    async fn candidates(&self, batch_size: usize) -> WitnessResult<Vec<Transfer>> {
        let mut batch = Vec::new();
        for status in [TransferStatus::Signed, TransferStatus::Confirmed] {
            for lane in &self.lanes {
                let room = batch_size.saturating_sub(batch.len());
                if room == 0 {
                    return Ok(batch);
                }
                batch.extend(lane.recorder.transfers_by_status(status, room)?);
            }
        }
        Ok(batch)
    }

    async fn sign_and_submit(
        &self,
        transfers: &[Transfer],
        signer: &dyn SignHandler,
    ) -> WitnessResult<SubmitReport> {
        let mut report = SubmitReport::default();
        for transfer in transfers {
            let lane = self.lane_for(&transfer.cashier)?;
            let key = transfer.key();
            let was_confirmed = transfer.status == TransferStatus::Confirmed;

            let Some(signature) = self.witness_signature(lane, transfer, signer)? else {
                tracing::debug!(
                    cashier = %self.id,
                    transfer = %key,
                    "Transfer already taken by another actor"
                );
                continue;
            };
            if was_confirmed {
                report.signed += 1;
            }

            let witness = Witness {
                signature,
                public_key: signer.public_key(),
            };
            let payload = match self.chains.encoder.encode(transfer, &witness) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!(
                        cashier = %self.id,
                        transfer = %key,
                        error = %e,
                        "Cannot build submission payload"
                    );
                    report.failed += lane.recorder.failed(&[key.clone()], &e.to_string())?;
                    self.notifier
                        .notify(&format!("cashier {}: transfer {key} failed: {e}", self.id))
                        .await;
                    continue;
                }
            };

            self.throttle().await;
            match self.chains.destination.submit(&payload).await {
                Ok(tx) => {
                    if lane.recorder.mark_submitted(&key, tx.clone())? {
                        report.submitted += 1;
                        tracing::info!(
                            cashier = %self.id,
                            transfer = %key,
                            submission = %tx,
                            "Transfer submitted"
                        );
                    }
                }
                Err(e @ (WitnessError::SubmissionRejected(_) | WitnessError::ChainUnavailable(_))) => {
                    tracing::warn!(
                        cashier = %self.id,
                        transfer = %key,
                        error = %e,
                        "Submission failed, will retry next cycle"
                    );
                    lane.recorder.record_attempt(&key, &e.to_string())?;
                    report.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    fn summary(&self) -> WitnessResult<CashierSummary> {
        let mut scopes = Vec::with_capacity(self.lanes.len());
        for lane in &self.lanes {
            scopes.push(ScopeSummary {
                scope: lane.recorder.scope().to_string(),
                counts: lane.recorder.count_by_status()?,
            });
        }
        Ok(CashierSummary {
            id: self.id.clone(),
            source: self.chains.source.family(),
            destination: self.chains.destination.family(),
            cursor: self.forward().recorder.cursor()?.map(|c| c.height),
            pull_enabled: self.pull_enabled(),
            submit_enabled: self.submit_enabled(),
            scopes,
        })
    }

    fn transfers(&self, status: TransferStatus, limit: usize) -> WitnessResult<Vec<Transfer>> {
        let mut found = Vec::new();
        for lane in &self.lanes {
            let room = limit.saturating_sub(found.len());
            if room == 0 {
                break;
            }
            found.extend(lane.recorder.transfers_by_status(status, room)?);
        }
        Ok(found)
    }
}
