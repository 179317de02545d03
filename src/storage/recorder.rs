// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Deduplicating transfer ledger for one cashier scope.
//!
//! Every status change is a compare-and-set executed inside a single redb
//! write transaction. redb admits one writer at a time, so of several actors
//! moving the same transfer out of the same status exactly one observes the
//! expected status; the others see a count of zero and skip it.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy::primitives::Bytes;
use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};

use super::{RecorderError, RecorderResult};
use crate::models::{Cursor, Transfer, TransferKey, TransferStatus};

/// Scan progress of every scope: scope → serialized Cursor (JSON bytes).
const CURSORS: TableDefinition<&str, &[u8]> = TableDefinition::new("cursors");

type RecordTable<'a> = TableDefinition<'a, &'static [u8], &'static [u8]>;
type IndexTable<'a> = TableDefinition<'a, &'static [u8], ()>;

// =============================================================================
// Index Key Helpers
// =============================================================================

/// `status | height_be | log_index_be | tx_hash`; forward scans yield
/// ascending height, then log index.
fn make_index_key(status: TransferStatus, transfer: &Transfer) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8 + 8 + transfer.tx_hash.len());
    key.push(status.code());
    key.extend_from_slice(&transfer.block_height.to_be_bytes());
    key.extend_from_slice(&transfer.log_index.to_be_bytes());
    key.extend_from_slice(&transfer.tx_hash);
    key
}

// =============================================================================
// Recorder
// =============================================================================

/// Persistent store of the transfers discovered by one cashier.
pub struct Recorder {
    db: Arc<Database>,
    scope: String,
    transfers_table: String,
    index_table: String,
}

impl Recorder {
    /// Bind a recorder to `scope`, creating its tables when missing.
    pub fn new(db: Arc<Database>, scope: impl Into<String>) -> RecorderResult<Self> {
        let scope = scope.into();
        let recorder = Self {
            transfers_table: format!("transfers::{scope}"),
            index_table: format!("status_index::{scope}"),
            db,
            scope,
        };

        // Pre-create all tables so later read transactions don't fail
        let write_txn = recorder.db.begin_write()?;
        {
            let _ = write_txn.open_table(recorder.records())?;
            let _ = write_txn.open_table(recorder.index())?;
            let _ = write_txn.open_table(CURSORS)?;
        }
        write_txn.commit()?;

        Ok(recorder)
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn records(&self) -> RecordTable<'_> {
        TableDefinition::new(&self.transfers_table)
    }

    fn index(&self) -> IndexTable<'_> {
        TableDefinition::new(&self.index_table)
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Insert transfers whose key is not recorded yet; returns how many were new.
    ///
    /// Already recorded keys are skipped silently, so re-scanning a block
    /// range is harmless. The whole batch commits atomically.
    pub fn add_transfers(&self, transfers: &[Transfer]) -> RecorderResult<usize> {
        if transfers.is_empty() {
            return Ok(0);
        }
        let mut inserted = 0;
        let write_txn = self.db.begin_write()?;
        {
            let mut records = write_txn.open_table(self.records())?;
            let mut index = write_txn.open_table(self.index())?;
            for transfer in transfers {
                if transfer.cashier != self.scope {
                    return Err(RecorderError::ScopeMismatch {
                        expected: self.scope.clone(),
                        found: transfer.cashier.clone(),
                    });
                }
                let key = transfer.key().encode();
                let exists = records.get(key.as_slice())?.is_some();
                if exists {
                    continue;
                }
                let json = serde_json::to_vec(transfer)?;
                records.insert(key.as_slice(), json.as_slice())?;
                let idx = make_index_key(transfer.status, transfer);
                index.insert(idx.as_slice(), ())?;
                inserted += 1;
            }
        }
        write_txn.commit()?;
        Ok(inserted)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Look up a single transfer.
    pub fn transfer(&self, key: &TransferKey) -> RecorderResult<Option<Transfer>> {
        let read_txn = self.db.begin_read()?;
        let records = read_txn.open_table(self.records())?;
        let encoded = key.encode();
        let transfer = match records.get(encoded.as_slice())? {
            Some(value) => Some(serde_json::from_slice(value.value())?),
            None => None,
        };
        Ok(transfer)
    }

    /// Transfers in `status`, oldest block first, then by log index.
    pub fn transfers_by_status(
        &self,
        status: TransferStatus,
        limit: usize,
    ) -> RecorderResult<Vec<Transfer>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(self.index())?;
        let records = read_txn.open_table(self.records())?;

        let start = [status.code()];
        let end = [status.code() + 1];
        let mut transfers = Vec::with_capacity(limit.min(256));
        for entry in index.range(start.as_slice()..end.as_slice())? {
            if transfers.len() >= limit {
                break;
            }
            let (idx_key, _) = entry?;
            let idx_key = idx_key.value();
            // 1 status byte + 8 height bytes, then log_index and tx_hash
            let log_index = u64::from_be_bytes(idx_key[9..17].try_into().unwrap_or([0; 8]));
            let key = TransferKey::new(idx_key[17..].to_vec(), log_index).encode();
            if let Some(value) = records.get(key.as_slice())? {
                transfers.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(transfers)
    }

    /// Number of recorded transfers per status.
    pub fn count_by_status(&self) -> RecorderResult<BTreeMap<TransferStatus, u64>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(self.index())?;
        let mut counts = BTreeMap::new();
        for status in TransferStatus::ALL {
            let start = [status.code()];
            let end = [status.code() + 1];
            let mut count = 0u64;
            for entry in index.range(start.as_slice()..end.as_slice())? {
                entry?;
                count += 1;
            }
            counts.insert(status, count);
        }
        Ok(counts)
    }

    // =========================================================================
    // Status transitions
    // =========================================================================

    /// Move every transfer in `keys` currently in `from` to `to`.
    ///
    /// Transfers in any other status are left alone; the caller must check
    /// the returned count.
    pub fn mark_status(
        &self,
        keys: &[TransferKey],
        from: TransferStatus,
        to: TransferStatus,
    ) -> RecorderResult<usize> {
        ensure_transition(from, to)?;
        let write_txn = self.db.begin_write()?;
        let mut updated = 0;
        for key in keys {
            if self.transition_in(&write_txn, key, Some(from), to, |_| {})? {
                updated += 1;
            }
        }
        write_txn.commit()?;
        Ok(updated)
    }

    /// `Confirmed → Signed`, storing the witness signature.
    pub fn mark_signed(&self, key: &TransferKey, signature: Bytes) -> RecorderResult<bool> {
        self.transition(
            key,
            TransferStatus::Confirmed,
            TransferStatus::Signed,
            move |t| t.signature = Some(signature),
        )
    }

    /// `Signed → Submitted`, storing the destination transaction hash.
    pub fn mark_submitted(&self, key: &TransferKey, tx_hash: String) -> RecorderResult<bool> {
        self.transition(
            key,
            TransferStatus::Signed,
            TransferStatus::Submitted,
            move |t| {
                t.submission_tx = Some(tx_hash);
                t.last_error = None;
            },
        )
    }

    /// Count a failed submission attempt without changing the status.
    pub fn record_attempt(&self, key: &TransferKey, reason: &str) -> RecorderResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut records = write_txn.open_table(self.records())?;
            let encoded = key.encode();
            let existing = records.get(encoded.as_slice())?.map(|v| v.value().to_vec());
            if let Some(bytes) = existing {
                let mut transfer: Transfer = serde_json::from_slice(&bytes)?;
                transfer.attempts += 1;
                transfer.last_error = Some(reason.to_string());
                transfer.updated_at = Utc::now();
                let json = serde_json::to_vec(&transfer)?;
                records.insert(encoded.as_slice(), json.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// `Submitted → Settled` for each key.
    pub fn settled(&self, keys: &[TransferKey]) -> RecorderResult<usize> {
        self.mark_status(keys, TransferStatus::Submitted, TransferStatus::Settled)
    }

    /// Move each non-terminal transfer to `Failed`, keeping `reason` for audit.
    pub fn failed(&self, keys: &[TransferKey], reason: &str) -> RecorderResult<usize> {
        let write_txn = self.db.begin_write()?;
        let mut updated = 0;
        for key in keys {
            let reason = reason.to_string();
            if self.transition_in(&write_txn, key, None, TransferStatus::Failed, move |t| {
                t.last_error = Some(reason)
            })? {
                updated += 1;
            }
        }
        write_txn.commit()?;
        Ok(updated)
    }

    fn transition(
        &self,
        key: &TransferKey,
        from: TransferStatus,
        to: TransferStatus,
        mutate: impl FnOnce(&mut Transfer),
    ) -> RecorderResult<bool> {
        ensure_transition(from, to)?;
        let write_txn = self.db.begin_write()?;
        let changed = self.transition_in(&write_txn, key, Some(from), to, mutate)?;
        write_txn.commit()?;
        Ok(changed)
    }

    /// Compare-and-set inside an open write transaction. `from = None`
    /// accepts any status that may legally move to `to`.
    fn transition_in(
        &self,
        write_txn: &WriteTransaction,
        key: &TransferKey,
        from: Option<TransferStatus>,
        to: TransferStatus,
        mutate: impl FnOnce(&mut Transfer),
    ) -> RecorderResult<bool> {
        let mut records = write_txn.open_table(self.records())?;
        let mut index = write_txn.open_table(self.index())?;
        let encoded = key.encode();

        // Read existing value and deserialize before mutating
        let existing = records.get(encoded.as_slice())?.map(|v| v.value().to_vec());
        let Some(bytes) = existing else {
            return Ok(false);
        };
        let mut transfer: Transfer = serde_json::from_slice(&bytes)?;
        let current = transfer.status;
        let expected = match from {
            Some(status) => current == status,
            None => current.can_transition_to(to),
        };
        if !expected {
            return Ok(false);
        }

        mutate(&mut transfer);
        transfer.status = to;
        transfer.updated_at = Utc::now();

        let old_idx = make_index_key(current, &transfer);
        index.remove(old_idx.as_slice())?;
        let new_idx = make_index_key(to, &transfer);
        index.insert(new_idx.as_slice(), ())?;
        let json = serde_json::to_vec(&transfer)?;
        records.insert(encoded.as_slice(), json.as_slice())?;
        Ok(true)
    }

    // =========================================================================
    // Scan cursor
    // =========================================================================

    /// Last fully recorded block of this scope.
    pub fn cursor(&self) -> RecorderResult<Option<Cursor>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CURSORS)?;
        let cursor = match table.get(self.scope.as_str())? {
            Some(v) => Some(serde_json::from_slice(v.value())?),
            None => None,
        };
        Ok(cursor)
    }

    /// Persist scan progress. Call only after the block's transfers are recorded.
    pub fn set_cursor(&self, cursor: &Cursor) -> RecorderResult<()> {
        let json = serde_json::to_vec(cursor)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CURSORS)?;
            table.insert(self.scope.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

fn ensure_transition(from: TransferStatus, to: TransferStatus) -> RecorderResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(RecorderError::InvalidTransition { from, to })
    }
}

// =============================================================================
// Tests
// =============================================================================
