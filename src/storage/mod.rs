// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Transfer Storage
//!
//! Persistent ledger of witnessed transfers backed by redb (pure Rust, ACID).
//! One database file is shared by every recorder of the process; each
//! recorder owns its own pair of tables, so dedup namespaces never overlap.
//!
//! ## Table Layout
//!
//! ```text
//! transfers::{scope}     tx_hash|log_index            → serialized Transfer
//! status_index::{scope}  status|height|log_index|hash → ()
//! cursors                scope                        → serialized Cursor
//! ```

pub mod recorder;

use std::path::Path;
use std::sync::Arc;

use redb::Database;

use crate::models::TransferStatus;

pub use recorder::Recorder;

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer belongs to scope {found}, recorder scope is {expected}")]
    ScopeMismatch { expected: String, found: String },

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: TransferStatus,
        to: TransferStatus,
    },
}

pub type RecorderResult<T> = Result<T, RecorderError>;

/// Open (or create) the shared transfer database.
pub fn open_database(path: &Path) -> RecorderResult<Arc<Database>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Database::create(path)?;
    tracing::info!(path = %path.display(), "Transfer database opened");
    Ok(Arc::new(db))
}
