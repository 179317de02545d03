// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bridge Witness - cross-chain transfer witness service
//!
//! Watches cashier contracts on a source chain, records every deposit exactly
//! once, then signs and submits attestations to the destination validator.
//!
//! ## Modules
//!
//! - `api` - Read-only status API (Axum)
//! - `blockchain` - Chain clients, address codecs, signers and payload encoders
//! - `storage` - Transfer ledger and scan cursor (redb)
//! - `witness` - Cashier stages and the service loop

pub mod api;
pub mod blockchain;
pub mod config;
pub mod error;
pub mod models;
pub mod notifier;
pub mod state;
pub mod storage;
pub mod witness;

#[cfg(test)]
mod test_utils;
