// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chain integration.
//!
//! This module provides:
//! - Address parsing per chain family
//! - Chain clients for EVM (including IoTeX) and Solana
//! - Witness signing and destination payload encoding

pub mod address;
pub mod client;
pub mod evm;
pub mod payload;
pub mod signing;
pub mod solana;

pub use address::{decoder_for, AddressDecoder, ChainAddress, ChainFamily};
pub use client::{ChainClient, SubmissionPayload, SubmissionState};
pub use evm::EvmClient;
pub use payload::{EvmPayloadEncoder, PayloadEncoder, SolanaPayloadEncoder, Witness};
pub use signing::{signer_for, SignHandler, SignatureScheme};
pub use solana::SolanaClient;
