// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Destination payload encoders.
//!
//! EVM destinations receive an ABI-encoded `submit` call on the transfer
//! validator. Solana destinations receive two instructions: a native ed25519
//! verification of the witness signature over the transfer digest, then the
//! governance `ExecuteTransaction` instruction of the proposal that releases
//! the funds.

use alloy::primitives::Bytes;
use alloy::sol_types::SolCall;

use super::address::ChainAddress;
use super::client::SubmissionPayload;
use crate::error::{WitnessError, WitnessResult};
use crate::models::Transfer;

alloy::sol! {
    interface ITransferValidator {
        function submit(
            bytes cashier,
            address tokenAddr,
            uint256 index,
            bytes from,
            address to,
            uint256 amount,
            bytes signature
        ) external;
    }
}

/// Native program verifying ed25519 signatures.
const ED25519_PROGRAM_ID: &str = "Ed25519SigVerify111111111111111111111111111";

/// Governance instruction tag of `ExecuteTransaction`.
const EXECUTE_TRANSACTION_TAG: u8 = 16;

/// 2-byte header plus one 14-byte offsets record.
const ED25519_DATA_START: usize = 16;

/// What the witness contributes to a submission.
#[derive(Debug, Clone)]
pub struct Witness {
    pub signature: Bytes,
    pub public_key: Bytes,
}

/// Builds the destination-specific submission for a signed transfer.
pub trait PayloadEncoder: Send + Sync {
    fn encode(&self, transfer: &Transfer, witness: &Witness) -> WitnessResult<SubmissionPayload>;
}

// =============================================================================
// EVM
// =============================================================================

/// `ITransferValidator.submit(...)` on the validator contract.
#[derive(Debug, Clone)]
pub struct EvmPayloadEncoder {
    validator: ChainAddress,
}

impl EvmPayloadEncoder {
    pub fn new(validator: ChainAddress) -> WitnessResult<Self> {
        validator.to_evm()?;
        Ok(Self { validator })
    }
}

impl PayloadEncoder for EvmPayloadEncoder {
    fn encode(&self, transfer: &Transfer, witness: &Witness) -> WitnessResult<SubmissionPayload> {
        let call = ITransferValidator::submitCall {
            cashier: Bytes::copy_from_slice(transfer.cashier_contract.as_bytes()),
            tokenAddr: transfer.co_token.to_evm()?,
            index: transfer.index,
            from: Bytes::copy_from_slice(transfer.sender.as_bytes()),
            to: transfer.recipient.to_evm()?,
            amount: transfer.rounded_amount,
            signature: witness.signature.clone(),
        };
        Ok(SubmissionPayload::ContractCall {
            contract: self.validator.clone(),
            calldata: Bytes::from(call.abi_encode()),
        })
    }
}

// =============================================================================
// Solana
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountMeta {
    pub pubkey: [u8; 32],
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn readonly(pubkey: [u8; 32]) -> Self {
        Self {
            pubkey,
            is_signer: false,
            is_writable: false,
        }
    }

    pub fn writable(pubkey: [u8; 32]) -> Self {
        Self {
            pubkey,
            is_signer: false,
            is_writable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: [u8; 32],
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

/// Accounts of a governance `ExecuteTransaction` call.
#[derive(Debug, Clone)]
pub struct ExecuteTransactionParams {
    pub governance: [u8; 32],
    pub proposal: [u8; 32],
    pub vote_record: [u8; 32],
    pub record_transaction: [u8; 32],
    pub transaction_accounts: Vec<AccountMeta>,
}

/// Tag-only instruction data; the fixed accounts come first, followed by
/// the accounts of the proposal transaction being executed.
pub fn execute_transaction(program_id: [u8; 32], params: &ExecuteTransactionParams) -> Instruction {
    let mut accounts = vec![
        AccountMeta::readonly(params.governance),
        AccountMeta::readonly(params.proposal),
        AccountMeta::readonly(params.vote_record),
        AccountMeta::writable(params.record_transaction),
    ];
    accounts.extend(params.transaction_accounts.iter().cloned());

    Instruction {
        program_id,
        accounts,
        data: vec![EXECUTE_TRANSACTION_TAG],
    }
}

pub fn ed25519_program_id() -> WitnessResult<[u8; 32]> {
    let mut id = [0u8; 32];
    let len = bs58::decode(ED25519_PROGRAM_ID)
        .onto(&mut id)
        .map_err(|e| WitnessError::Decode(format!("ed25519 program id: {e}")))?;
    if len != 32 {
        return Err(WitnessError::Decode("ed25519 program id is not 32 bytes".into()));
    }
    Ok(id)
}

/// Single-signature verification instruction with everything inline.
pub fn ed25519_verify_instruction(
    public_key: &[u8],
    signature: &[u8],
    message: &[u8],
) -> WitnessResult<Instruction> {
    if public_key.len() != 32 || signature.len() != 64 {
        return Err(WitnessError::Signing(format!(
            "ed25519 verification needs a 32-byte key and 64-byte signature, got {} and {}",
            public_key.len(),
            signature.len()
        )));
    }
    let public_key_offset = ED25519_DATA_START;
    let signature_offset = public_key_offset + 32;
    let message_offset = signature_offset + 64;
    let message_size = u16::try_from(message.len())
        .map_err(|_| WitnessError::Signing("message too long".into()))?;

    let mut data = Vec::with_capacity(message_offset + message.len());
    data.push(1); // number of signatures
    data.push(0); // padding
    for field in [
        signature_offset as u16,
        u16::MAX, // signature lives in this instruction
        public_key_offset as u16,
        u16::MAX,
        message_offset as u16,
        message_size,
        u16::MAX,
    ] {
        data.extend_from_slice(&field.to_le_bytes());
    }
    data.extend_from_slice(public_key);
    data.extend_from_slice(signature);
    data.extend_from_slice(message);

    Ok(Instruction {
        program_id: ed25519_program_id()?,
        accounts: Vec::new(),
        data,
    })
}

/// Governance accounts a Solana destination releases funds through.
#[derive(Debug, Clone)]
pub struct SolanaGovernance {
    pub program_id: ChainAddress,
    pub governance: ChainAddress,
    /// The validator address configured for the cashier
    pub proposal: ChainAddress,
    pub vote_record: ChainAddress,
    pub record_transaction: ChainAddress,
}

#[derive(Debug, Clone)]
pub struct SolanaPayloadEncoder {
    program_id: [u8; 32],
    governance: [u8; 32],
    proposal: [u8; 32],
    vote_record: [u8; 32],
    record_transaction: [u8; 32],
}

impl SolanaPayloadEncoder {
    pub fn new(accounts: &SolanaGovernance) -> WitnessResult<Self> {
        Ok(Self {
            program_id: accounts.program_id.to_pubkey()?,
            governance: accounts.governance.to_pubkey()?,
            proposal: accounts.proposal.to_pubkey()?,
            vote_record: accounts.vote_record.to_pubkey()?,
            record_transaction: accounts.record_transaction.to_pubkey()?,
        })
    }
}

impl PayloadEncoder for SolanaPayloadEncoder {
    fn encode(&self, transfer: &Transfer, witness: &Witness) -> WitnessResult<SubmissionPayload> {
        let verify = ed25519_verify_instruction(
            &witness.public_key,
            &witness.signature,
            transfer.digest().as_slice(),
        )?;
        let execute = execute_transaction(
            self.program_id,
            &ExecuteTransactionParams {
                governance: self.governance,
                proposal: self.proposal,
                vote_record: self.vote_record,
                record_transaction: self.record_transaction,
                transaction_accounts: vec![
                    AccountMeta::writable(transfer.recipient.to_pubkey()?),
                    AccountMeta::writable(transfer.co_token.to_pubkey()?),
                ],
            },
        );
        Ok(SubmissionPayload::Instructions(vec![verify, execute]))
    }
}
