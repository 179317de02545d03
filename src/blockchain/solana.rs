// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Solana chain client over plain JSON-RPC.
//!
//! Heights are slots. Cashier programs emit `Receipt` events as Anchor
//! style `Program data:` log lines; deposits are found by walking the
//! program's signature history and parsing the logs of each transaction.
//!
//! Submission compiles a legacy message signed by the fee payer key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy::primitives::{Bytes, U256};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::address::{ChainAddress, ChainFamily};
use super::client::{ChainClient, SubmissionPayload, SubmissionState};
use super::payload::Instruction;
use super::signing::{SignHandler, SignatureScheme};
use crate::error::{WitnessError, WitnessResult};
use crate::models::RawEvent;

/// Page size of `getSignaturesForAddress`.
const SIGNATURE_PAGE: usize = 1000;

/// Slot was skipped, or is missing in long-term storage.
const SLOT_SKIPPED: i64 = -32007;
const SLOT_MISSING: i64 = -32009;

const COMMITMENT: &str = "confirmed";

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Clone, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SignatureInfo {
    signature: String,
    slot: u64,
    #[serde(default)]
    err: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionMeta {
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    log_messages: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ConfirmedTransaction {
    slot: u64,
    meta: Option<TransactionMeta>,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    blockhash: String,
}

#[derive(Debug, Deserialize)]
struct Contextual<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct LatestBlockhash {
    blockhash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    confirmation_status: Option<String>,
}

pub struct SolanaClient {
    http: reqwest::Client,
    endpoint: String,
    payer: Option<Arc<dyn SignHandler>>,
    next_id: AtomicU64,
}

impl SolanaClient {
    /// `payer` signs and pays for submitted transactions; it must be ed25519.
    pub fn connect(endpoint: &str, payer: Option<Arc<dyn SignHandler>>) -> WitnessResult<Self> {
        url::Url::parse(endpoint)
            .map_err(|e| WitnessError::Config(format!("invalid RPC URL {endpoint}: {e}")))?;
        if let Some(payer) = &payer {
            if payer.scheme() != SignatureScheme::Ed25519 {
                return Err(WitnessError::Config(
                    "Solana fee payer must be an ed25519 key".into(),
                ));
            }
        }
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            payer,
            next_id: AtomicU64::new(1),
        })
    }

    /// One JSON-RPC round trip. The outer error is transport; the inner one
    /// is the node's error object.
    async fn call_raw(
        &self,
        method: &str,
        params: Value,
    ) -> WitnessResult<Result<Value, RpcErrorObject>> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(WitnessError::chain)?
            .error_for_status()
            .map_err(WitnessError::chain)?
            .json::<RpcResponse>()
            .await
            .map_err(WitnessError::chain)?;

        Ok(match response.error {
            Some(err) => Err(err),
            None => Ok(response.result),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> WitnessResult<T> {
        let value = self.call_raw(method, params).await?.map_err(|e| {
            WitnessError::ChainUnavailable(format!("{method} failed ({}): {}", e.code, e.message))
        })?;
        serde_json::from_value(value)
            .map_err(|e| WitnessError::Decode(format!("{method} response: {e}")))
    }

    /// Confirmed signatures of `program` within `[from, to]`, oldest first.
    async fn signatures_in_range(
        &self,
        program: &str,
        from: u64,
        to: u64,
    ) -> WitnessResult<Vec<SignatureInfo>> {
        let mut collected = Vec::new();
        let mut before: Option<String> = None;
        loop {
            let mut options = json!({ "limit": SIGNATURE_PAGE, "commitment": COMMITMENT });
            if let Some(before) = &before {
                options["before"] = json!(before);
            }
            let page: Vec<SignatureInfo> = self
                .call("getSignaturesForAddress", json!([program, options]))
                .await?;
            let full = page.len() == SIGNATURE_PAGE;
            let oldest = page.last().map(|s| (s.signature.clone(), s.slot));

            collected.extend(
                page.into_iter()
                    .filter(|s| s.slot >= from && s.slot <= to && s.err.is_none()),
            );

            match oldest {
                Some((signature, slot)) if full && slot >= from => before = Some(signature),
                _ => break,
            }
        }
        collected.reverse();
        Ok(collected)
    }
}

#[async_trait]
impl ChainClient for SolanaClient {
    fn family(&self) -> ChainFamily {
        ChainFamily::Solana
    }

    async fn current_height(&self) -> WitnessResult<u64> {
        self.call("getSlot", json!([{ "commitment": COMMITMENT }]))
            .await
    }

    async fn block_hash(&self, height: u64) -> WitnessResult<Option<Bytes>> {
        let params = json!([height, {
            "encoding": "json",
            "transactionDetails": "none",
            "rewards": false,
            "maxSupportedTransactionVersion": 0,
            "commitment": COMMITMENT,
        }]);
        match self.call_raw("getBlock", params).await? {
            Ok(Value::Null) => Ok(None),
            Ok(value) => {
                let header: BlockHeader = serde_json::from_value(value)
                    .map_err(|e| WitnessError::Decode(format!("getBlock response: {e}")))?;
                Ok(Some(decode_bs58(&header.blockhash)?))
            }
            Err(e) if e.code == SLOT_SKIPPED || e.code == SLOT_MISSING => Ok(None),
            Err(e) => Err(WitnessError::ChainUnavailable(format!(
                "getBlock failed ({}): {}",
                e.code, e.message
            ))),
        }
    }

    async fn logs_in_range(
        &self,
        contract: &ChainAddress,
        from: u64,
        to: u64,
    ) -> WitnessResult<Vec<RawEvent>> {
        let program = bs58::encode(contract.to_pubkey()?).into_string();
        let signatures = self.signatures_in_range(&program, from, to).await?;

        let mut hashes: HashMap<u64, Option<Bytes>> = HashMap::new();
        let mut events = Vec::new();
        for info in signatures {
            let tx: Option<ConfirmedTransaction> = self
                .call(
                    "getTransaction",
                    json!([info.signature, {
                        "encoding": "json",
                        "maxSupportedTransactionVersion": 0,
                        "commitment": COMMITMENT,
                    }]),
                )
                .await?;
            let Some(tx) = tx else {
                return Err(WitnessError::ChainUnavailable(format!(
                    "transaction {} not yet available",
                    info.signature
                )));
            };
            let Some(meta) = tx.meta else { continue };
            if meta.err.is_some() {
                continue;
            }
            let logs = meta.log_messages.unwrap_or_default();
            let receipts = parse_program_logs(&program, &logs);
            if receipts.is_empty() {
                continue;
            }

            let block_hash = match hashes.get(&tx.slot) {
                Some(hash) => hash.clone(),
                None => {
                    let hash = self.block_hash(tx.slot).await?;
                    hashes.insert(tx.slot, hash.clone());
                    hash
                }
            };
            let tx_hash = decode_bs58(&info.signature)?;

            for (log_index, data) in receipts {
                match decode_receipt(&data) {
                    Ok(receipt) => events.push(RawEvent {
                        block_height: tx.slot,
                        block_hash: block_hash.clone(),
                        tx_hash: tx_hash.clone(),
                        log_index,
                        emitter: contract.clone(),
                        token: ChainAddress::from(receipt.token),
                        index: U256::from(receipt.id),
                        sender: ChainAddress::from(receipt.sender),
                        recipient: receipt.recipient,
                        amount: U256::from(receipt.amount),
                        fee: U256::from(receipt.fee),
                    }),
                    Err(e) => tracing::warn!(
                        signature = %info.signature,
                        log_index,
                        error = %e,
                        "Skipping undecodable program data"
                    ),
                }
            }
        }
        Ok(events)
    }

    async fn submit(&self, payload: &SubmissionPayload) -> WitnessResult<String> {
        let payer = self.payer.as_ref().ok_or_else(|| {
            WitnessError::Config("Solana client has no fee payer; submission disabled".into())
        })?;
        let SubmissionPayload::Instructions(instructions) = payload else {
            return Err(WitnessError::SubmissionRejected(
                "Solana destinations only accept instructions".into(),
            ));
        };

        let latest: Contextual<LatestBlockhash> = self
            .call("getLatestBlockhash", json!([{ "commitment": COMMITMENT }]))
            .await?;
        let recent = decode_bs58(&latest.value.blockhash)?;
        let recent: [u8; 32] = recent
            .as_ref()
            .try_into()
            .map_err(|_| WitnessError::Decode("blockhash is not 32 bytes".into()))?;

        let payer_key: [u8; 32] = payer
            .public_key()
            .as_ref()
            .try_into()
            .map_err(|_| WitnessError::Signing("fee payer key is not 32 bytes".into()))?;
        let message = compile_message(&payer_key, instructions, &recent)?;
        let signature = payer.sign(&message)?;

        let mut wire = Vec::with_capacity(1 + signature.len() + message.len());
        encode_compact_u16(&mut wire, 1);
        wire.extend_from_slice(&signature);
        wire.extend_from_slice(&message);

        let params = json!([BASE64.encode(&wire), {
            "encoding": "base64",
            "preflightCommitment": COMMITMENT,
        }]);
        match self.call_raw("sendTransaction", params).await? {
            Ok(Value::String(sig)) => Ok(sig),
            Ok(other) => Err(WitnessError::Decode(format!(
                "unexpected sendTransaction result {other}"
            ))),
            Err(e) => Err(WitnessError::SubmissionRejected(format!(
                "{} ({})",
                e.message, e.code
            ))),
        }
    }

    async fn submission_status(&self, tx_hash: &str) -> WitnessResult<SubmissionState> {
        let statuses: Contextual<Vec<Option<SignatureStatus>>> = self
            .call(
                "getSignatureStatuses",
                json!([[tx_hash], { "searchTransactionHistory": true }]),
            )
            .await?;
        Ok(match statuses.value.into_iter().next().flatten() {
            None => SubmissionState::Pending,
            Some(status) if status.err.is_some() => SubmissionState::Reverted,
            Some(status) => match status.confirmation_status.as_deref() {
                Some("confirmed") | Some("finalized") => SubmissionState::Settled,
                _ => SubmissionState::Pending,
            },
        })
    }
}

fn decode_bs58(text: &str) -> WitnessResult<Bytes> {
    bs58::decode(text)
        .into_vec()
        .map(Bytes::from)
        .map_err(|e| WitnessError::Decode(format!("base58 {text}: {e}")))
}

// =============================================================================
// Event logs
// =============================================================================

/// `sha256("event:Receipt")[..8]`
fn receipt_discriminator() -> [u8; 8] {
    let hash = Sha256::digest(b"event:Receipt");
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash[..8]);
    out
}

/// `Program data:` payloads emitted directly by `program`, keyed by their
/// ordinal among all data lines of the transaction.
fn parse_program_logs(program: &str, logs: &[String]) -> Vec<(u64, Vec<u8>)> {
    let mut stack: Vec<&str> = Vec::new();
    let mut ordinal = 0u64;
    let mut found = Vec::new();

    for line in logs {
        if let Some(data) = line.strip_prefix("Program data: ") {
            if stack.last() == Some(&program) {
                if let Ok(bytes) = BASE64.decode(data.trim()) {
                    found.push((ordinal, bytes));
                }
            }
            ordinal += 1;
            continue;
        }
        let Some(rest) = line.strip_prefix("Program ") else {
            continue;
        };
        let mut words = rest.split_whitespace();
        let (Some(id), Some(action)) = (words.next(), words.next()) else {
            continue;
        };
        match action {
            "invoke" => stack.push(id),
            "success" | "failed:" | "failed" => {
                if stack.last() == Some(&id) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }
    found
}

#[derive(Debug, PartialEq, Eq)]
struct SolanaReceipt {
    token: [u8; 32],
    id: u64,
    sender: [u8; 32],
    recipient: String,
    amount: u64,
    fee: u64,
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> WitnessResult<&'a [u8]> {
        if self.data.len() < n {
            return Err(WitnessError::Decode("receipt data truncated".into()));
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn pubkey(&mut self) -> WitnessResult<[u8; 32]> {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.take(32)?);
        Ok(out)
    }

    fn u64(&mut self) -> WitnessResult<u64> {
        let mut out = [0u8; 8];
        out.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(out))
    }

    fn u32(&mut self) -> WitnessResult<u32> {
        let mut out = [0u8; 4];
        out.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(out))
    }
}

fn decode_receipt(data: &[u8]) -> WitnessResult<SolanaReceipt> {
    let mut reader = Reader { data };
    if reader.take(8)? != receipt_discriminator() {
        return Err(WitnessError::Decode("not a receipt event".into()));
    }
    let token = reader.pubkey()?;
    let id = reader.u64()?;
    let sender = reader.pubkey()?;
    let len = reader.u32()? as usize;
    let recipient = std::str::from_utf8(reader.take(len)?)
        .map_err(|e| WitnessError::Decode(format!("recipient is not UTF-8: {e}")))?
        .to_string();
    let amount = reader.u64()?;
    let fee = reader.u64()?;
    Ok(SolanaReceipt {
        token,
        id,
        sender,
        recipient,
        amount,
        fee,
    })
}

// =============================================================================
// Message compilation
// =============================================================================

fn encode_compact_u16(out: &mut Vec<u8>, mut value: usize) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

/// Legacy message with `payer` as the only signer.
fn compile_message(
    payer: &[u8; 32],
    instructions: &[Instruction],
    recent_blockhash: &[u8; 32],
) -> WitnessResult<Vec<u8>> {
    // (key, is_signer, is_writable) in first-seen order
    let mut metas: Vec<([u8; 32], bool, bool)> = vec![(*payer, true, true)];
    let mut upsert = |key: [u8; 32], signer: bool, writable: bool| {
        match metas.iter_mut().find(|(k, _, _)| *k == key) {
            Some(entry) => {
                entry.1 |= signer;
                entry.2 |= writable;
            }
            None => metas.push((key, signer, writable)),
        }
    };
    for ix in instructions {
        for account in &ix.accounts {
            upsert(account.pubkey, account.is_signer, account.is_writable);
        }
        upsert(ix.program_id, false, false);
    }

    if metas.iter().skip(1).any(|(_, signer, _)| *signer) {
        return Err(WitnessError::Signing(
            "instructions require signers other than the fee payer".into(),
        ));
    }

    let group = |signer: bool, writable: bool| {
        metas
            .iter()
            .filter(move |(_, s, w)| *s == signer && *w == writable)
            .map(|(k, _, _)| *k)
    };
    let keys: Vec<[u8; 32]> = group(true, true)
        .chain(group(true, false))
        .chain(group(false, true))
        .chain(group(false, false))
        .collect();
    if keys.len() > u8::MAX as usize {
        return Err(WitnessError::Signing("too many accounts".into()));
    }

    let signed = metas.iter().filter(|(_, s, _)| *s).count();
    let readonly_signed = metas.iter().filter(|(_, s, w)| *s && !*w).count();
    let readonly_unsigned = metas.iter().filter(|(_, s, w)| !*s && !*w).count();
    let index_of = |key: &[u8; 32]| keys.iter().position(|k| k == key).unwrap_or(0) as u8;

    let mut message = vec![signed as u8, readonly_signed as u8, readonly_unsigned as u8];
    encode_compact_u16(&mut message, keys.len());
    for key in &keys {
        message.extend_from_slice(key);
    }
    message.extend_from_slice(recent_blockhash);
    encode_compact_u16(&mut message, instructions.len());
    for ix in instructions {
        message.push(index_of(&ix.program_id));
        encode_compact_u16(&mut message, ix.accounts.len());
        for account in &ix.accounts {
            message.push(index_of(&account.pubkey));
        }
        encode_compact_u16(&mut message, ix.data.len());
        message.extend_from_slice(&ix.data);
    }
    Ok(message)
}
