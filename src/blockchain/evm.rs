// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM chain client.
//!
//! Serves Ethereum and its clones as well as IoTeX through its web3
//! endpoint. Cashier contracts announce deposits with a `Receipt` event.

use alloy::{
    eips::BlockNumberOrTag,
    network::EthereumWallet,
    primitives::{Bytes, B256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::{Filter, Log, TransactionRequest},
    signers::local::PrivateKeySigner,
    sol_types::SolEvent,
    transports::{RpcError, TransportErrorKind},
};
use async_trait::async_trait;

use super::address::{ChainAddress, ChainFamily};
use super::client::{ChainClient, SubmissionPayload, SubmissionState};
use crate::error::{WitnessError, WitnessResult};
use crate::models::RawEvent;

alloy::sol! {
    event Receipt(
        address indexed token,
        uint256 indexed id,
        address sender,
        string recipient,
        uint256 amount,
        uint256 fee
    );
}

/// JSON-RPC client for EVM-compatible chains.
pub struct EvmClient {
    family: ChainFamily,
    provider: DynProvider,
    can_submit: bool,
}

impl EvmClient {
    /// Connect to `rpc_url`; with a signer the client can also submit.
    pub fn connect(
        family: ChainFamily,
        rpc_url: &str,
        signer: Option<PrivateKeySigner>,
    ) -> WitnessResult<Self> {
        let url: url::Url = rpc_url.parse().map_err(|e: url::ParseError| {
            WitnessError::Config(format!("invalid RPC URL {rpc_url}: {e}"))
        })?;

        let can_submit = signer.is_some();
        let provider = match signer {
            Some(signer) => ProviderBuilder::new()
                .wallet(EthereumWallet::from(signer))
                .connect_http(url)
                .erased(),
            None => ProviderBuilder::new().connect_http(url).erased(),
        };

        Ok(Self {
            family,
            provider,
            can_submit,
        })
    }
}

#[async_trait]
impl ChainClient for EvmClient {
    fn family(&self) -> ChainFamily {
        self.family
    }

    async fn current_height(&self) -> WitnessResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(WitnessError::chain)
    }

    async fn block_hash(&self, height: u64) -> WitnessResult<Option<Bytes>> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(height))
            .await
            .map_err(WitnessError::chain)?;
        Ok(block.map(|b| Bytes::copy_from_slice(b.header.hash.as_slice())))
    }

    async fn logs_in_range(
        &self,
        contract: &ChainAddress,
        from: u64,
        to: u64,
    ) -> WitnessResult<Vec<RawEvent>> {
        let filter = Filter::new()
            .address(contract.to_evm()?)
            .event_signature(Receipt::SIGNATURE_HASH)
            .from_block(from)
            .to_block(to);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(WitnessError::chain)?;

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            match decode_receipt_log(log) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(
                    tx_hash = ?log.transaction_hash,
                    log_index = ?log.log_index,
                    error = %e,
                    "Skipping undecodable receipt log"
                ),
            }
        }
        events.sort_by_key(|e| (e.block_height, e.log_index));
        Ok(events)
    }

    async fn submit(&self, payload: &SubmissionPayload) -> WitnessResult<String> {
        if !self.can_submit {
            return Err(WitnessError::Config(
                "EVM client has no signer; submission disabled".into(),
            ));
        }
        let SubmissionPayload::ContractCall { contract, calldata } = payload else {
            return Err(WitnessError::SubmissionRejected(
                "EVM destinations only accept contract calls".into(),
            ));
        };

        let tx = TransactionRequest::default()
            .to(contract.to_evm()?)
            .input(calldata.clone().into());

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(classify_send_error)?;

        Ok(format!("{:?}", pending.tx_hash()))
    }

    async fn submission_status(&self, tx_hash: &str) -> WitnessResult<SubmissionState> {
        let hash: B256 = tx_hash
            .parse()
            .map_err(|e| WitnessError::Decode(format!("invalid tx hash {tx_hash}: {e}")))?;

        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(WitnessError::chain)?;

        Ok(match receipt {
            None => SubmissionState::Pending,
            Some(r) if r.status() => SubmissionState::Settled,
            Some(_) => SubmissionState::Reverted,
        })
    }
}

/// An error object from the node means the transaction itself was refused.
fn classify_send_error(err: RpcError<TransportErrorKind>) -> WitnessError {
    match err.as_error_resp() {
        Some(resp) => WitnessError::SubmissionRejected(resp.message.to_string()),
        None => WitnessError::chain(err),
    }
}

pub(crate) fn decode_receipt_log(log: &Log) -> WitnessResult<RawEvent> {
    let decoded = log
        .log_decode::<Receipt>()
        .map_err(|e| WitnessError::Decode(format!("receipt log: {e}")))?;
    let receipt = &decoded.inner.data;

    let block_height = log
        .block_number
        .ok_or_else(|| WitnessError::Decode("log without block number".into()))?;
    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| WitnessError::Decode("log without transaction hash".into()))?;
    let log_index = log
        .log_index
        .ok_or_else(|| WitnessError::Decode("log without index".into()))?;

    Ok(RawEvent {
        block_height,
        block_hash: log.block_hash.map(|h| Bytes::copy_from_slice(h.as_slice())),
        tx_hash: Bytes::copy_from_slice(tx_hash.as_slice()),
        log_index,
        emitter: ChainAddress::from(log.address()),
        token: ChainAddress::from(receipt.token),
        index: receipt.id,
        sender: ChainAddress::from(receipt.sender),
        recipient: receipt.recipient.clone(),
        amount: receipt.amount,
        fee: receipt.fee,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, LogData, U256};

    fn receipt_log(data: LogData) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0xca),
                data,
            },
            block_hash: Some(B256::repeat_byte(0xbb)),
            block_number: Some(120),
            transaction_hash: Some(B256::repeat_byte(0x11)),
            log_index: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn decodes_receipt_event() {
        let event = Receipt {
            token: Address::repeat_byte(0x01),
            id: U256::from(77u64),
            sender: Address::repeat_byte(0x02),
            recipient: "io1recipient".to_string(),
            amount: U256::from(5_000u64),
            fee: U256::from(10u64),
        };
        let raw = decode_receipt_log(&receipt_log(event.encode_log_data())).unwrap();

        assert_eq!(raw.block_height, 120);
        assert_eq!(raw.log_index, 3);
        assert_eq!(raw.tx_hash.as_ref(), B256::repeat_byte(0x11).as_slice());
        assert_eq!(raw.emitter, ChainAddress::from(Address::repeat_byte(0xca)));
        assert_eq!(raw.token, ChainAddress::from(Address::repeat_byte(0x01)));
        assert_eq!(raw.index, U256::from(77u64));
        assert_eq!(raw.recipient, "io1recipient");
        assert_eq!(raw.amount, U256::from(5_000u64));
        assert_eq!(raw.fee, U256::from(10u64));
    }

    #[test]
    fn rejects_foreign_event() {
        let data = LogData::new_unchecked(vec![B256::repeat_byte(0x99)], Bytes::new());
        assert!(matches!(
            decode_receipt_log(&receipt_log(data)),
            Err(WitnessError::Decode(_))
        ));
    }

    #[test]
    fn rejects_invalid_rpc_url() {
        assert!(matches!(
            EvmClient::connect(ChainFamily::Evm, "not a url", None),
            Err(WitnessError::Config(_))
        ));
    }
}
