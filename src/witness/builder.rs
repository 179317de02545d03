// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Assembles a [`Service`] from a [`Configuration`].
//!
//! Every address, key and chain name is resolved here, before any cycle
//! starts, so a bad setup is a startup failure and never a runtime one.

use std::sync::Arc;

use redb::Database;

use super::cashier::{
    Cashier, CashierChains, CashierConfig, CashierOptions, ReverseConfig, TokenCashier,
    DEFAULT_CHUNK_SIZE,
};
use super::service::{Service, ServiceOptions};
use crate::blockchain::payload::SolanaGovernance;
use crate::blockchain::signing::{load_secp256k1_key, Ed25519SignHandler};
use crate::blockchain::{
    decoder_for, signer_for, AddressDecoder, ChainAddress, ChainClient, ChainFamily, EvmClient,
    EvmPayloadEncoder, PayloadEncoder, SignHandler, SolanaClient, SolanaPayloadEncoder,
};
use crate::config::{CashierEntry, Configuration};
use crate::error::{WitnessError, WitnessResult};
use crate::models::TokenPairs;
use crate::notifier::{NoopNotifier, Notifier, WebhookNotifier};

pub fn build_service(cfg: &Configuration, db: Arc<Database>) -> WitnessResult<Service> {
    let source_family = cfg.source_family()?;
    let destination_family = cfg.destination_family();

    let signer = if cfg.private_key.is_empty() {
        tracing::warn!("No private key configured, running in observation-only mode");
        None
    } else {
        Some(signer_for(destination_family, &cfg.private_key)?)
    };

    let notifier = build_notifier(cfg, signer.as_deref());
    let source = connect(source_family, &cfg.client_url, None)?;
    let parts = Parts {
        source_decoder: decoder_for(source_family),
        destination_decoder: decoder_for(destination_family),
        destination_family,
    };

    let mut cashiers: Vec<Arc<dyn TokenCashier>> = Vec::with_capacity(cfg.cashiers.len());
    for entry in &cfg.cashiers {
        let submit = signer.is_some() && !cfg.disable_transfer_submit && !entry.disable_transfer_submit;
        let payer_key = match (submit, cfg.operator_key.is_empty()) {
            (false, _) => None,
            (true, true) => Some(cfg.private_key.as_str()),
            (true, false) => Some(cfg.operator_key.as_str()),
        };
        let destination = connect_destination(
            destination_family,
            &cfg.relayer_url_for(entry),
            payer_key,
        )?;

        let cashier = Cashier::new(
            parts.cashier_config(cfg, entry, submit)?,
            CashierChains {
                source: source.clone(),
                destination,
                recipients: parts.destination_decoder.clone(),
                encoder: parts.encoder(entry)?,
            },
            db.clone(),
            notifier.clone(),
        )?;
        tracing::info!(
            cashier = %entry.id,
            source = ?source_family,
            destination = ?destination_family,
            submit,
            pull = !entry.disable_pull,
            "Cashier configured"
        );
        cashiers.push(Arc::new(cashier));
    }

    Ok(Service::new(
        cashiers,
        signer,
        notifier,
        ServiceOptions {
            batch_size: cfg.batch_size,
            interval: cfg.interval(),
        },
    ))
}

fn build_notifier(cfg: &Configuration, signer: Option<&dyn SignHandler>) -> Arc<dyn Notifier> {
    let address = signer.map_or_else(|| "observer".to_string(), |s| s.address());
    let webhook = WebhookNotifier::new(
        &cfg.chain,
        &address,
        Some(cfg.slack_web_hook.clone()),
        Some(cfg.lark_web_hook.clone()),
    );
    if webhook.is_configured() {
        Arc::new(webhook)
    } else {
        Arc::new(NoopNotifier)
    }
}

fn connect(
    family: ChainFamily,
    url: &str,
    payer: Option<Arc<dyn SignHandler>>,
) -> WitnessResult<Arc<dyn ChainClient>> {
    Ok(match family {
        ChainFamily::Evm | ChainFamily::Iotex => Arc::new(EvmClient::connect(family, url, None)?),
        ChainFamily::Solana => Arc::new(SolanaClient::connect(url, payer)?),
    })
}

/// Destination client; with a payer key it can also submit.
fn connect_destination(
    family: ChainFamily,
    url: &str,
    payer_key: Option<&str>,
) -> WitnessResult<Arc<dyn ChainClient>> {
    let Some(key) = payer_key else {
        return connect(family, url, None);
    };
    Ok(match family {
        ChainFamily::Evm | ChainFamily::Iotex => Arc::new(EvmClient::connect(
            family,
            url,
            Some(load_secp256k1_key(key)?),
        )?),
        ChainFamily::Solana => {
            let payer: Arc<dyn SignHandler> = Arc::new(Ed25519SignHandler::from_hex(key)?);
            Arc::new(SolanaClient::connect(url, Some(payer))?)
        }
    })
}

/// Chain-wide decoders shared by every cashier.
struct Parts {
    source_decoder: Arc<dyn AddressDecoder>,
    destination_decoder: Arc<dyn AddressDecoder>,
    destination_family: ChainFamily,
}

impl Parts {
    fn source(&self, text: &str, what: &str) -> WitnessResult<ChainAddress> {
        parse(self.source_decoder.as_ref(), text, what)
    }

    fn destination(&self, text: &str, what: &str) -> WitnessResult<ChainAddress> {
        parse(self.destination_decoder.as_ref(), text, what)
    }

    fn cashier_config(
        &self,
        cfg: &Configuration,
        entry: &CashierEntry,
        submit: bool,
    ) -> WitnessResult<CashierConfig> {
        let mut pairs = TokenPairs::new();
        for pair in &entry.token_pairs {
            pairs.insert(
                self.source(&pair.token1, "token1")?,
                self.destination(&pair.token2, "token2")?,
            )?;
        }
        for round in &entry.decimal_round {
            pairs.set_decimal_round(&self.source(&round.token1, "decimalRound token")?, round.amount)?;
        }

        let reverse = match &entry.reverse {
            Some(reverse) if !reverse.cashier_contract_address.is_empty() => Some(ReverseConfig {
                contract: self.source(&reverse.cashier_contract_address, "reverse cashier")?,
                tokens: reverse
                    .tokens
                    .iter()
                    .map(|t| self.source(t, "reverse token"))
                    .collect::<WitnessResult<_>>()?,
            }),
            _ => None,
        };

        Ok(CashierConfig {
            id: entry.id.clone(),
            contract: self.source(&entry.cashier_contract_address, "cashierContractAddress")?,
            pairs,
            reverse,
            options: CashierOptions {
                confirm_blocks: cfg.confirm_block_number,
                start_height: entry.start_block_height,
                chunk_size: entry.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
                qps_limit: entry.qps_limit,
                disable_pull: entry.disable_pull,
                disable_submit: !submit,
            },
        })
    }

    fn encoder(&self, entry: &CashierEntry) -> WitnessResult<Arc<dyn PayloadEncoder>> {
        let validator = self.destination(&entry.validator_contract_address, "validatorContractAddress")?;
        match self.destination_family {
            ChainFamily::Evm | ChainFamily::Iotex => Ok(Arc::new(EvmPayloadEncoder::new(validator)?)),
            ChainFamily::Solana => {
                let gov = entry.governance.as_ref().ok_or_else(|| {
                    WitnessError::Config(format!(
                        "cashier {}: Solana destinations need governance accounts",
                        entry.id
                    ))
                })?;
                Ok(Arc::new(SolanaPayloadEncoder::new(&SolanaGovernance {
                    program_id: self.destination(&gov.program_id, "governance programId")?,
                    governance: self.destination(&gov.governance, "governance")?,
                    proposal: validator,
                    vote_record: self.destination(&gov.vote_record, "voteRecord")?,
                    record_transaction: self
                        .destination(&gov.record_transaction, "recordTransaction")?,
                })?))
            }
        }
    }
}

/// Configured addresses that fail to parse are configuration errors.
fn parse(decoder: &dyn AddressDecoder, text: &str, what: &str) -> WitnessResult<ChainAddress> {
    decoder
        .decode_string(text)
        .map_err(|e| WitnessError::Config(format!("{what}: {e}")))
}
