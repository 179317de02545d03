// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Witness Service
//!
//! Owns the cashiers and the witness key, and drives one independent
//! polling cycle per cashier. A cycle runs its stages sequentially:
//! pull, confirm, settle, then sign and submit.
//!
//! Errors are handled by severity:
//!
//! | Severity | Effect |
//! |----------|--------|
//! | Retryable | logged, retried next interval |
//! | CashierFatal | that cashier halts; operators are notified |
//! | ProcessFatal | the whole service shuts down |

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cashier::{CashierSummary, SubmitReport, TokenCashier};
use crate::blockchain::SignHandler;
use crate::error::{Severity, WitnessResult};
use crate::models::{Transfer, TransferStatus};
use crate::notifier::Notifier;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub batch_size: usize,
    pub interval: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            interval: DEFAULT_INTERVAL,
        }
    }
}

/// Liveness of one cashier's cycle.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashierHealth {
    pub halted: bool,
    pub cycles: u64,
    pub last_cycle: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Summary plus health, as served by the status API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashierStatus {
    #[serde(flatten)]
    pub summary: CashierSummary,
    #[serde(flatten)]
    pub health: CashierHealth,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub recorded: usize,
    pub confirmed: usize,
    pub resolved: usize,
    pub submit: SubmitReport,
}

impl CycleReport {
    fn is_idle(&self) -> bool {
        self.recorded == 0
            && self.confirmed == 0
            && self.resolved == 0
            && self.submit == SubmitReport::default()
    }
}

type HealthMap = Arc<RwLock<HashMap<String, CashierHealth>>>;

pub struct Service {
    cashiers: Vec<Arc<dyn TokenCashier>>,
    signer: Option<Arc<dyn SignHandler>>,
    notifier: Arc<dyn Notifier>,
    options: ServiceOptions,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    health: HealthMap,
}

impl Service {
    /// Without a signer the service only observes: it scans and confirms
    /// but never signs or submits.
    pub fn new(
        cashiers: Vec<Arc<dyn TokenCashier>>,
        signer: Option<Arc<dyn SignHandler>>,
        notifier: Arc<dyn Notifier>,
        options: ServiceOptions,
    ) -> Self {
        let health = cashiers
            .iter()
            .map(|c| (c.id().to_string(), CashierHealth::default()))
            .collect();
        Self {
            cashiers,
            signer,
            notifier,
            options,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            health: Arc::new(RwLock::new(health)),
        }
    }

    /// Cancelled on [`stop`](Self::stop) or on a process-fatal error.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn signer_address(&self) -> Option<String> {
        self.signer.as_ref().map(|s| s.address())
    }

    /// Spawn one cycle per cashier and return immediately.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            tracing::warn!("Witness service already started");
            return;
        }
        tracing::info!(
            cashiers = self.cashiers.len(),
            witness = ?self.signer_address(),
            interval_secs = self.options.interval.as_secs(),
            batch_size = self.options.batch_size,
            "Witness service starting"
        );
        for cashier in &self.cashiers {
            let cycle = CashierCycle {
                cashier: cashier.clone(),
                signer: self.signer.clone(),
                notifier: self.notifier.clone(),
                options: self.options.clone(),
                health: self.health.clone(),
            };
            tasks.push(tokio::spawn(cycle.run(self.shutdown.clone())));
        }
    }

    /// Signal shutdown and wait for in-flight cycles to finish.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Cashier task panicked");
            }
        }
        tracing::info!("Witness service stopped");
    }

    /// Bounded replay of one height across every cashier. Errors abort the
    /// replay immediately.
    pub async fn process_one_block(&self, height: u64) -> WitnessResult<()> {
        for cashier in &self.cashiers {
            let mut report = CycleReport::default();
            if cashier.pull_enabled() {
                report.recorded = cashier.pull_block(height).await?;
            }
            report.confirmed = cashier.confirm(self.options.batch_size).await?;
            if let Some(signer) = self.submitter_for(cashier.as_ref()) {
                report.resolved = cashier.check_settlement(self.options.batch_size).await?;
                let batch = cashier.candidates(self.options.batch_size).await?;
                report.submit = cashier.sign_and_submit(&batch, signer.as_ref()).await?;
            }
            tracing::info!(
                cashier = %cashier.id(),
                height,
                recorded = report.recorded,
                confirmed = report.confirmed,
                submitted = report.submit.submitted,
                "Replayed block"
            );
        }
        Ok(())
    }

    fn submitter_for(&self, cashier: &dyn TokenCashier) -> Option<Arc<dyn SignHandler>> {
        if cashier.submit_enabled() {
            self.signer.clone()
        } else {
            None
        }
    }

    pub async fn status(&self) -> WitnessResult<Vec<CashierStatus>> {
        let health = self.health.read().await;
        self.cashiers
            .iter()
            .map(|cashier| {
                Ok(CashierStatus {
                    summary: cashier.summary()?,
                    health: health.get(cashier.id()).cloned().unwrap_or_default(),
                })
            })
            .collect()
    }

    /// `None` when no cashier has this id.
    pub fn transfers(
        &self,
        cashier_id: &str,
        status: TransferStatus,
        limit: usize,
    ) -> WitnessResult<Option<Vec<Transfer>>> {
        self.cashiers
            .iter()
            .find(|c| c.id() == cashier_id)
            .map(|c| c.transfers(status, limit))
            .transpose()
    }
}

/// Everything one spawned cycle needs.
struct CashierCycle {
    cashier: Arc<dyn TokenCashier>,
    signer: Option<Arc<dyn SignHandler>>,
    notifier: Arc<dyn Notifier>,
    options: ServiceOptions,
    health: HealthMap,
}

impl CashierCycle {
    async fn run(self, shutdown: CancellationToken) {
        let id = self.cashier.id().to_string();
        tracing::info!(cashier = %id, "Cashier cycle starting");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            // In-flight calls always run to completion; only the wait races
            // with cancellation.
            let outcome = self.run_once().await;
            let fatal = self.record(&id, outcome, &shutdown).await;
            if fatal {
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.options.interval) => {},
                _ = shutdown.cancelled() => break,
            }
        }
        tracing::info!(cashier = %id, "Cashier cycle shutting down");
    }

    async fn run_once(&self) -> WitnessResult<CycleReport> {
        let cashier = self.cashier.as_ref();
        let batch_size = self.options.batch_size;
        let mut report = CycleReport::default();

        if cashier.pull_enabled() {
            report.recorded = cashier.pull(u64::MAX).await?;
        }
        report.confirmed = cashier.confirm(batch_size).await?;

        let signer = match &self.signer {
            Some(signer) if cashier.submit_enabled() => signer,
            _ => return Ok(report),
        };
        report.resolved = cashier.check_settlement(batch_size).await?;
        let batch = cashier.candidates(batch_size).await?;
        if !batch.is_empty() {
            report.submit = cashier.sign_and_submit(&batch, signer.as_ref()).await?;
        }
        Ok(report)
    }

    /// Log and account for one cycle. Returns true when this cycle must stop.
    async fn record(
        &self,
        id: &str,
        outcome: WitnessResult<CycleReport>,
        shutdown: &CancellationToken,
    ) -> bool {
        let mut health = self.health.write().await;
        let entry = health.entry(id.to_string()).or_default();
        entry.cycles += 1;
        entry.last_cycle = Some(Utc::now());

        let err = match outcome {
            Ok(report) => {
                entry.last_error = None;
                if report.is_idle() {
                    tracing::debug!(cashier = %id, "Cycle idle");
                } else {
                    tracing::info!(
                        cashier = %id,
                        recorded = report.recorded,
                        confirmed = report.confirmed,
                        resolved = report.resolved,
                        signed = report.submit.signed,
                        submitted = report.submit.submitted,
                        rejected = report.submit.rejected,
                        failed = report.submit.failed,
                        "Cycle completed"
                    );
                }
                return false;
            }
            Err(err) => err,
        };

        entry.last_error = Some(err.to_string());
        match err.severity() {
            Severity::Retryable => {
                tracing::warn!(cashier = %id, error = %err, "Cycle failed, will retry");
                false
            }
            Severity::CashierFatal => {
                entry.halted = true;
                drop(health);
                tracing::error!(cashier = %id, error = %err, "Cashier halted");
                self.notifier
                    .notify(&format!("cashier {id} halted: {err}"))
                    .await;
                true
            }
            Severity::ProcessFatal => {
                entry.halted = true;
                drop(health);
                tracing::error!(cashier = %id, error = %err, "Fatal error, stopping service");
                self.notifier
                    .notify(&format!("witness stopping, cashier {id}: {err}"))
                    .await;
                shutdown.cancel();
                true
            }
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("cashiers", &self.cashiers.iter().map(|c| c.id()).collect::<Vec<_>>())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WitnessError;
    use crate::blockchain::address::EvmAddressDecoder;
    use crate::blockchain::signing::Secp256k1SignHandler;
    use crate::blockchain::{ChainFamily, EvmPayloadEncoder};
    use crate::models::TokenPairs;
    use crate::notifier::NoopNotifier;
    use crate::storage::open_database;
    use crate::test_utils::{
        evm_address, sample_event, MockChain, CASHIER_CONTRACT, DESTINATION_TOKEN, SOURCE_TOKEN,
    };
    use crate::witness::cashier::{Cashier, CashierChains, CashierConfig, CashierOptions};
    use alloy::primitives::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    struct RecordingNotifier(std::sync::Mutex<Vec<String>>);

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    fn cashier(
        id: &str,
        db: Arc<redb::Database>,
        source: Arc<MockChain>,
        destination: Arc<MockChain>,
        options: CashierOptions,
    ) -> Arc<dyn TokenCashier> {
        let mut pairs = TokenPairs::new();
        pairs
            .insert(evm_address(SOURCE_TOKEN), evm_address(DESTINATION_TOKEN))
            .unwrap();
        Arc::new(
            Cashier::new(
                CashierConfig {
                    id: id.into(),
                    contract: evm_address(CASHIER_CONTRACT),
                    pairs,
                    reverse: None,
                    options,
                },
                CashierChains {
                    source,
                    destination,
                    recipients: Arc::new(EvmAddressDecoder),
                    encoder: Arc::new(EvmPayloadEncoder::new(evm_address(0xee)).unwrap()),
                },
                db,
                Arc::new(NoopNotifier),
            )
            .unwrap(),
        )
    }

    fn signer() -> Option<Arc<dyn SignHandler>> {
        Some(Arc::new(Secp256k1SignHandler::from_key_text(KEY).unwrap()))
    }

    fn fast() -> ServiceOptions {
        ServiceOptions {
            batch_size: 10,
            interval: Duration::from_millis(20),
        }
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn continuous_cycle_submits_confirmed_transfers() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_database(&dir.path().join("witness.redb")).unwrap();
        let source = MockChain::new(ChainFamily::Evm);
        let destination = MockChain::new(ChainFamily::Evm);
        source.set_head(100);
        source.push_event(sample_event(50, 0, 5_000));
        source.push_event(sample_event(60, 0, 5_000));

        let service = Service::new(
            vec![cashier("c1", db, source, destination.clone(), CashierOptions::default())],
            signer(),
            Arc::new(NoopNotifier),
            fast(),
        );
        service.start().await;
        wait_until(|| destination.submissions().len() == 2).await;
        service.stop().await;

        let status = service.status().await.unwrap();
        assert_eq!(status[0].summary.cursor, Some(80));
        assert!(!status[0].health.halted);
        assert!(status[0].health.cycles >= 1);
    }

    #[tokio::test]
    async fn observation_mode_never_submits() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_database(&dir.path().join("witness.redb")).unwrap();
        let source = MockChain::new(ChainFamily::Evm);
        let destination = MockChain::new(ChainFamily::Evm);
        source.set_head(100);
        source.push_event(sample_event(50, 0, 5_000));

        let service = Service::new(
            vec![cashier("c1", db, source, destination.clone(), CashierOptions::default())],
            None,
            Arc::new(NoopNotifier),
            fast(),
        );
        service.process_one_block(50).await.unwrap();
        assert!(destination.submissions().is_empty());
        let confirmed = service
            .transfers("c1", TransferStatus::Confirmed, 10)
            .unwrap()
            .unwrap();
        assert_eq!(confirmed.len(), 1);
        assert!(service.transfers("nope", TransferStatus::New, 10).unwrap().is_none());
    }

    #[tokio::test]
    async fn reorg_halts_only_the_affected_cashier() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_database(&dir.path().join("witness.redb")).unwrap();
        let broken = MockChain::new(ChainFamily::Evm);
        let healthy = MockChain::new(ChainFamily::Evm);
        let destination = MockChain::new(ChainFamily::Evm);
        broken.set_head(100);
        healthy.set_head(100);

        let notifier = Arc::new(RecordingNotifier(std::sync::Mutex::new(Vec::new())));
        let service = Service::new(
            vec![
                cashier("broken", db.clone(), broken.clone(), destination.clone(), CashierOptions::default()),
                cashier("healthy", db, healthy.clone(), destination, CashierOptions::default()),
            ],
            signer(),
            notifier.clone(),
            fast(),
        );
        service.start().await;

        // Let the first scan set the cursor at 80, then rewrite history there.
        for _ in 0..200 {
            let status = service.status().await.unwrap();
            if status.iter().all(|s| s.summary.cursor == Some(80)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        broken.set_block_hash(80, Bytes::from(vec![0xde; 32]));
        broken.set_head(120);
        healthy.set_head(120);
        wait_until(|| !notifier.0.lock().unwrap().is_empty()).await;
        wait_until(|| healthy.log_queries().len() >= 2).await;
        service.stop().await;

        let status = service.status().await.unwrap();
        let broken_status = status.iter().find(|s| s.summary.id == "broken").unwrap();
        let healthy_status = status.iter().find(|s| s.summary.id == "healthy").unwrap();
        assert!(broken_status.health.halted);
        assert_eq!(broken_status.summary.cursor, Some(80));
        assert!(!healthy_status.health.halted);
        assert_eq!(healthy_status.summary.cursor, Some(100));
        assert!(notifier.0.lock().unwrap()[0].contains("broken"));
    }

    #[tokio::test]
    async fn chain_outage_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_database(&dir.path().join("witness.redb")).unwrap();
        let source = MockChain::new(ChainFamily::Evm);
        let destination = MockChain::new(ChainFamily::Evm);
        source.set_head(100);
        source.set_unavailable(true);

        let service = Service::new(
            vec![cashier("c1", db, source.clone(), destination, CashierOptions::default())],
            signer(),
            Arc::new(NoopNotifier),
            fast(),
        );
        service.start().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        source.set_unavailable(false);
        wait_until(|| !source.log_queries().is_empty()).await;
        service.stop().await;

        let status = service.status().await.unwrap();
        assert!(!status[0].health.halted);
        assert_eq!(status[0].summary.cursor, Some(80));
    }

    #[tokio::test]
    async fn replay_is_idempotent_and_propagates_errors() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_database(&dir.path().join("witness.redb")).unwrap();
        let source = MockChain::new(ChainFamily::Evm);
        let destination = MockChain::new(ChainFamily::Evm);
        source.set_head(100);
        source.push_event(sample_event(70, 0, 5_000));
        source.push_event(sample_event(70, 1, 5_000));

        let service = Service::new(
            vec![cashier(
                "c1",
                db,
                source,
                destination.clone(),
                CashierOptions {
                    disable_submit: true,
                    ..CashierOptions::default()
                },
            )],
            signer(),
            Arc::new(NoopNotifier),
            fast(),
        );
        service.process_one_block(70).await.unwrap();
        let first = service.transfers("c1", TransferStatus::Confirmed, 10).unwrap().unwrap();
        service.process_one_block(70).await.unwrap();
        let second = service.transfers("c1", TransferStatus::Confirmed, 10).unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(
            first.iter().map(|t| t.key()).collect::<Vec<_>>(),
            second.iter().map(|t| t.key()).collect::<Vec<_>>()
        );
        assert!(destination.submissions().is_empty());

        assert!(matches!(
            service.process_one_block(95).await,
            Err(WitnessError::NotFinal { height: 95, tip: 80 })
        ));
    }

    struct FatalCashier(AtomicUsize);

    #[async_trait::async_trait]
    impl TokenCashier for FatalCashier {
        fn id(&self) -> &str {
            "fatal"
        }
        fn pull_enabled(&self) -> bool {
            true
        }
        fn submit_enabled(&self) -> bool {
            true
        }
        async fn pull(&self, _up_to: u64) -> WitnessResult<usize> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(WitnessError::Signing("key rejected".into()))
        }
        async fn pull_block(&self, _height: u64) -> WitnessResult<usize> {
            Ok(0)
        }
        async fn confirm(&self, _limit: usize) -> WitnessResult<usize> {
            Ok(0)
        }
        async fn check_settlement(&self, _limit: usize) -> WitnessResult<usize> {
            Ok(0)
        }
        async fn candidates(&self, _batch_size: usize) -> WitnessResult<Vec<Transfer>> {
            Ok(Vec::new())
        }
        async fn sign_and_submit(
            &self,
            _transfers: &[Transfer],
            _signer: &dyn SignHandler,
        ) -> WitnessResult<SubmitReport> {
            Ok(SubmitReport::default())
        }
        fn summary(&self) -> WitnessResult<CashierSummary> {
            Ok(CashierSummary {
                id: "fatal".into(),
                source: ChainFamily::Evm,
                destination: ChainFamily::Evm,
                cursor: None,
                pull_enabled: true,
                submit_enabled: true,
                scopes: Vec::new(),
            })
        }
        fn transfers(&self, _status: TransferStatus, _limit: usize) -> WitnessResult<Vec<Transfer>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn process_fatal_error_cancels_the_service() {
        let fatal = Arc::new(FatalCashier(AtomicUsize::new(0)));
        let cashiers: Vec<Arc<dyn TokenCashier>> = vec![fatal.clone()];
        let service = Service::new(cashiers, signer(), Arc::new(NoopNotifier), fast());
        let shutdown = service.shutdown_token();
        service.start().await;
        tokio::time::timeout(Duration::from_secs(2), shutdown.cancelled())
            .await
            .unwrap();
        service.stop().await;
        assert_eq!(fatal.0.load(Ordering::SeqCst), 1);
    }
}
