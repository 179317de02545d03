// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Read-only status API.

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod cashiers;
pub mod health;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/cashiers", get(cashiers::list_cashiers))
        .route(
            "/cashiers/{cashier_id}/transfers",
            get(cashiers::list_transfers),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::blockchain::address::EvmAddressDecoder;
    use crate::blockchain::{ChainFamily, EvmPayloadEncoder};
    use crate::models::TokenPairs;
    use crate::notifier::NoopNotifier;
    use crate::storage::open_database;
    use crate::test_utils::{
        evm_address, sample_event, MockChain, CASHIER_CONTRACT, DESTINATION_TOKEN, SOURCE_TOKEN,
    };
    use crate::witness::{
        Cashier, CashierChains, CashierConfig, CashierOptions, Service, ServiceOptions,
        TokenCashier,
    };

    async fn app(dir: &tempfile::TempDir) -> Router {
        let db = open_database(&dir.path().join("witness.redb")).unwrap();
        let source = MockChain::new(ChainFamily::Evm);
        source.set_head(100);
        source.push_event(sample_event(50, 0, 1000));

        let mut pairs = TokenPairs::new();
        pairs
            .insert(evm_address(SOURCE_TOKEN), evm_address(DESTINATION_TOKEN))
            .unwrap();
        let cashier: Arc<dyn TokenCashier> = Arc::new(
            Cashier::new(
                CashierConfig {
                    id: "eth".into(),
                    contract: evm_address(CASHIER_CONTRACT),
                    pairs,
                    reverse: None,
                    options: CashierOptions::default(),
                },
                CashierChains {
                    source,
                    destination: MockChain::new(ChainFamily::Evm),
                    recipients: Arc::new(EvmAddressDecoder),
                    encoder: Arc::new(EvmPayloadEncoder::new(evm_address(0xee)).unwrap()),
                },
                db,
                Arc::new(NoopNotifier),
            )
            .unwrap(),
        );

        let service = Service::new(
            vec![cashier],
            None,
            Arc::new(NoopNotifier),
            ServiceOptions::default(),
        );
        service.process_one_block(50).await.unwrap();
        router(AppState::new(Arc::new(service)))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_ok_in_observation_mode() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get(app(&dir).await, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["cashiers"], 1);
        assert!(body.get("witness").is_none());
    }

    #[tokio::test]
    async fn cashiers_lists_counts_per_scope() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get(app(&dir).await, "/cashiers").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], "eth");
        assert_eq!(body[0]["submitEnabled"], true);
        assert_eq!(body[0]["halted"], false);
        assert_eq!(body[0]["scopes"][0]["counts"]["confirmed"], 1);
    }

    #[tokio::test]
    async fn transfers_filter_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir).await;

        let (status, body) = get(app.clone(), "/cashiers/eth/transfers?status=confirmed").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["block_height"], 50);

        let (_, body) = get(app.clone(), "/cashiers/eth/transfers").await;
        assert!(body.as_array().unwrap().is_empty());

        let (status, _) = get(app.clone(), "/cashiers/eth/transfers?status=bogus").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = get(app, "/cashiers/nope/transfers").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "unknown cashier nope");
    }
}
