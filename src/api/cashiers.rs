// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::{
    error::ApiError,
    models::{Transfer, TransferStatus},
    state::AppState,
    witness::CashierStatus,
};

pub const DEFAULT_TRANSFER_LIMIT: usize = 50;
pub const MAX_TRANSFER_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct TransferQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list_cashiers(
    State(state): State<AppState>,
) -> Result<Json<Vec<CashierStatus>>, ApiError> {
    Ok(Json(state.service.status().await?))
}

/// Transfers of one cashier in a given status (default `new`), oldest first.
pub async fn list_transfers(
    Path(cashier_id): Path<String>,
    Query(params): Query<TransferQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Transfer>>, ApiError> {
    let status = match params.status.as_deref() {
        None => TransferStatus::New,
        Some(text) => text
            .parse::<TransferStatus>()
            .map_err(|e| ApiError::bad_request(e.to_string()))?,
    };
    let limit = params
        .limit
        .unwrap_or(DEFAULT_TRANSFER_LIMIT)
        .clamp(1, MAX_TRANSFER_LIMIT);

    state
        .service
        .transfers(&cashier_id, status, limit)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("unknown cashier {cashier_id}")))
}
