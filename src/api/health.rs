// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// "ok", or "degraded" when a cashier is halted.
    pub status: String,
    pub cashiers: usize,
    pub halted: Vec<String>,
    /// Witness address on the destination chain; absent in observation mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witness: Option<String>,
}

/// Returns 200 while every cashier runs, 503 once any is halted.
pub async fn health(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<HealthResponse>), ApiError> {
    let statuses = state.service.status().await?;
    let halted: Vec<String> = statuses
        .iter()
        .filter(|s| s.health.halted)
        .map(|s| s.summary.id.clone())
        .collect();

    let code = if halted.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let response = HealthResponse {
        status: if halted.is_empty() { "ok" } else { "degraded" }.to_string(),
        cashiers: statuses.len(),
        halted,
        witness: state.service.signer_address(),
    };
    Ok((code, Json(response)))
}
