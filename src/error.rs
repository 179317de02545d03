// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error taxonomy shared by cashiers, recorders and the service loop.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::models::TransferStatus;
use crate::storage::RecorderError;

/// How the service loop reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Try again on the next cycle interval.
    Retryable,
    /// Halt the affected cashier until an operator intervenes.
    CashierFatal,
    /// Stop the whole service.
    ProcessFatal,
}

#[derive(Debug, thiserror::Error)]
pub enum WitnessError {
    #[error("chain unavailable: {0}")]
    ChainUnavailable(String),

    #[error("reorg detected at height {height}: recorded block {recorded}, chain has {current}")]
    ReorgDetected {
        height: u64,
        recorded: String,
        current: String,
    },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(#[from] RecorderError),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("block {height} is above the finality tip {tip}")]
    NotFinal { height: u64, tip: u64 },

    #[error("invalid status transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: TransferStatus,
        to: TransferStatus,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type WitnessResult<T> = Result<T, WitnessError>;

impl WitnessError {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Storage(RecorderError::InvalidTransition { .. }) => Severity::CashierFatal,
            Self::ChainUnavailable(_)
            | Self::Storage(_)
            | Self::SubmissionRejected(_)
            | Self::NotFinal { .. } => Severity::Retryable,
            // Per-event decode failures are skipped where they occur; one
            // reaching here means a whole response is malformed.
            Self::Decode(_) | Self::ReorgDetected { .. } | Self::InvalidTransition { .. } => {
                Severity::CashierFatal
            }
            Self::Signing(_) | Self::Config(_) => Severity::ProcessFatal,
        }
    }

    pub fn chain(err: impl std::fmt::Display) -> Self {
        Self::ChainUnavailable(err.to_string())
    }
}

/// Error returned by status API handlers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<WitnessError> for ApiError {
    fn from(err: WitnessError) -> Self {
        tracing::error!(error = %err, "Status API request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}
