// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Witnessing pipeline: per-cashier stages, the service that schedules
//! them, and the builder that wires both from configuration.

pub mod builder;
pub mod cashier;
pub mod service;

pub use builder::build_service;
pub use cashier::{
    Cashier, CashierChains, CashierConfig, CashierOptions, CashierSummary, ReverseConfig,
    ScopeSummary, SubmitReport, TokenCashier,
};
pub use service::{CashierHealth, CashierStatus, Service, ServiceOptions};
