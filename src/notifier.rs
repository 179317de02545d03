// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Operator alerts.
//!
//! The notifier is handed to the service and to every cashier at
//! construction. Delivery failures are logged and never propagate into the
//! witnessing pipeline.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Drops every alert.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _message: &str) {}
}

/// Slack and Lark incoming webhooks.
pub struct WebhookNotifier {
    http: Client,
    prefix: String,
    slack: Option<String>,
    lark: Option<String>,
}

impl WebhookNotifier {
    /// `chain` and `address` identify this witness in every message.
    pub fn new(
        chain: &str,
        address: &str,
        slack: Option<String>,
        lark: Option<String>,
    ) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            prefix: format!("witness-{chain}:{address}"),
            slack: slack.filter(|url| !url.is_empty()),
            lark: lark.filter(|url| !url.is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.slack.is_some() || self.lark.is_some()
    }

    fn text(&self, message: &str) -> String {
        format!("{}: {}", self.prefix, message)
    }

    async fn post(&self, url: &str, body: &Value) {
        let result = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to deliver webhook notification");
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) {
        let text = self.text(message);
        if let Some(url) = &self.slack {
            self.post(url, &slack_body(&text)).await;
        }
        if let Some(url) = &self.lark {
            self.post(url, &lark_body(&text)).await;
        }
    }
}

fn slack_body(text: &str) -> Value {
    json!({ "text": text })
}

fn lark_body(text: &str) -> Value {
    json!({ "msg_type": "text", "content": { "text": text } })
}
