//! Operator alerting.
//!
//! Alerts are best effort: a failed delivery is logged and never blocks the
//! safety action that raised it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub ts: DateTime<Utc>,
    pub severity: AlertSeverity,
    /// Stable kind, e.g. `PARTIAL_FAILURE`, `HEARTBEAT_STALE`.
    pub kind: String,
    /// Client id of the raising process.
    pub source: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<String>,
    pub details: Value,
}

impl Alert {
    pub fn critical(
        ts: DateTime<Utc>,
        kind: impl Into<String>,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            ts,
            severity: AlertSeverity::Critical,
            kind: kind.into(),
            source: source.into(),
            message: message.into(),
            trade_id: None,
            details: Value::Null,
        }
    }

    pub fn warning(
        ts: DateTime<Utc>,
        kind: impl Into<String>,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: AlertSeverity::Warning,
            ..Self::critical(ts, kind, source, message)
        }
    }

    pub fn with_trade_id(mut self, trade_id: impl Into<String>) -> Self {
        self.trade_id = Some(trade_id.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

#[async_trait]
pub trait Alerter: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<()>;
}

/// Deliver and swallow: failures become a `warn!` line.
pub async fn raise(alerter: &dyn Alerter, alert: Alert) {
    if let Err(e) = alerter.send(&alert).await {
        tracing::warn!(kind = %alert.kind, error = %e, "alert delivery failed");
    }
}

/// Alerts as `tracing` events only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    async fn send(&self, alert: &Alert) -> Result<()> {
        match alert.severity {
            AlertSeverity::Critical => tracing::error!(
                kind = %alert.kind,
                source = %alert.source,
                trade_id = alert.trade_id.as_deref().unwrap_or(""),
                details = %alert.details,
                "ALERT: {}",
                alert.message
            ),
            AlertSeverity::Warning => tracing::warn!(
                kind = %alert.kind,
                source = %alert.source,
                trade_id = alert.trade_id.as_deref().unwrap_or(""),
                details = %alert.details,
                "ALERT: {}",
                alert.message
            ),
        }
        Ok(())
    }
}

/// POSTs each alert as JSON to a webhook. Also logs it, so an unreachable
/// webhook never leaves an alert unrecorded.
#[derive(Debug, Clone)]
pub struct WebhookAlerter {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlerter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build webhook http client failed")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Alerter for WebhookAlerter {
    async fn send(&self, alert: &Alert) -> Result<()> {
        LogAlerter.send(alert).await?;
        self.client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .context("alert webhook request failed")?
            .error_for_status()
            .context("alert webhook returned error status")?;
        Ok(())
    }
}

/// Webhook when a URL is configured, log-only otherwise.
pub fn alerter_for(webhook_url: Option<&str>, timeout: Duration) -> Result<Arc<dyn Alerter>> {
    match webhook_url {
        Some(url) => Ok(Arc::new(WebhookAlerter::new(url, timeout)?)),
        None => Ok(Arc::new(LogAlerter)),
    }
}
