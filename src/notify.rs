// =============================================================================
// Signal notifier — downstream publication seam
// =============================================================================
//
// The fuser calls `publish_signal` at most once per emitted signal and never
// waits on anything beyond send success. The webhook implementation posts a
// compact JSON payload with a hard 5 s timeout; failures are the caller's to
// log and drop, since the signal is already persisted by then.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::types::Signal;

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait SignalNotifier: Send + Sync {
    async fn publish_signal(&self, signal: &Signal) -> Result<()>;
}

/// Posts each signal to a configured webhook URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PUBLISH_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            url: url.into(),
        }
    }

    fn payload(signal: &Signal) -> serde_json::Value {
        json!({
            "username": "Borealis",
            "content": format!(
                "{} {} {} @ {:.6} (tier {}, confidence {:.0}%)",
                signal.direction,
                signal.symbol,
                signal.timeframe,
                signal.entry_price,
                signal.fusion_tier,
                signal.confidence * 100.0
            ),
            "embeds": [{
                "title": format!("{} {} [{}]", signal.direction, signal.symbol, signal.timeframe),
                "description": signal.fusion_reason,
                "fields": [
                    { "name": "Entry", "value": format!("{:.6}", signal.entry_price), "inline": true },
                    { "name": "Stop loss", "value": format!("{:.6}", signal.stop_loss), "inline": true },
                    { "name": "TP1 / TP2 / TP3",
                      "value": format!("{:.6} / {:.6} / {:.6}",
                          signal.take_profit_1, signal.take_profit_2, signal.take_profit_3),
                      "inline": false },
                    { "name": "Tier", "value": signal.fusion_tier.to_string(), "inline": true },
                    { "name": "Confidence", "value": format!("{:.0}%", signal.confidence * 100.0), "inline": true },
                ],
                "timestamp": chrono::DateTime::from_timestamp_millis(signal.generated_at)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
            }],
        })
    }
}

#[async_trait]
impl SignalNotifier for WebhookNotifier {
    async fn publish_signal(&self, signal: &Signal) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&Self::payload(signal))
            .send()
            .await
            .context("webhook request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("webhook returned {status}");
        }
        debug!(signal = %signal.id, "signal published");
        Ok(())
    }
}

/// Drops every signal; used when no webhook is configured.
pub struct NullNotifier;

#[async_trait]
impl SignalNotifier for NullNotifier {
    async fn publish_signal(&self, signal: &Signal) -> Result<()> {
        debug!(signal = %signal.id, "no notifier configured; signal not published");
        Ok(())
    }
}

/// Test double that remembers everything it was asked to publish.
#[cfg(test)]
pub struct RecordingNotifier {
    signals: parking_lot::Mutex<Vec<Signal>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            signals: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn published(&self) -> usize {
        self.signals.lock().len()
    }

    pub fn last(&self) -> Option<Signal> {
        self.signals.lock().last().cloned()
    }
}

#[cfg(test)]
#[async_trait]
impl SignalNotifier for RecordingNotifier {
    async fn publish_signal(&self, signal: &Signal) -> Result<()> {
        self.signals.lock().push(signal.clone());
        Ok(())
    }
}
