//! Upstream launchpad feed ingestor.
//!
//! Subscribes to the configured streaming source, filters each batch item by
//! the `(network_id, protocol)` allow-list, normalizes survivors and emits
//! `new-token-created` events. The connection reconnects with doubling
//! backoff; state is fully recoverable from the next batch.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use crate::config::ExternalFeedSettings;
use crate::events::{topics, EventBus};

use super::LaunchpadToken;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// A batch item as the upstream sends it. Only `address` and `network_id`
/// are required; everything else degrades gracefully.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFeedToken {
    address: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    network: String,
    #[serde(default)]
    protocol: String,
    network_id: u64,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    price_usd: Option<f64>,
    #[serde(default)]
    market_cap: Option<f64>,
    #[serde(default)]
    volume24: Option<f64>,
    #[serde(default)]
    holders: Option<u64>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    graduation_percent: Option<f64>,
    #[serde(default)]
    launchpad_protocol: Option<String>,
}

pub struct FeedIngestor {
    settings: ExternalFeedSettings,
    bus: Arc<EventBus>,
}

impl FeedIngestor {
    pub fn new(settings: ExternalFeedSettings, bus: Arc<EventBus>) -> Self {
        Self { settings, bus }
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            match self.connect_and_stream(&cancel).await {
                Ok(()) => {
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                    warn!("Feed connection closed cleanly, reconnecting");
                    backoff = INITIAL_BACKOFF;
                },
                Err(e) => {
                    warn!("Feed connection failed: {e:#}, reconnecting in {backoff:?}");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(backoff) => {},
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                },
            }
        }
    }

    async fn connect_and_stream(&self, cancel: &CancellationToken) -> Result<()> {
        let (ws_stream, _) = connect_async(self.settings.url.as_str())
            .await
            .context("Failed to connect to feed")?;
        info!("Connected to launchpad feed");

        let (mut sink, mut stream) = ws_stream.split();

        if !self.settings.api_key.is_empty() {
            let subscribe = json!({
                "event": "subscribe",
                "apiKey": self.settings.api_key,
            });
            sink.send(Message::Text(subscribe.to_string()))
                .await
                .context("Failed to send subscribe message")?;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                },
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        self.process_batch(&text).await;
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    },
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {},
                    Some(Err(e)) => return Err(e).context("Feed stream error"),
                },
            }
        }
    }

    async fn process_batch(&self, text: &str) {
        let items = match parse_batch(text) {
            Some(items) => items,
            None => {
                warn!("Unparseable feed message, skipping");
                return;
            },
        };

        for raw in items {
            let Some(token) = self.normalize(raw) else {
                continue;
            };
            let payload = match serde_json::to_value(&token) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Failed to serialize feed token: {e}");
                    continue;
                },
            };
            self.bus
                .emit(topics::NEW_TOKEN_CREATED, &token.address, payload)
                .await;
        }
    }

    fn normalize(&self, raw: RawFeedToken) -> Option<LaunchpadToken> {
        if !self.settings.network_ids.contains(&raw.network_id) {
            return None;
        }
        if !self
            .settings
            .protocols
            .iter()
            .any(|p| p.eq_ignore_ascii_case(&raw.protocol))
        {
            return None;
        }

        Some(LaunchpadToken {
            address: raw.address.to_lowercase(),
            name: raw.name,
            symbol: raw.symbol,
            network: raw.network,
            protocol: raw.protocol,
            network_id: raw.network_id,
            created_at: raw.created_at.unwrap_or_else(Utc::now),
            price_usd: raw.price_usd,
            market_cap: raw.market_cap,
            volume24: raw.volume24,
            holders: raw.holders,
            image_url: raw.image_url,
            graduation_percent: raw.graduation_percent,
            launchpad_protocol: raw.launchpad_protocol,
            timestamp: Utc::now(),
        })
    }
}

/// Accepts either a bare array or an object wrapping one under `data` or
/// `tokens`.
fn parse_batch(text: &str) -> Option<Vec<RawFeedToken>> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;

    let items = match &value {
        serde_json::Value::Array(_) => value,
        serde_json::Value::Object(map) => map.get("data").or_else(|| map.get("tokens"))?.clone(),
        _ => return None,
    };

    serde_json::from_value(items).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingestor() -> FeedIngestor {
        FeedIngestor::new(
            ExternalFeedSettings {
                enabled: true,
                url: String::new(),
                api_key: String::new(),
                protocols: vec!["clanker".to_string()],
                network_ids: vec![8453],
            },
            EventBus::new(),
        )
    }

    fn raw(protocol: &str, network_id: u64) -> RawFeedToken {
        RawFeedToken {
            address: "0xABC0000000000000000000000000000000000000".to_string(),
            name: "Launch".to_string(),
            symbol: "LNCH".to_string(),
            network: "base".to_string(),
            protocol: protocol.to_string(),
            network_id,
            created_at: None,
            price_usd: Some(0.01),
            market_cap: None,
            volume24: None,
            holders: None,
            image_url: None,
            graduation_percent: None,
            launchpad_protocol: None,
        }
    }

    #[test]
    fn allow_list_filters_by_network_and_protocol() {
        let ingestor = ingestor();

        assert!(ingestor.normalize(raw("clanker", 8453)).is_some());
        assert!(ingestor.normalize(raw("Clanker", 8453)).is_some());
        assert!(ingestor.normalize(raw("clanker", 1)).is_none());
        assert!(ingestor.normalize(raw("unknown", 8453)).is_none());
    }

    #[test]
    fn normalization_lower_cases_the_address() {
        let token = ingestor().normalize(raw("clanker", 8453)).unwrap();
        assert_eq!(
            token.address,
            "0xabc0000000000000000000000000000000000000"
        );
    }

    #[test]
    fn parses_bare_and_wrapped_batches() {
        let bare = r#"[{"address":"0xa","networkId":8453}]"#;
        assert_eq!(parse_batch(bare).unwrap().len(), 1);

        let wrapped = r#"{"data":[{"address":"0xa","networkId":8453}]}"#;
        assert_eq!(parse_batch(wrapped).unwrap().len(), 1);

        let tokens = r#"{"tokens":[{"address":"0xa","networkId":8453}]}"#;
        assert_eq!(parse_batch(tokens).unwrap().len(), 1);

        assert!(parse_batch("not json").is_none());
        assert!(parse_batch(r#"{"other":[]}"#).is_none());
    }
}
