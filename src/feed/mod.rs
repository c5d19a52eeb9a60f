//! Launchpad feed: normalized tokens from the upstream push feed plus the
//! scanner's own discoveries, deduped and fanned out live.

pub mod ingestor;

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};

use crate::events::{topics, Event, EventBus};
use crate::kv::{KvGateway, KvOp, KvResult};

pub use ingestor::FeedIngestor;

/// Dedup hash of seen addresses.
pub const EVENTS_KEY: &str = "new-tokens:events";
/// Newest-first list of normalized tokens.
pub const LIST_KEY: &str = "new-tokens:list";
/// Live update channel.
pub const UPDATES_CHANNEL: &str = "new-tokens:updates";

const FEED_TTL_SECS: u64 = 86_400;
const LIST_CAP: i64 = 200;

/// A normalized launchpad token. Dedup key is `address`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchpadToken {
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub network: String,
    pub protocol: String,
    pub network_id: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume24: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holders: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graduation_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launchpad_protocol: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Wire the `new-token-created` handler: dedup by address, cap the list at
/// 200, publish the delta.
pub fn register_handlers(bus: &Arc<EventBus>, kv: KvGateway) -> Result<()> {
    bus.on(
        topics::NEW_TOKEN_CREATED,
        Arc::new(move |event| {
            let kv = kv.clone();
            Box::pin(async move {
                if let Err(e) = handle_new_token(&kv, event).await {
                    error!("new-token-created handler failed: {e:#}");
                }
            })
        }),
    )
}

pub(crate) async fn handle_new_token(kv: &KvGateway, event: Event) -> Result<()> {
    let token: LaunchpadToken = serde_json::from_value(event.payload)?;
    let address = token.address.to_lowercase();

    let fresh = kv
        .hset(EVENTS_KEY, &address, &token.timestamp.to_rfc3339())
        .await?;
    kv.expire(EVENTS_KEY, FEED_TTL_SECS).await?;
    if !fresh {
        return Ok(());
    }

    let json = serde_json::to_string(&token)?;
    kv.pipeline(vec![
        KvOp::LPush {
            key: LIST_KEY.to_string(),
            value: json.clone(),
        },
        KvOp::LTrim {
            key: LIST_KEY.to_string(),
            start: 0,
            stop: LIST_CAP - 1,
        },
        KvOp::Expire {
            key: LIST_KEY.to_string(),
            ttl_secs: FEED_TTL_SECS,
        },
    ])
    .await?;

    kv.publish(UPDATES_CHANNEL, &json).await?;
    Ok(())
}

/// Read a page of the cached list, newest first.
pub async fn list_tokens(
    kv: &KvGateway,
    offset: u64,
    limit: u32,
) -> KvResult<(Vec<LaunchpadToken>, u64)> {
    let total = kv.llen(LIST_KEY).await?;
    let start = offset as i64;
    let stop = start + limit as i64 - 1;

    let raw = kv.lrange(LIST_KEY, start, stop).await?;
    let tokens = raw
        .iter()
        .filter_map(|json| serde_json::from_str(json).ok())
        .collect();

    Ok((tokens, total))
}
