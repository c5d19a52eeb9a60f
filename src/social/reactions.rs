//! Reaction engine: atomic per-token emoji counters with live fan-out.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::events::{topics, Event, EventBus};
use crate::kv::{KvGateway, KvOp};
use crate::utils::{is_token_address, normalize_address};

use super::stub_id;

pub fn hash_key(token_address: &str) -> String {
    format!("emoji:{token_address}")
}

pub fn channel(token_address: &str) -> String {
    format!("emojiUpdates:{token_address}")
}

/// The accepted reaction kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Love,
    Laugh,
    Wow,
    Sad,
}

impl ReactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Love => "love",
            Self::Laugh => "laugh",
            Self::Wow => "wow",
            Self::Sad => "sad",
        }
    }
}

impl FromStr for ReactionKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(Self::Like),
            "love" => Ok(Self::Love),
            "laugh" => Ok(Self::Laugh),
            "wow" => Ok(Self::Wow),
            "sad" => Ok(Self::Sad),
            _ => Err(()),
        }
    }
}

/// Counter snapshot with zero defaults for absent fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionCounters {
    pub like: u64,
    pub love: u64,
    pub laugh: u64,
    pub wow: u64,
    pub sad: u64,
}

impl ReactionCounters {
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let read = |kind: ReactionKind| {
            map.get(kind.as_str())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };
        Self {
            like: read(ReactionKind::Like),
            love: read(ReactionKind::Love),
            laugh: read(ReactionKind::Laugh),
            wow: read(ReactionKind::Wow),
            sad: read(ReactionKind::Sad),
        }
    }
}

/// Immediate response to a react call; counting happens in the handler.
#[derive(Debug, Clone, Serialize)]
pub struct ReactionStub {
    pub id: String,
    pub status: &'static str,
}

pub struct ReactionEngine {
    kv: KvGateway,
    bus: Arc<EventBus>,
}

impl ReactionEngine {
    pub fn new(kv: KvGateway, bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self { kv, bus })
    }

    /// Wire the background handler for `emoji.reacted`.
    pub fn register(self: &Arc<Self>) -> Result<()> {
        let engine = self.clone();
        self.bus.on(
            topics::EMOJI_REACTED,
            Arc::new(move |event| {
                let engine = engine.clone();
                Box::pin(async move {
                    if let Err(e) = engine.handle_reacted(event).await {
                        error!("emoji.reacted handler failed: {e:#}");
                    }
                })
            }),
        )
    }

    /// Validate and emit; returns a processing stub immediately.
    pub async fn react(
        &self,
        token_address: &str,
        emoji: &str,
        increment: i64,
    ) -> ApiResult<ReactionStub> {
        let mut problems = Vec::new();
        if !is_token_address(token_address) {
            problems.push("tokenAddress must be a 0x-prefixed 40-hex-char address".to_string());
        }
        let kind = ReactionKind::from_str(emoji);
        if kind.is_err() {
            problems.push("emoji must be one of like, love, laugh, wow, sad".to_string());
        }
        if !(1..=3).contains(&increment) {
            problems.push("increment must be between 1 and 3".to_string());
        }
        if !problems.is_empty() {
            return Err(ApiError::Validation(problems.join("; ")));
        }

        let token_address = normalize_address(token_address);
        let stub = ReactionStub {
            id: stub_id("reaction"),
            status: "processing",
        };

        self.bus
            .emit(
                topics::EMOJI_REACTED,
                &token_address,
                json!({
                    "id": stub.id,
                    "tokenAddress": token_address,
                    "emoji": emoji,
                    "increment": increment,
                    "timestamp": Utc::now(),
                }),
            )
            .await;

        Ok(stub)
    }

    /// Background path: pipelined (hget, hincrby, hgetall), regression
    /// guard, fan-out.
    pub(crate) async fn handle_reacted(&self, event: Event) -> Result<()> {
        let token_address = event.payload["tokenAddress"]
            .as_str()
            .context("missing tokenAddress")?
            .to_string();
        let emoji = event.payload["emoji"]
            .as_str()
            .context("missing emoji")?
            .to_string();
        let increment = event.payload["increment"]
            .as_i64()
            .context("missing increment")?;

        let key = hash_key(&token_address);

        let replies = self
            .kv
            .pipeline(vec![
                KvOp::HGet {
                    key: key.clone(),
                    field: emoji.clone(),
                },
                KvOp::HIncrBy {
                    key: key.clone(),
                    field: emoji.clone(),
                    delta: increment,
                },
                KvOp::HGetAll { key: key.clone() },
            ])
            .await?;

        let previous = replies
            .first()
            .and_then(|r| r.as_int())
            .unwrap_or(0);
        let new_count = replies
            .get(1)
            .and_then(|r| r.as_int())
            .context("hincrby returned no count")?;
        let counts = replies
            .get(2)
            .and_then(|r| r.as_map())
            .map(ReactionCounters::from_map)
            .unwrap_or_default();

        // hincrby is monotonic under its own atomicity; a regression means
        // an external writer touched the hash. Revert is best-effort.
        if new_count < previous {
            error!(
                "Reaction count regression on {key} ({emoji}): {previous} -> {new_count}, reverting"
            );
            self.kv
                .hset(&key, &emoji, &previous.to_string())
                .await?;
            return Ok(());
        }

        self.kv
            .publish_json(
                &channel(&token_address),
                &json!({
                    "type": "emojiCountUpdate",
                    "counts": counts,
                    "emoji": emoji,
                    "previousCount": previous,
                    "newCount": new_count,
                    "timestamp": Utc::now(),
                }),
            )
            .await?;

        Ok(())
    }

    /// Counter snapshot with zero defaults.
    pub async fn counts(&self, token_address: &str) -> ApiResult<ReactionCounters> {
        if !is_token_address(token_address) {
            return Err(ApiError::validation(
                "tokenAddress must be a 0x-prefixed 40-hex-char address",
            ));
        }

        let token_address = normalize_address(token_address);
        let map = self.kv.hget_all(&hash_key(&token_address)).await?;
        Ok(ReactionCounters::from_map(&map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    const TOKEN: &str = "0xCCCC000000000000000000000000000000000003";

    fn engine() -> (Arc<ReactionEngine>, KvGateway) {
        let kv = KvGateway::new(Arc::new(MemoryKv::new()));
        (ReactionEngine::new(kv.clone(), EventBus::new()), kv)
    }

    fn reacted_event(token: &str, emoji: &str, increment: i64) -> Event {
        Event::new(
            topics::EMOJI_REACTED,
            token,
            json!({
                "id": "reaction_0_abcdefghi",
                "tokenAddress": token.to_lowercase(),
                "emoji": emoji,
                "increment": increment,
                "timestamp": Utc::now(),
            }),
        )
    }

    #[tokio::test]
    async fn react_validates_inputs() {
        let (engine, _kv) = engine();

        assert!(engine.react(TOKEN, "like", 1).await.is_ok());
        assert!(engine.react(TOKEN, "like", 3).await.is_ok());
        assert!(engine.react(TOKEN, "like", 0).await.is_err());
        assert!(engine.react(TOKEN, "like", 4).await.is_err());
        assert!(engine.react(TOKEN, "grin", 1).await.is_err());
        assert!(engine.react("bad", "like", 1).await.is_err());
    }

    #[tokio::test]
    async fn accepted_reactions_accumulate() {
        let (engine, _kv) = engine();

        engine
            .handle_reacted(reacted_event(TOKEN, "like", 1))
            .await
            .unwrap();
        engine
            .handle_reacted(reacted_event(TOKEN, "like", 2))
            .await
            .unwrap();
        engine
            .handle_reacted(reacted_event(TOKEN, "wow", 3))
            .await
            .unwrap();

        let counts = engine.counts(TOKEN).await.unwrap();
        assert_eq!(counts.like, 3);
        assert_eq!(counts.wow, 3);
        assert_eq!(counts.love, 0);
    }

    #[tokio::test]
    async fn counts_default_to_zero() {
        let (engine, _kv) = engine();
        let counts = engine.counts(TOKEN).await.unwrap();
        assert_eq!(counts, ReactionCounters::default());
    }

    #[tokio::test]
    async fn updates_publish_monotonic_new_counts() {
        let (engine, kv) = engine();
        let mut sub = kv
            .subscribe(&channel(&TOKEN.to_lowercase()))
            .await
            .unwrap();

        engine
            .handle_reacted(reacted_event(TOKEN, "like", 1))
            .await
            .unwrap();
        engine
            .handle_reacted(reacted_event(TOKEN, "like", 1))
            .await
            .unwrap();

        let first: serde_json::Value =
            serde_json::from_str(&sub.recv().await.unwrap()).unwrap();
        let second: serde_json::Value =
            serde_json::from_str(&sub.recv().await.unwrap()).unwrap();

        assert_eq!(first["type"], "emojiCountUpdate");
        let n1 = first["newCount"].as_i64().unwrap();
        let n2 = second["newCount"].as_i64().unwrap();
        assert!(n2 > n1);
        assert_eq!(second["previousCount"].as_i64().unwrap(), n1);
    }

    #[tokio::test]
    async fn externally_seeded_counters_keep_accumulating() {
        let (engine, kv) = engine();
        let key = hash_key(&TOKEN.to_lowercase());

        // A pre-existing value participates in the pipelined read-increment.
        kv.hset(&key, "like", "10").await.unwrap();
        engine
            .handle_reacted(reacted_event(TOKEN, "like", 2))
            .await
            .unwrap();

        let counts = engine.counts(TOKEN).await.unwrap();
        assert_eq!(counts.like, 12);
    }
}
