//! Comment engine: write-through commentary store with live fan-out and
//! bounded retention.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use log::{debug, error};
use serde_json::json;

use crate::db::models::{Comment, CommentStatus};
use crate::db::SocialStore;
use crate::error::{ApiError, ApiResult};
use crate::events::{topics, Event, EventBus};
use crate::kv::{KvGateway, KvOp};
use crate::utils::{
    clamp_limit, is_token_address, is_wallet_address, normalize_address, validate_comment_content,
};

use super::{ensure_user, stub_id};

/// Cached comments per token, newest at the head.
const CACHE_CAP: i64 = 50;

pub fn list_key(token_address: &str) -> String {
    format!("comments:{token_address}:list")
}

pub fn channel(token_address: &str) -> String {
    format!("comments:{token_address}")
}

pub struct CommentEngine {
    kv: KvGateway,
    store: Arc<dyn SocialStore>,
    bus: Arc<EventBus>,
}

impl CommentEngine {
    pub fn new(kv: KvGateway, store: Arc<dyn SocialStore>, bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self { kv, store, bus })
    }

    /// Wire the background handler for `comment.created`.
    pub fn register(self: &Arc<Self>) -> Result<()> {
        let engine = self.clone();
        self.bus.on(
            topics::COMMENT_CREATED,
            Arc::new(move |event| {
                let engine = engine.clone();
                Box::pin(async move {
                    if let Err(e) = engine.handle_created(event).await {
                        error!("comment.created handler failed: {e:#}");
                    }
                })
            }),
        )
    }

    /// Validate, create the processing stub, and emit `comment.created`.
    /// Durable work happens in the handler.
    pub async fn create(
        &self,
        token_address: &str,
        wallet_address: &str,
        content: &str,
    ) -> ApiResult<Comment> {
        let mut problems = Vec::new();
        if !is_token_address(token_address) {
            problems.push("tokenAddress must be a 0x-prefixed 40-hex-char address".to_string());
        }
        if !is_wallet_address(wallet_address) {
            problems.push("walletAddress must be a 0x-prefixed 40-hex-char address".to_string());
        }
        if let Err(problem) = validate_comment_content(content) {
            problems.push(problem);
        }
        if !problems.is_empty() {
            return Err(ApiError::Validation(problems.join("; ")));
        }

        let token_address = normalize_address(token_address);
        let wallet_address = normalize_address(wallet_address);

        let user = ensure_user(&self.store, &self.bus, &wallet_address).await?;

        let comment = Comment {
            id: stub_id("comment"),
            token_address: token_address.clone(),
            user_id: user.id,
            wallet_address,
            content: content.to_string(),
            created_at: Utc::now(),
            status: CommentStatus::Processing,
        };

        self.bus
            .emit(
                topics::COMMENT_CREATED,
                &token_address,
                serde_json::to_value(&comment).map_err(|e| ApiError::transient(e.to_string()))?,
            )
            .await;

        Ok(comment)
    }

    /// Background path: persist, cache, fan out, prune.
    pub(crate) async fn handle_created(&self, event: Event) -> Result<()> {
        let mut comment: Comment = serde_json::from_value(event.payload)?;
        comment.status = CommentStatus::Persisted;

        self.store.insert_comment(&comment).await?;

        let key = list_key(&comment.token_address);
        let json = serde_json::to_string(&comment)?;
        self.kv
            .pipeline(vec![
                KvOp::LPush { key: key.clone(), value: json },
                KvOp::LTrim {
                    key,
                    start: 0,
                    stop: CACHE_CAP - 1,
                },
            ])
            .await?;

        self.kv
            .publish_json(
                &channel(&comment.token_address),
                &json!({
                    "type": "newComment",
                    "comment": comment,
                    "timestamp": Utc::now(),
                }),
            )
            .await?;

        let pruned = self
            .store
            .prune_comments(&comment.token_address, CACHE_CAP as u32)
            .await?;
        if pruned > 0 {
            debug!(
                "Pruned {pruned} comment row(s) for {}",
                comment.token_address
            );
        }

        Ok(())
    }

    /// Newest-first comments for a token, cache-first with DB fallback and
    /// cache warming.
    pub async fn latest(&self, token_address: &str, limit: Option<u32>) -> ApiResult<Vec<Comment>> {
        if !is_token_address(token_address) {
            return Err(ApiError::validation(
                "tokenAddress must be a 0x-prefixed 40-hex-char address",
            ));
        }

        let limit = clamp_limit(limit, 50);
        let token_address = normalize_address(token_address);
        let key = list_key(&token_address);

        let cached = self.kv.lrange(&key, 0, limit as i64 - 1).await?;
        if !cached.is_empty() {
            return Ok(cached
                .iter()
                .filter_map(|json| serde_json::from_str(json).ok())
                .collect());
        }

        let from_db = self.store.latest_comments(&token_address, limit).await?;
        if from_db.is_empty() {
            return Ok(Vec::new());
        }

        // Warm the cache: reverse-order pushes rebuild newest-first.
        let mut ops: Vec<KvOp> = Vec::with_capacity(from_db.len() + 1);
        for comment in from_db.iter().rev() {
            ops.push(KvOp::LPush {
                key: key.clone(),
                value: serde_json::to_string(comment)
                    .map_err(|e| ApiError::transient(e.to_string()))?,
            });
        }
        ops.push(KvOp::LTrim {
            key,
            start: 0,
            stop: CACHE_CAP - 1,
        });
        self.kv.pipeline(ops).await?;

        Ok(from_db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::kv::MemoryKv;

    const TOKEN: &str = "0xAAAA000000000000000000000000000000000001";
    const WALLET: &str = "0xBBBB000000000000000000000000000000000002";

    struct Harness {
        engine: Arc<CommentEngine>,
        kv: KvGateway,
        store: Arc<dyn SocialStore>,
    }

    fn harness() -> Harness {
        let kv = KvGateway::new(Arc::new(MemoryKv::new()));
        let store: Arc<dyn SocialStore> = Arc::new(MemoryStore::new());
        let bus = EventBus::new();
        let engine = CommentEngine::new(kv.clone(), store.clone(), bus);
        Harness { engine, kv, store }
    }

    #[tokio::test]
    async fn create_returns_a_processing_stub() {
        let h = harness();
        let stub = h.engine.create(TOKEN, WALLET, "hi").await.unwrap();

        assert_eq!(stub.status, CommentStatus::Processing);
        assert!(stub.id.starts_with("comment_"));
        assert_eq!(stub.token_address, TOKEN.to_lowercase());
        assert_eq!(stub.wallet_address, WALLET.to_lowercase());
    }

    #[tokio::test]
    async fn create_rejects_bad_input_with_joined_message() {
        let h = harness();

        let err = h.engine.create("nope", "nope", "").await.unwrap_err();
        match err {
            ApiError::Validation(msg) => {
                assert!(msg.contains("tokenAddress"));
                assert!(msg.contains("walletAddress"));
                assert!(msg.contains("content"));
            },
            other => panic!("expected validation error, got {other:?}"),
        }

        assert!(h
            .engine
            .create(TOKEN, WALLET, &"a".repeat(501))
            .await
            .is_err());
        assert!(h
            .engine
            .create(TOKEN, WALLET, &"a".repeat(500))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn handler_persists_caches_and_publishes() {
        let h = harness();
        let mut sub = h.kv.subscribe(&channel(&TOKEN.to_lowercase())).await.unwrap();

        let stub = h.engine.create(TOKEN, WALLET, "hello").await.unwrap();
        let event = Event::new(
            topics::COMMENT_CREATED,
            &stub.token_address,
            serde_json::to_value(&stub).unwrap(),
        );
        h.engine.handle_created(event).await.unwrap();

        // Persisted to the store.
        let rows = h
            .store
            .latest_comments(&TOKEN.to_lowercase(), 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "hello");

        // Cached newest-first.
        let cached = h
            .kv
            .lrange(&list_key(&TOKEN.to_lowercase()), 0, -1)
            .await
            .unwrap();
        assert_eq!(cached.len(), 1);
        let cached_comment: Comment = serde_json::from_str(&cached[0]).unwrap();
        assert_eq!(cached_comment.status, CommentStatus::Persisted);

        // Fanned out on the channel.
        let message = sub.recv().await.unwrap();
        assert!(message.contains("newComment"));
    }

    #[tokio::test]
    async fn cache_never_exceeds_fifty() {
        let h = harness();

        for i in 0..60 {
            let stub = h
                .engine
                .create(TOKEN, WALLET, &format!("comment {i}"))
                .await
                .unwrap();
            let event = Event::new(
                topics::COMMENT_CREATED,
                &stub.token_address,
                serde_json::to_value(&stub).unwrap(),
            );
            h.engine.handle_created(event).await.unwrap();
        }

        let len = h.kv.llen(&list_key(&TOKEN.to_lowercase())).await.unwrap();
        assert_eq!(len, 50);
    }

    #[tokio::test]
    async fn latest_falls_back_to_db_and_warms_the_cache() {
        let h = harness();

        // Rows exist only in the store.
        for i in 0..3 {
            let comment = Comment {
                id: format!("comment_{i}_abcdefghi"),
                token_address: TOKEN.to_lowercase(),
                user_id: 1,
                wallet_address: WALLET.to_lowercase(),
                content: format!("row {i}"),
                created_at: Utc::now() + chrono::Duration::seconds(i as i64),
                status: CommentStatus::Persisted,
            };
            h.store.insert_comment(&comment).await.unwrap();
        }

        let latest = h.engine.latest(TOKEN, Some(10)).await.unwrap();
        assert_eq!(latest.len(), 3);
        // Newest first.
        assert_eq!(latest[0].content, "row 2");

        // The cache got warmed, newest at the head.
        let cached = h
            .kv
            .lrange(&list_key(&TOKEN.to_lowercase()), 0, -1)
            .await
            .unwrap();
        assert_eq!(cached.len(), 3);
        let head: Comment = serde_json::from_str(&cached[0]).unwrap();
        assert_eq!(head.content, "row 2");
    }

    #[tokio::test]
    async fn latest_clamps_the_limit() {
        let h = harness();
        // limit > 100 clamps to 100; this only checks it does not error.
        assert!(h.engine.latest(TOKEN, Some(500)).await.unwrap().is_empty());
    }
}
