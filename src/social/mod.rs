//! Social engines: comments, reactions, and watchlists.
//!
//! Engines share the KV gateway, the relational store, and the event bus;
//! they never call each other. The synchronous paths validate and emit;
//! background handlers do the durable work.

pub mod comments;
pub mod reactions;
pub mod watchlist;

use std::sync::Arc;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;

use crate::db::models::User;
use crate::db::SocialStore;
use crate::error::ApiResult;
use crate::events::{topics, EventBus};

pub use comments::CommentEngine;
pub use reactions::{ReactionCounters, ReactionEngine, ReactionKind, ReactionStub};
pub use watchlist::{AddResult, Pagination, RemoveResult, WatchlistEngine, WatchlistPage};

/// Get-or-upsert a user by wallet, emitting `user.created` on first sight.
pub(crate) async fn ensure_user(
    store: &Arc<dyn SocialStore>,
    bus: &Arc<EventBus>,
    wallet_address: &str,
) -> ApiResult<User> {
    let (user, created) = store.get_or_create_user(wallet_address).await?;

    if created {
        bus.emit(
            topics::USER_CREATED,
            wallet_address,
            json!({
                "userId": user.id,
                "walletAddress": wallet_address,
                "createdAt": user.created_at,
            }),
        )
        .await;
    }

    Ok(user)
}

/// `<prefix>_<epoch_ms>_<random>` identifiers for processing stubs.
pub(crate) fn stub_id(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    format!("{prefix}_{}_{suffix}", Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    #[tokio::test]
    async fn ensure_user_is_idempotent_and_emits_once() {
        let store: Arc<dyn SocialStore> = Arc::new(MemoryStore::new());
        let bus = EventBus::new();

        let created = Arc::new(std::sync::Mutex::new(0u32));
        let sink = created.clone();
        bus.on(
            topics::USER_CREATED,
            Arc::new(move |_event| {
                let sink = sink.clone();
                Box::pin(async move {
                    *sink.lock().unwrap() += 1;
                })
            }),
        )
        .unwrap();

        let wallet = "0x1111111111111111111111111111111111111111";
        let first = ensure_user(&store, &bus, wallet).await.unwrap();
        let second = ensure_user(&store, &bus, wallet).await.unwrap();
        assert_eq!(first.id, second.id);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(*created.lock().unwrap(), 1);
    }

    #[test]
    fn stub_ids_have_the_documented_shape() {
        let id = stub_id("comment");
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "comment");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
    }
}
