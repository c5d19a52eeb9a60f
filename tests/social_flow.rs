//! End-to-end flows across the bus, the engines, and the pub/sub fan-out.

use std::sync::Arc;
use std::time::Duration;

use tidepool::db::{MemoryStore, SocialStore};
use tidepool::kv::{KvGateway, MemoryKv};
use tidepool::social::{comments, reactions, CommentEngine, ReactionEngine, WatchlistEngine};
use tidepool::EventBus;

const WALLET: &str = "0x1111111111111111111111111111111111111111";
const TOKEN: &str = "0xaaaa000000000000000000000000000000000001";

struct Harness {
    kv: KvGateway,
    comments: Arc<CommentEngine>,
    reactions: Arc<ReactionEngine>,
    watchlist: Arc<WatchlistEngine>,
}

fn harness() -> Harness {
    let kv = KvGateway::new(Arc::new(MemoryKv::new()));
    let store: Arc<dyn SocialStore> = Arc::new(MemoryStore::new());
    let bus = EventBus::new();

    let comments = CommentEngine::new(kv.clone(), store.clone(), bus.clone());
    comments.register().unwrap();
    let reactions = ReactionEngine::new(kv.clone(), bus.clone());
    reactions.register().unwrap();
    let watchlist = WatchlistEngine::new(kv.clone(), store, bus);

    Harness {
        kv,
        comments,
        reactions,
        watchlist,
    }
}

async fn recv_with_timeout(sub: &mut tidepool::kv::Subscription) -> serde_json::Value {
    let message = tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("timed out waiting for channel message")
        .expect("channel closed");
    serde_json::from_str(&message).unwrap()
}

#[tokio::test]
async fn comment_fan_out_reaches_live_subscribers() {
    let h = harness();

    // A connected client: snapshot first, then deltas.
    let mut sub = h.kv.subscribe(&comments::channel(TOKEN)).await.unwrap();
    let snapshot = h.comments.latest(TOKEN, Some(2)).await.unwrap();
    assert!(snapshot.is_empty());

    // Another client posts.
    let stub = h.comments.create(TOKEN, WALLET, "hi").await.unwrap();

    let delta = recv_with_timeout(&mut sub).await;
    assert_eq!(delta["type"], "newComment");
    assert_eq!(delta["comment"]["id"], stub.id.as_str());
    assert_eq!(delta["comment"]["content"], "hi");
    assert_eq!(delta["comment"]["status"], "persisted");
}

#[tokio::test]
async fn concurrent_reactions_sum_and_publish_monotonically() {
    let h = harness();

    let mut sub = h.kv.subscribe(&reactions::channel(TOKEN)).await.unwrap();

    let (a, b) = tokio::join!(
        h.reactions.react(TOKEN, "like", 1),
        h.reactions.react(TOKEN, "like", 1),
    );
    a.unwrap();
    b.unwrap();

    let first = recv_with_timeout(&mut sub).await;
    let second = recv_with_timeout(&mut sub).await;

    let n1 = first["newCount"].as_i64().unwrap();
    let n2 = second["newCount"].as_i64().unwrap();
    assert!(n2 > n1, "newCount must be strictly monotonic");

    let counts = h.reactions.counts(TOKEN).await.unwrap();
    assert_eq!(counts.like, 2);
}

#[tokio::test]
async fn watchlist_updates_survive_engine_round_trips() {
    let h = harness();
    let tokens = vec![TOKEN.to_string()];

    let added = h.watchlist.add(WALLET, &tokens).await.unwrap();
    assert_eq!(added.added_count, 1);
    assert!(h.watchlist.contains(WALLET, TOKEN).await.unwrap());

    let removed = h.watchlist.remove(WALLET, &tokens).await.unwrap();
    assert_eq!(removed.removed_count, 1);
    assert!(!h.watchlist.contains(WALLET, TOKEN).await.unwrap());

    let page = h.watchlist.list(WALLET, None, None).await.unwrap();
    assert_eq!(page.pagination.total, 0);
}
