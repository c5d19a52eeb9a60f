//! In-process publish/subscribe bus.
//!
//! Engines never call each other directly; cross-engine effects travel as
//! events. Each subscription owns one serial worker task draining a bounded
//! queue, so delivery order per topic is preserved and handler concurrency
//! stays bounded. Topic patterns support a single `*` segment.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use log::warn;
use serde_json::Value;
use tokio::sync::mpsc;

/// Hard cap on listeners per exact pattern.
const MAX_LISTENERS: usize = 20;

/// Queue depth per subscription before emitters start waiting.
const SUBSCRIPTION_QUEUE: usize = 256;

/// Topics published inside the service.
pub mod topics {
    pub const USER_CREATED: &str = "user.created";
    pub const WATCHLIST_TOKEN_ADDED: &str = "user.watchlist.token.added";
    pub const WATCHLIST_TOKEN_REMOVED: &str = "user.watchlist.token.removed";
    pub const COMMENT_CREATED: &str = "comment.created";
    pub const EMOJI_REACTED: &str = "emoji.reacted";
    pub const NEW_TOKEN_CREATED: &str = "new-token-created";
}

/// An event on the bus.
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    pub aggregate_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl Event {
    pub fn new(topic: &str, aggregate_id: &str, payload: Value) -> Self {
        Self {
            topic: topic.to_string(),
            aggregate_id: aggregate_id.to_string(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
struct TopicPattern {
    raw: String,
    segments: Vec<String>,
}

impl TopicPattern {
    fn parse(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            bail!("empty topic pattern");
        }

        let segments: Vec<String> = pattern.split('.').map(str::to_string).collect();
        let wildcards = segments.iter().filter(|s| *s == "*").count();
        if wildcards > 1 {
            bail!("topic pattern {pattern} has more than one wildcard segment");
        }
        if segments.iter().any(String::is_empty) {
            bail!("topic pattern {pattern} has an empty segment");
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    fn matches(&self, topic: &str) -> bool {
        let topic_segments: Vec<&str> = topic.split('.').collect();
        if topic_segments.len() != self.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(topic_segments)
            .all(|(pattern, actual)| pattern == "*" || pattern == actual)
    }
}

struct Subscription {
    pattern: TopicPattern,
    tx: mpsc::Sender<Event>,
}

/// The bus. Cheap to share via `Arc`.
#[derive(Default)]
pub struct EventBus {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a handler for a topic pattern.
    ///
    /// The handler runs on its own serial worker; events queue per
    /// subscription and are processed in arrival order.
    pub fn on(&self, pattern: &str, handler: EventHandler) -> Result<()> {
        let pattern = TopicPattern::parse(pattern)?;

        let mut subscriptions = self.subscriptions.lock().unwrap();
        let existing = subscriptions
            .iter()
            .filter(|s| s.pattern == pattern)
            .count();
        if existing >= MAX_LISTENERS {
            bail!(
                "listener limit ({MAX_LISTENERS}) reached for pattern {}",
                pattern.raw
            );
        }

        let (tx, mut rx) = mpsc::channel::<Event>(SUBSCRIPTION_QUEUE);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler(event).await;
            }
        });

        subscriptions.push(Subscription { pattern, tx });
        Ok(())
    }

    /// Publish an event to every matching subscription.
    ///
    /// Enqueueing is sequential per subscription, which keeps per-topic
    /// ordering; a full queue applies backpressure to the emitter.
    pub async fn emit(&self, topic: &str, aggregate_id: &str, payload: Value) {
        let event = Event::new(topic, aggregate_id, payload);

        let matching: Vec<mpsc::Sender<Event>> = {
            let subscriptions = self.subscriptions.lock().unwrap();
            subscriptions
                .iter()
                .filter(|s| s.pattern.matches(topic))
                .map(|s| s.tx.clone())
                .collect()
        };

        for tx in matching {
            if tx.send(event.clone()).await.is_err() {
                warn!("Event handler for {topic} is gone, dropping event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    fn counting_handler(counter: Arc<AtomicUsize>) -> EventHandler {
        Arc::new(move |_event| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[test]
    fn pattern_matching() {
        let exact = TopicPattern::parse("comment.created").unwrap();
        assert!(exact.matches("comment.created"));
        assert!(!exact.matches("comment.deleted"));
        assert!(!exact.matches("comment.created.extra"));

        let wild = TopicPattern::parse("user.watchlist.*.added").unwrap();
        assert!(wild.matches("user.watchlist.token.added"));
        assert!(!wild.matches("user.watchlist.token.removed"));

        let prefix_wild = TopicPattern::parse("user.*").unwrap();
        assert!(prefix_wild.matches("user.created"));
        assert!(!prefix_wild.matches("user.watchlist.token.added"));
    }

    #[test]
    fn rejects_double_wildcard() {
        assert!(TopicPattern::parse("a.*.*").is_err());
        assert!(TopicPattern::parse("").is_err());
    }

    #[tokio::test]
    async fn delivers_to_matching_handlers() {
        let bus = EventBus::new();
        let exact_hits = Arc::new(AtomicUsize::new(0));
        let wild_hits = Arc::new(AtomicUsize::new(0));

        bus.on("comment.created", counting_handler(exact_hits.clone()))
            .unwrap();
        bus.on("comment.*", counting_handler(wild_hits.clone()))
            .unwrap();

        bus.emit("comment.created", "0xt", serde_json::json!({})).await;
        bus.emit("comment.updated", "0xt", serde_json::json!({})).await;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(exact_hits.load(Ordering::SeqCst), 1);
        assert_eq!(wild_hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn preserves_order_per_subscription() {
        let bus = EventBus::new();
        let seen = Arc::new(AsyncMutex::new(Vec::new()));

        let sink = seen.clone();
        bus.on(
            "ordered.topic",
            Arc::new(move |event| {
                let sink = sink.clone();
                Box::pin(async move {
                    sink.lock().await.push(event.aggregate_id);
                })
            }),
        )
        .unwrap();

        for i in 0..20 {
            bus.emit("ordered.topic", &i.to_string(), serde_json::json!({}))
                .await;
        }

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let seen = seen.lock().await;
        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(*seen, expected);
    }

    #[tokio::test]
    async fn enforces_listener_cap() {
        let bus = EventBus::new();
        for _ in 0..MAX_LISTENERS {
            bus.on("capped.topic", counting_handler(Arc::new(AtomicUsize::new(0))))
                .unwrap();
        }
        assert!(bus
            .on("capped.topic", counting_handler(Arc::new(AtomicUsize::new(0))))
            .is_err());
    }
}
