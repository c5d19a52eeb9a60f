//! In-process fan-out for pub/sub channels.
//!
//! A single upstream subscription per channel is shared by every in-process
//! listener; when the last listener goes away the upstream subscription is
//! released. The Redis backend drives the registry from its dedicated
//! subscribe connection; the in-memory backend dispatches directly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use log::{info, warn};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Buffered messages per channel before a slow listener starts lagging.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub(crate) enum PubSubCommand {
    Subscribe(String),
    Unsubscribe(String),
}

struct ChannelEntry {
    tx: broadcast::Sender<String>,
    listeners: usize,
}

/// Registry of in-process listeners keyed by channel name.
pub(crate) struct SubscriberRegistry {
    channels: Mutex<HashMap<String, ChannelEntry>>,
    control: Option<mpsc::UnboundedSender<PubSubCommand>>,
}

impl SubscriberRegistry {
    pub(crate) fn new(control: Option<mpsc::UnboundedSender<PubSubCommand>>) -> Arc<Self> {
        Arc::new(Self {
            channels: Mutex::new(HashMap::new()),
            control,
        })
    }

    pub(crate) fn subscribe(self: &Arc<Self>, channel: &str) -> Subscription {
        let rx = {
            let mut channels = self.channels.lock().unwrap();
            match channels.get_mut(channel) {
                Some(entry) => {
                    entry.listeners += 1;
                    entry.tx.subscribe()
                },
                None => {
                    let (tx, rx) = broadcast::channel(CHANNEL_CAPACITY);
                    channels.insert(
                        channel.to_string(),
                        ChannelEntry { tx, listeners: 1 },
                    );
                    if let Some(control) = &self.control {
                        let _ = control.send(PubSubCommand::Subscribe(channel.to_string()));
                    }
                    rx
                },
            }
        };

        Subscription {
            rx,
            guard: SubscriptionGuard {
                registry: self.clone(),
                channel: channel.to_string(),
            },
        }
    }

    fn release(&self, channel: &str) {
        let mut channels = self.channels.lock().unwrap();
        if let Some(entry) = channels.get_mut(channel) {
            entry.listeners = entry.listeners.saturating_sub(1);
            if entry.listeners == 0 {
                channels.remove(channel);
                if let Some(control) = &self.control {
                    let _ = control.send(PubSubCommand::Unsubscribe(channel.to_string()));
                }
            }
        }
    }

    /// Deliver a message to every in-process listener of `channel`.
    pub(crate) fn dispatch(&self, channel: &str, payload: String) {
        let channels = self.channels.lock().unwrap();
        if let Some(entry) = channels.get(channel) {
            // Send errors mean no receiver is currently polling; acceptable.
            let _ = entry.tx.send(payload);
        }
    }

    pub(crate) fn channel_names(&self) -> Vec<String> {
        self.channels.lock().unwrap().keys().cloned().collect()
    }

    pub(crate) fn is_subscribed(&self, channel: &str) -> bool {
        self.channels.lock().unwrap().contains_key(channel)
    }
}

/// A live subscription to one channel.
pub struct Subscription {
    rx: broadcast::Receiver<String>,
    guard: SubscriptionGuard,
}

impl Subscription {
    pub async fn recv(&mut self) -> Result<String, broadcast::error::RecvError> {
        self.rx.recv().await
    }

    /// Split into the raw receiver and the guard keeping the upstream
    /// subscription alive. Drop the guard to release the channel.
    pub fn into_parts(self) -> (broadcast::Receiver<String>, SubscriptionGuard) {
        (self.rx, self.guard)
    }

    /// Release this listener. The upstream subscription closes once the
    /// channel's last listener is gone.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

/// Releases the in-process listener slot on drop; the upstream subscription
/// is closed when the last guard for a channel goes away.
pub struct SubscriptionGuard {
    registry: Arc<SubscriberRegistry>,
    channel: String,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.registry.release(&self.channel);
    }
}

/// Drives the process's single subscribe connection.
///
/// Reconnects with doubling backoff and replays the active channel set after
/// every reconnect, so listener state survives Redis restarts.
pub(crate) async fn run_pubsub(
    client: redis::Client,
    mut control: mpsc::UnboundedReceiver<PubSubCommand>,
    registry: Arc<SubscriberRegistry>,
    cancel: CancellationToken,
) {
    let mut backoff = Duration::from_secs(1);
    const MAX_BACKOFF: Duration = Duration::from_secs(30);

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let pubsub = match client.get_async_pubsub().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Subscribe connection failed: {e}, retrying in {backoff:?}");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {},
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            },
        };
        backoff = Duration::from_secs(1);

        let (mut sink, mut stream) = pubsub.split();

        // Replay subscriptions that existed before a reconnect.
        for channel in registry.channel_names() {
            if let Err(e) = sink.subscribe(&channel).await {
                warn!("Failed to resubscribe to {channel}: {e}");
            }
        }

        info!("Subscribe connection established");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                cmd = control.recv() => match cmd {
                    Some(PubSubCommand::Subscribe(channel)) => {
                        if let Err(e) = sink.subscribe(&channel).await {
                            warn!("Failed to subscribe to {channel}: {e}");
                        }
                    },
                    Some(PubSubCommand::Unsubscribe(channel)) => {
                        if let Err(e) = sink.unsubscribe(&channel).await {
                            warn!("Failed to unsubscribe from {channel}: {e}");
                        }
                    },
                    None => return,
                },
                msg = stream.next() => match msg {
                    Some(msg) => {
                        let channel = msg.get_channel_name().to_string();
                        let payload: String = msg.get_payload().unwrap_or_default();
                        registry.dispatch(&channel, payload);
                    },
                    None => {
                        warn!("Subscribe connection lost, reconnecting");
                        break;
                    },
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_shares_one_channel_entry() {
        let registry = SubscriberRegistry::new(None);

        let mut a = registry.subscribe("emojiUpdates:0xt");
        let mut b = registry.subscribe("emojiUpdates:0xt");
        assert_eq!(registry.channel_names().len(), 1);

        registry.dispatch("emojiUpdates:0xt", "hello".to_string());
        assert_eq!(a.recv().await.unwrap(), "hello");
        assert_eq!(b.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn last_listener_releases_the_channel() {
        let registry = SubscriberRegistry::new(None);

        let a = registry.subscribe("comments:0xt");
        let b = registry.subscribe("comments:0xt");
        assert!(registry.is_subscribed("comments:0xt"));

        drop(a);
        assert!(registry.is_subscribed("comments:0xt"));

        drop(b);
        assert!(!registry.is_subscribed("comments:0xt"));
    }

    #[tokio::test]
    async fn release_sends_unsubscribe_command() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = SubscriberRegistry::new(Some(tx));

        let sub = registry.subscribe("new-tokens:updates");
        assert!(matches!(
            rx.recv().await.unwrap(),
            PubSubCommand::Subscribe(ch) if ch == "new-tokens:updates"
        ));

        drop(sub);
        assert!(matches!(
            rx.recv().await.unwrap(),
            PubSubCommand::Unsubscribe(ch) if ch == "new-tokens:updates"
        ));
    }
}
