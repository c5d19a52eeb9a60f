//! SSE broadcast fabric.
//!
//! Each connection receives a `connection` event, then the snapshot, then
//! per-channel deltas in publish order. All connections to one channel share
//! a single upstream subscription; a client that lags behind the broadcast
//! buffer is disconnected rather than buffered without bound.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use log::warn;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::{ApiError, ApiResult};
use crate::feed;
use crate::kv::Subscription;
use crate::social::{comments, reactions};
use crate::utils::{clamp_limit, is_token_address, normalize_address};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct InitialQuery {
    pub initial: Option<u32>,
}

/// Compose the per-connection stream: connection event, snapshot, deltas.
///
/// The subscription guard rides inside the delta closure so the shared
/// upstream subscription is released exactly when the connection stream is
/// dropped.
fn event_stream(
    connection_payload: String,
    snapshot_event: &'static str,
    snapshot_payload: String,
    subscription: Subscription,
    delta_event: Option<&'static str>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let connection = Event::default().event("connection").data(connection_payload);
    let snapshot = Event::default().event(snapshot_event).data(snapshot_payload);

    let (rx, guard) = subscription.into_parts();
    let deltas = BroadcastStream::new(rx)
        // A lagging receiver ends the stream; the client reconnects for a
        // fresh snapshot instead of receiving a gap.
        .take_while(|received| futures::future::ready(received.is_ok()))
        .map(move |received| {
            let _keep_subscription = &guard;
            let payload = received.unwrap_or_default();
            let event = match delta_event {
                Some(name) => Event::default().event(name).data(payload),
                None => Event::default().data(payload),
            };
            Ok(event)
        });

    stream::iter([Ok(connection), Ok(snapshot)]).chain(deltas)
}

fn sse_headers() -> [(header::HeaderName, &'static str); 1] {
    [(header::CACHE_CONTROL, "no-cache")]
}

fn connection_payload(channel: &str) -> String {
    json!({
        "type": "connection",
        "channel": channel,
        "timestamp": Utc::now(),
    })
    .to_string()
}

pub async fn comments_stream(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<InitialQuery>,
) -> ApiResult<impl IntoResponse> {
    if !is_token_address(&token) {
        return Err(ApiError::validation(
            "tokenAddress must be a 0x-prefixed 40-hex-char address",
        ));
    }

    let token = normalize_address(&token);
    let initial = clamp_limit(query.initial, 50);
    let channel = comments::channel(&token);

    let subscription = state.kv.subscribe(&channel).await?;

    let snapshot = match state.comments.latest(&token, Some(initial)).await {
        Ok(comments) => comments,
        Err(e) => {
            warn!("Comment snapshot for {token} failed: {e}");
            Vec::new()
        },
    };
    let snapshot_payload =
        serde_json::to_string(&snapshot).map_err(|e| ApiError::transient(e.to_string()))?;

    Ok((
        sse_headers(),
        Sse::new(event_stream(
            connection_payload(&channel),
            "initialComments",
            snapshot_payload,
            subscription,
            Some("newComment"),
        ))
        .keep_alive(KeepAlive::default()),
    ))
}

pub async fn emoji_stream(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if !is_token_address(&token) {
        return Err(ApiError::validation(
            "tokenAddress must be a 0x-prefixed 40-hex-char address",
        ));
    }

    let token = normalize_address(&token);
    let channel = reactions::channel(&token);

    let subscription = state.kv.subscribe(&channel).await?;

    let counts = state.reactions.counts(&token).await.unwrap_or_default();
    let snapshot_payload =
        serde_json::to_string(&counts).map_err(|e| ApiError::transient(e.to_string()))?;

    Ok((
        sse_headers(),
        Sse::new(event_stream(
            connection_payload(&channel),
            "initialEmojiCounts",
            snapshot_payload,
            subscription,
            Some("emojiCountUpdate"),
        ))
        .keep_alive(KeepAlive::default()),
    ))
}

pub async fn new_tokens_stream(
    State(state): State<AppState>,
    Query(query): Query<InitialQuery>,
) -> ApiResult<impl IntoResponse> {
    let initial = clamp_limit(query.initial, 100);

    let subscription = state.kv.subscribe(feed::UPDATES_CHANNEL).await?;

    let (tokens, _total) = feed::list_tokens(&state.kv, 0, initial).await?;
    let snapshot_payload =
        serde_json::to_string(&tokens).map_err(|e| ApiError::transient(e.to_string()))?;

    Ok((
        sse_headers(),
        Sse::new(event_stream(
            connection_payload(feed::UPDATES_CHANNEL),
            "snapshot",
            snapshot_payload,
            subscription,
            // One anonymous event per item.
            None,
        ))
        .keep_alive(KeepAlive::default()),
    ))
}
