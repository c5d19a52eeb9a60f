//! HTTP server: axum router over the engines, CORS, rate limiting.

pub mod envelope;
pub mod handlers;
pub mod rate_limit;
pub mod sse;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use axum::routing::{delete, get, post};
use axum::Router;
use log::info;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tokio_util::sync::CancellationToken;

use crate::config::HttpSettings;
use crate::db::SocialStore;
use crate::kv::KvGateway;
use crate::scanner::TokenScanner;
use crate::social::{CommentEngine, ReactionEngine, WatchlistEngine};
use crate::tokens::TokenRepository;

use self::rate_limit::{rate_limit_middleware, RateLimiter};

/// Shared handler state. Everything inside is `Arc`'d; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub scanner: Arc<TokenScanner>,
    pub tokens: Arc<TokenRepository>,
    pub comments: Arc<CommentEngine>,
    pub reactions: Arc<ReactionEngine>,
    pub watchlist: Arc<WatchlistEngine>,
    pub kv: KvGateway,
    pub store: Arc<dyn SocialStore>,
}

fn cors_layer(settings: &HttpSettings) -> CorsLayer {
    if settings.cors_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = settings
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn router(state: AppState, settings: &HttpSettings) -> Router {
    let limiter = RateLimiter::new(settings);

    let api = Router::new()
        .route("/watchlist/add", post(handlers::watchlist_add))
        .route("/watchlist/remove", delete(handlers::watchlist_remove))
        .route("/watchlist/get", get(handlers::watchlist_get))
        .route(
            "/watchlist/check/:wallet/:token",
            get(handlers::watchlist_check),
        )
        .route("/watchlist/count/:wallet", get(handlers::watchlist_count))
        .route("/comments", post(handlers::comments_create))
        .route("/comments/stream/:token", get(sse::comments_stream))
        .route("/comments/:token", get(handlers::comments_latest))
        .route("/emoji/react", post(handlers::emoji_react))
        .route("/emoji/stream/:token", get(sse::emoji_stream))
        .route("/emoji/:token", get(handlers::emoji_counts))
        .route("/new-tokens/tokens", get(handlers::new_tokens_list))
        .route("/new-tokens/tokens/stream", get(sse::new_tokens_stream))
        .route("/tokens", get(handlers::tokens_all))
        .route("/tokens/zora", get(handlers::tokens_zora))
        .route("/tokens/tba", get(handlers::tokens_tba))
        .route("/tokens/metadata", get(handlers::tokens_metadata))
        .route("/tokens/scan", post(handlers::tokens_scan))
        .route("/health", get(handlers::health))
        .route("/health/detailed", get(handlers::health_detailed));

    Router::new()
        .nest("/api/v1", api)
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ))
        .layer(cors_layer(settings))
}

/// Serve until the cancellation token fires.
pub async fn serve(
    state: AppState,
    settings: HttpSettings,
    cancel: CancellationToken,
) -> Result<()> {
    let app = router(state, &settings);

    let listener = TcpListener::bind(&settings.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_address))?;
    info!("HTTP server listening on {}", settings.bind_address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(cancel.cancelled_owned())
    .await
    .context("HTTP server failed")
}
