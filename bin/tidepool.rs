use std::sync::Arc;

use anyhow::Context;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[cfg(not(target_env = "msvc"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use tidepool::chain::{ChainGateway, ChainRpc};
use tidepool::db::{PostgresClient, SocialStore};
use tidepool::feed::FeedIngestor;
use tidepool::http::{self, AppState};
use tidepool::kv::RedisKv;
use tidepool::social::{CommentEngine, ReactionEngine, WatchlistEngine};
use tidepool::{
    CronScheduler, CronSettings, EventBus, KvGateway, Settings, TokenRepository, TokenScanner,
};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap();

    // Load configuration
    let settings = Arc::new(
        Settings::new()
            .context("Failed to load config.yaml. Please ensure it exists and is valid")?,
    );
    let classifier = Arc::new(
        settings
            .classifier
            .compile()
            .context("Invalid classifier configuration")?,
    );

    let cancellation_token = CancellationToken::new();

    // Stores. Unreachable stores abort startup with a non-zero exit code
    // after the bounded retry window inside each client.
    let kv = KvGateway::new(Arc::new(
        RedisKv::connect(&settings.kv, cancellation_token.child_token())
            .await
            .context("Failed to connect to Redis")?,
    ));

    let postgres = PostgresClient::new(settings.postgres.clone())
        .await
        .context("Failed to initialize database connection")?;
    postgres.migrate().await?;
    let store: Arc<dyn SocialStore> = Arc::new(postgres);

    run_service(settings, classifier, kv, store, cancellation_token).await
}

async fn run_service(
    settings: Arc<Settings>,
    classifier: Arc<tidepool::config::ClassifierConfig>,
    kv: KvGateway,
    store: Arc<dyn SocialStore>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let bus = EventBus::new();

    // Scanner pipeline
    let chain: Arc<dyn ChainRpc> = Arc::new(
        ChainGateway::new(&settings.chain).context("Failed to initialize chain gateway")?,
    );
    let repository = Arc::new(TokenRepository::new(
        kv.clone(),
        bus.clone(),
        settings.scanner.partition_ttl_secs,
        settings.chain.network.clone(),
        settings.chain.chain_id,
    ));
    let scanner = Arc::new(TokenScanner::new(
        chain,
        repository.clone(),
        settings.scanner.clone(),
        classifier,
        settings.chain.chain_id,
    ));

    // Engines and their background handlers
    let comments = CommentEngine::new(kv.clone(), store.clone(), bus.clone());
    comments.register()?;
    let reactions = ReactionEngine::new(kv.clone(), bus.clone());
    reactions.register()?;
    let watchlist = WatchlistEngine::new(kv.clone(), store.clone(), bus.clone());
    tidepool::feed::register_handlers(&bus, kv.clone())?;

    // Cron scheduler drives the scan tick and TTL refresh
    let cron_scheduler = CronScheduler::new(
        scanner.clone(),
        repository.clone(),
        CronSettings::from_scanner(&settings.scanner),
    );
    let cron_token = cancellation_token.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = cron_scheduler.run(cron_token).await {
            error!("Cron scheduler failed: {:#}", e);
        }
    });
    info!("Cron scheduler started - scanner will run periodically");

    // Launchpad feed ingestor
    let feed_handle = if settings.external_feed.enabled {
        let ingestor = FeedIngestor::new(settings.external_feed.clone(), bus.clone());
        let feed_token = cancellation_token.child_token();
        Some(tokio::spawn(async move {
            if let Err(e) = ingestor.run(feed_token).await {
                error!("Feed ingestor failed: {:#}", e);
            }
        }))
    } else {
        info!("External feed ingestor is disabled");
        None
    };

    // HTTP server
    let state = AppState {
        scanner,
        tokens: repository,
        comments,
        reactions,
        watchlist,
        kv,
        store,
    };
    let http_token = cancellation_token.child_token();
    let http_settings = settings.http.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(e) = http::serve(state, http_settings, http_token).await {
            error!("HTTP server failed: {:#}", e);
        }
    });

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Tidepool running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    // Cancel all running tasks
    info!("Finishing all tasks...");
    cancellation_token.cancel();

    info!("Waiting for HTTP server to stop...");
    let _ = http_handle.await;

    info!("Waiting for cron scheduler to stop...");
    let _ = cron_handle.await;

    if let Some(handle) = feed_handle {
        info!("Waiting for feed ingestor to stop...");
        let _ = handle.await;
    }

    info!("All tasks stopped");
    Ok(())
}
