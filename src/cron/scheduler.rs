//! Cron scheduler for periodic background tasks.
//!
//! Runs jobs like:
//! - Triggering a token scan on the configured interval
//! - Re-arming the cached token partition TTLs

use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::config::ScannerSettings;
use crate::scanner::TokenScanner;
use crate::tokens::TokenRepository;

use super::jobs;

/// Configuration for cron job intervals
#[derive(Debug, Clone)]
pub struct CronSettings {
    /// Interval between scan triggers - default 2 seconds
    pub scan_interval_secs: u64,
    /// Interval for re-arming partition TTLs - half the partition TTL
    pub ttl_refresh_interval_secs: u64,
}

impl CronSettings {
    pub fn from_scanner(settings: &ScannerSettings) -> Self {
        Self {
            scan_interval_secs: settings.interval_seconds.max(1),
            ttl_refresh_interval_secs: (settings.partition_ttl_secs / 2).max(1),
        }
    }
}

/// Cron scheduler that manages periodic background jobs.
pub struct CronScheduler {
    scanner: Arc<TokenScanner>,
    repository: Arc<TokenRepository>,
    settings: CronSettings,
}

impl CronScheduler {
    pub fn new(
        scanner: Arc<TokenScanner>,
        repository: Arc<TokenRepository>,
        settings: CronSettings,
    ) -> Self {
        Self {
            scanner,
            repository,
            settings,
        }
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        self.register_scan_tick_job(&scheduler).await?;
        self.register_ttl_refresh_job(&scheduler).await?;

        scheduler.start().await?;
        info!("Cron scheduler started with {} jobs", 2);

        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_scan_tick_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let scanner = self.scanner.clone();
        let interval = self.settings.scan_interval_secs;

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval),
            move |_uuid, _lock| {
                let scanner = scanner.clone();
                Box::pin(async move {
                    if let Err(e) = jobs::scan_tick::run(&scanner).await {
                        error!("Scan tick failed: {:#}", e);
                    }
                })
            },
        )?;

        scheduler.add(job).await?;
        info!("Registered scan_tick job (every {}s)", interval);
        Ok(())
    }

    async fn register_ttl_refresh_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let repository = self.repository.clone();
        let interval = self.settings.ttl_refresh_interval_secs;

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval),
            move |_uuid, _lock| {
                let repository = repository.clone();
                Box::pin(async move {
                    if let Err(e) = jobs::refresh_partition_ttl::run(&repository).await {
                        error!("Failed to refresh partition TTLs: {:#}", e);
                    }
                })
            },
        )?;

        scheduler.add(job).await?;
        info!("Registered refresh_partition_ttl job (every {}s)", interval);
        Ok(())
    }
}
