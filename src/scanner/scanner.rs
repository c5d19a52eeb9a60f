//! Token scanner: orchestrates the discovery pipeline on a fixed schedule.
//!
//! A scan cycle reads pool-initialization logs over the configured block
//! window, filters to classified hooks, resolves block timestamps, processes
//! pools into token records, and hands them to the repository. The scanner
//! is non-reentrant: a trigger arriving while a scan runs is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;

use crate::chain::{BlockTimestampCache, ChainRpc};
use crate::config::{ClassifierConfig, ScanWindow, ScannerSettings};
use crate::exec::RetryPolicy;
use crate::tokens::TokenRepository;

use super::processor::{PoolKey, PoolProcessor};

/// Summary of one completed scan cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub blocks_scanned: u64,
    pub from_block: u64,
    pub to_block: u64,
    pub pools_discovered: usize,
    pub tokens_added: usize,
    pub zora_tokens: usize,
    pub tba_tokens: usize,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

pub struct TokenScanner {
    chain: Arc<dyn ChainRpc>,
    processor: PoolProcessor,
    repository: Arc<TokenRepository>,
    settings: ScannerSettings,
    classifier: Arc<ClassifierConfig>,
    retry: RetryPolicy,
    scanning: AtomicBool,
}

impl TokenScanner {
    pub fn new(
        chain: Arc<dyn ChainRpc>,
        repository: Arc<TokenRepository>,
        settings: ScannerSettings,
        classifier: Arc<ClassifierConfig>,
        chain_id: u64,
    ) -> Self {
        Self {
            processor: PoolProcessor::new(chain.clone(), classifier.clone(), chain_id),
            chain,
            repository,
            settings,
            classifier,
            retry: RetryPolicy::default(),
            scanning: AtomicBool::new(false),
        }
    }

    /// Run one scan cycle. Returns `None` when a scan is already running.
    pub async fn scan(&self) -> Result<Option<ScanResult>> {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(None);
        }

        let result = self.run_cycle().await;
        self.scanning.store(false, Ordering::Release);
        result.map(Some)
    }

    async fn run_cycle(&self) -> Result<ScanResult> {
        let started = Instant::now();

        let (from_block, to_block) = self.window().await?;

        let logs = self
            .retry
            .run(|| self.chain.initialize_events(from_block, to_block))
            .await?;

        // Only pools whose hook belongs to the classifier map are tokens we
        // know how to describe.
        let keys: Vec<PoolKey> = logs
            .into_iter()
            .filter(|log| self.classifier.hooks.contains_key(&log.hooks))
            .map(PoolKey::from)
            .collect();
        let pools_discovered = keys.len();

        let blocks: Vec<u64> = keys.iter().map(|k| k.discovery_block).collect();
        let timestamps = BlockTimestampCache::new(self.chain.clone())
            .timestamps(&blocks)
            .await?;

        let records = self.processor.process(keys, &timestamps).await;
        let outcome = self.repository.store(records).await?;

        let result = ScanResult {
            blocks_scanned: to_block.saturating_sub(from_block) + 1,
            from_block,
            to_block,
            pools_discovered,
            tokens_added: outcome.tokens_added,
            zora_tokens: outcome.zora_tokens,
            tba_tokens: outcome.tba_tokens,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        };

        info!(
            "Scan [{}..{}]: {} pool(s), {} token(s) in {} ms",
            result.from_block,
            result.to_block,
            result.pools_discovered,
            result.tokens_added,
            result.duration_ms
        );

        Ok(result)
    }

    async fn window(&self) -> Result<(u64, u64)> {
        match self.settings.window {
            ScanWindow::Fixed => Ok((
                self.settings.start_block,
                self.settings.start_block + self.settings.block_range,
            )),
            ScanWindow::Sliding => {
                let latest = self
                    .retry
                    .run(|| self.chain.latest_block_number())
                    .await?;
                Ok((latest.saturating_sub(self.settings.block_range), latest))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::gateway::{BlockHeader, FungibleMeta, InitializeLog, PoolState};
    use crate::config::ClassifierSettings;
    use crate::events::EventBus;
    use crate::kv::{KvGateway, MemoryKv};
    use crate::tokens::AppType;
    use crate::utils::compute_pool_id;
    use alloy::primitives::{Address, B256};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    const USDC: &str = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913";
    const TOKEN: &str = "0x9999999999999999999999999999999999999999";
    const CREATOR_HOOK: &str = "0x5e5d9d3d650a1548ecb7cd5ff42f1eeb47200040";
    const UNKNOWN_HOOK: &str = "0xdeaddeaddeaddeaddeaddeaddeaddeaddeaddead";

    // sqrt(0.0005) * 2^96: price0->1 of 0.0005 for equal decimals.
    const SQRT_PRICE: &str = "1771595571142957102961017161";

    struct MockChain {
        logs: Vec<InitializeLog>,
        latest_block: u64,
        scan_delay: Duration,
    }

    impl MockChain {
        fn with_pool(currency0: &str, currency1: &str, hook: &str) -> Self {
            let currency0: Address = currency0.parse().unwrap();
            let currency1: Address = currency1.parse().unwrap();
            let hooks: Address = hook.parse().unwrap();
            let pool_id = compute_pool_id(currency0, currency1, 3000, 60, hooks);

            Self {
                logs: vec![InitializeLog {
                    pool_id,
                    currency0,
                    currency1,
                    fee: 3000,
                    tick_spacing: 60,
                    hooks,
                    block_number: 42,
                }],
                latest_block: 5000,
                scan_delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl ChainRpc for MockChain {
        async fn initialize_events(
            &self,
            _from: u64,
            _to: u64,
        ) -> anyhow::Result<Vec<InitializeLog>> {
            if !self.scan_delay.is_zero() {
                tokio::time::sleep(self.scan_delay).await;
            }
            Ok(self.logs.clone())
        }

        async fn block_header(&self, block_number: u64) -> anyhow::Result<BlockHeader> {
            Ok(BlockHeader {
                number: block_number,
                timestamp: 1_700_000_000,
            })
        }

        async fn latest_block_number(&self) -> anyhow::Result<u64> {
            Ok(self.latest_block)
        }

        async fn read_state_view(&self, _pool_id: B256) -> anyhow::Result<PoolState> {
            Ok(PoolState {
                sqrt_price_x96: SQRT_PRICE.to_string(),
                tick: -76013,
                liquidity: 1_000_000,
            })
        }

        async fn read_fungible_meta(&self, _address: Address) -> anyhow::Result<FungibleMeta> {
            Ok(FungibleMeta {
                name: "Foo".to_string(),
                symbol: "FOO".to_string(),
                decimals: 18,
            })
        }
    }

    fn scanner_with(chain: MockChain, window: ScanWindow) -> (Arc<TokenScanner>, Arc<TokenRepository>) {
        let classifier = Arc::new(
            ClassifierSettings {
                hooks: HashMap::from([(CREATOR_HOOK.to_string(), "ZoraCreator".to_string())]),
                base_pairings: vec![USDC.to_string()],
            }
            .compile()
            .unwrap(),
        );

        let kv = KvGateway::new(Arc::new(MemoryKv::new()));
        let repository = Arc::new(TokenRepository::new(
            kv,
            EventBus::new(),
            3600,
            "base".to_string(),
            8453,
        ));

        let settings = ScannerSettings {
            start_block: 100,
            block_range: 1000,
            interval_seconds: 2,
            window,
            partition_ttl_secs: 3600,
        };

        let scanner = Arc::new(TokenScanner::new(
            Arc::new(chain),
            repository.clone(),
            settings,
            classifier,
            8453,
        ));

        (scanner, repository)
    }

    #[tokio::test]
    async fn classifies_a_paired_pool() {
        let (scanner, repository) =
            scanner_with(MockChain::with_pool(USDC, TOKEN, CREATOR_HOOK), ScanWindow::Fixed);

        let result = scanner.scan().await.unwrap().unwrap();
        assert_eq!(result.pools_discovered, 1);
        assert_eq!(result.tokens_added, 1);
        assert_eq!(result.tba_tokens, 1);
        assert_eq!(result.zora_tokens, 0);
        assert_eq!((result.from_block, result.to_block), (100, 1100));

        let partition = repository.by_partition("tba").await.unwrap().unwrap();
        let record = &partition.records[0];
        assert_eq!(record.app_type, AppType::Paired);
        assert_eq!(record.coin_type, "ZoraCreator");
        assert_eq!(record.token_address, TOKEN);
        assert_eq!(record.token_name, "Foo");
        assert_eq!(record.token_symbol, "FOO");
        assert_eq!(record.human_price, "0.000500");
        assert_eq!(record.discovery_timestamp, 1_700_000_000);
        assert_eq!(record.discovery_block, 42);
    }

    #[tokio::test]
    async fn drops_pools_with_unknown_hooks() {
        let (scanner, repository) =
            scanner_with(MockChain::with_pool(USDC, TOKEN, UNKNOWN_HOOK), ScanWindow::Fixed);

        let result = scanner.scan().await.unwrap().unwrap();
        assert_eq!(result.pools_discovered, 0);
        assert_eq!(result.tokens_added, 0);

        let partition = repository.by_partition("tba").await.unwrap().unwrap();
        assert!(partition.records.is_empty());
    }

    #[tokio::test]
    async fn classifies_a_primary_pool() {
        let other = "0x1111111111111111111111111111111111111111";
        let (scanner, repository) =
            scanner_with(MockChain::with_pool(other, TOKEN, CREATOR_HOOK), ScanWindow::Fixed);

        scanner.scan().await.unwrap().unwrap();

        let partition = repository.by_partition("zora").await.unwrap().unwrap();
        let record = &partition.records[0];
        assert_eq!(record.app_type, AppType::Primary);
        // Token side is currency0 for primary pools.
        assert_eq!(record.token_address, other);
    }

    #[tokio::test]
    async fn sliding_window_anchors_at_the_tip() {
        let (scanner, _repo) =
            scanner_with(MockChain::with_pool(USDC, TOKEN, CREATOR_HOOK), ScanWindow::Sliding);

        let result = scanner.scan().await.unwrap().unwrap();
        assert_eq!((result.from_block, result.to_block), (4000, 5000));
        assert_eq!(result.blocks_scanned, 1001);
    }

    #[tokio::test]
    async fn concurrent_triggers_are_dropped() {
        let mut chain = MockChain::with_pool(USDC, TOKEN, CREATOR_HOOK);
        chain.scan_delay = Duration::from_millis(100);
        let (scanner, _repo) = scanner_with(chain, ScanWindow::Fixed);

        let (a, b) = tokio::join!(scanner.scan(), scanner.scan());
        let completed = [a.unwrap(), b.unwrap()]
            .into_iter()
            .filter(Option::is_some)
            .count();
        assert_eq!(completed, 1);
    }
}
