//! Pool processor: loads on-chain state for discovered pools, classifies
//! their tokens, and computes prices.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use log::warn;
use rustc_hash::FxHashMap;

use crate::chain::{ChainRpc, Currency, CurrencyResolver, InitializeLog};
use crate::config::ClassifierConfig;
use crate::exec::{BatchExecutor, RetryPolicy};
use crate::tokens::{AppType, TokenRecord};
use crate::utils::{compute_pool_id, format_human_price, PricePair};

/// At most 3 pools in flight concurrently, 300 ms between batches.
const POOL_BATCH_SIZE: usize = 3;
const POOL_BATCH_DELAY: Duration = Duration::from_millis(300);

/// Identity of a discovered pool, derived from its initialization log.
#[derive(Debug, Clone)]
pub struct PoolKey {
    pub currency0: Address,
    pub currency1: Address,
    pub fee: u32,
    pub tick_spacing: i32,
    pub hooks: Address,
    pub discovery_block: u64,
}

impl From<InitializeLog> for PoolKey {
    fn from(log: InitializeLog) -> Self {
        Self {
            currency0: log.currency0,
            currency1: log.currency1,
            fee: log.fee,
            tick_spacing: log.tick_spacing,
            hooks: log.hooks,
            discovery_block: log.block_number,
        }
    }
}

pub struct PoolProcessor {
    chain: Arc<dyn ChainRpc>,
    resolver: CurrencyResolver,
    classifier: Arc<ClassifierConfig>,
    batch: BatchExecutor,
    retry: RetryPolicy,
}

impl PoolProcessor {
    pub fn new(
        chain: Arc<dyn ChainRpc>,
        classifier: Arc<ClassifierConfig>,
        chain_id: u64,
    ) -> Self {
        Self {
            resolver: CurrencyResolver::new(chain.clone(), chain_id),
            chain,
            classifier,
            batch: BatchExecutor::new(POOL_BATCH_SIZE, POOL_BATCH_DELAY),
            retry: RetryPolicy::default(),
        }
    }

    /// Process pool keys into token records. A failure within one pool drops
    /// only that pool.
    pub async fn process(
        &self,
        keys: Vec<PoolKey>,
        timestamps: &FxHashMap<u64, u64>,
    ) -> Vec<TokenRecord> {
        let results = self
            .batch
            .execute(keys, |key| async move {
                match self.process_pool(&key, timestamps).await {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(
                            "Dropping pool {}/{}: {e:#}",
                            key.currency0, key.currency1
                        );
                        None
                    },
                }
            })
            .await;

        results.into_iter().flatten().collect()
    }

    async fn process_pool(
        &self,
        key: &PoolKey,
        timestamps: &FxHashMap<u64, u64>,
    ) -> Result<TokenRecord> {
        let (currency0, currency1) = tokio::try_join!(
            self.resolver.resolve(key.currency0),
            self.resolver.resolve(key.currency1),
        )?;

        let pool_id = compute_pool_id(
            key.currency0,
            key.currency1,
            key.fee,
            key.tick_spacing,
            key.hooks,
        );

        let state = self
            .retry
            .run(|| self.chain.read_state_view(pool_id))
            .await?;

        let prices = PricePair::from_sqrt_price_x96(
            &state.sqrt_price_x96,
            currency0.decimals(),
            currency1.decimals(),
        )
        .with_context(|| format!("invalid sqrtPriceX96 {} for pool {pool_id}", state.sqrt_price_x96))?;

        // The scanner filters to configured hooks before handing keys over.
        let coin_type = self
            .classifier
            .coin_type_for(&key.hooks)
            .with_context(|| format!("unclassified hook {}", key.hooks))?
            .to_string();

        let c0_base = self.classifier.is_base_pairing(&currency0.address());
        let c1_base = self.classifier.is_base_pairing(&currency1.address());

        // When both currencies are base pairings, currency1 is the token.
        let (app_type, token, human_price): (AppType, &Currency, f64) = if c0_base {
            (AppType::Paired, &currency1, prices.price0_in_1)
        } else if c1_base {
            (AppType::Paired, &currency0, prices.price1_in_0)
        } else {
            (AppType::Primary, &currency0, prices.price0_in_1)
        };

        let discovery_timestamp = timestamps
            .get(&key.discovery_block)
            .copied()
            .with_context(|| format!("missing timestamp for block {}", key.discovery_block))?;

        Ok(TokenRecord {
            pool_id: format!("{pool_id:#x}"),
            app_type,
            coin_type,
            token_address: format!("{:#x}", token.address()),
            token_name: token.name().to_string(),
            token_symbol: token.symbol().to_string(),
            token_decimals: token.decimals(),
            current_tick: state.tick,
            sqrt_price_x96: state.sqrt_price_x96.clone(),
            human_price: format_human_price(human_price),
            discovery_block: key.discovery_block,
            discovery_timestamp,
        })
    }
}
