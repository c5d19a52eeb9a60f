//! Typed wrapper over the chain JSON-RPC node.
//!
//! The gateway exposes exactly the reads the scanner pipeline needs: pool
//! initialization logs, block headers, the chain tip, StateView pool state,
//! and ERC-20 metadata. It does not retry internally; callers wrap calls in
//! the retry executor.

use std::time::Duration;

use alloy::primitives::{Address, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::warn;
use url::Url;

use crate::abis::{pool_manager::Initialize, IStateView, IERC20};
use crate::config::ChainSettings;
use crate::utils::compute_pool_id;

/// A decoded pool-initialization event.
#[derive(Debug, Clone)]
pub struct InitializeLog {
    pub pool_id: B256,
    pub currency0: Address,
    pub currency1: Address,
    pub fee: u32,
    pub tick_spacing: i32,
    pub hooks: Address,
    pub block_number: u64,
}

/// Header fields the pipeline consumes.
#[derive(Debug, Clone, Copy)]
pub struct BlockHeader {
    pub number: u64,
    pub timestamp: u64,
}

/// Pool state from the StateView contract.
#[derive(Debug, Clone)]
pub struct PoolState {
    /// Full-precision uint160 as a decimal string.
    pub sqrt_price_x96: String,
    pub tick: i32,
    pub liquidity: u128,
}

/// ERC-20 metadata. `decimals` is mandatory; name and symbol fall back to
/// empty strings for non-conforming contracts.
#[derive(Debug, Clone)]
pub struct FungibleMeta {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Chain read operations used by the scanner pipeline.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn initialize_events(&self, from_block: u64, to_block: u64)
        -> Result<Vec<InitializeLog>>;

    async fn block_header(&self, block_number: u64) -> Result<BlockHeader>;

    async fn latest_block_number(&self) -> Result<u64>;

    /// A single logical read composed of at most two underlying calls.
    async fn read_state_view(&self, pool_id: B256) -> Result<PoolState>;

    /// Three on-chain reads issued concurrently.
    async fn read_fungible_meta(&self, address: Address) -> Result<FungibleMeta>;
}

/// Alloy-backed gateway against a single L2 RPC endpoint.
pub struct ChainGateway {
    provider: DynProvider,
    pool_manager: Address,
    state_view: Address,
    rpc_timeout: Duration,
}

impl ChainGateway {
    pub fn new(settings: &ChainSettings) -> Result<Self> {
        let url = Url::parse(&settings.rpc_url).context("Invalid RPC URL")?;

        let client = ProviderBuilder::new().connect_http(url);
        let provider = DynProvider::new(client);

        let pool_manager: Address = settings
            .pool_manager_address
            .parse()
            .context("Invalid pool manager address")?;
        let state_view: Address = settings
            .state_view_address
            .parse()
            .context("Invalid state view address")?;

        Ok(Self {
            provider,
            pool_manager,
            state_view,
            rpc_timeout: Duration::from_secs(settings.rpc_timeout_secs),
        })
    }

    async fn with_timeout<T>(
        &self,
        what: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.rpc_timeout, fut)
            .await
            .map_err(|_| anyhow::anyhow!("{what} timed out after {:?}", self.rpc_timeout))?
    }
}

#[async_trait]
impl ChainRpc for ChainGateway {
    async fn initialize_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<InitializeLog>> {
        let filter = Filter::new()
            .address(self.pool_manager)
            .event_signature(Initialize::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .with_timeout("eth_getLogs", async {
                self.provider
                    .get_logs(&filter)
                    .await
                    .context("eth_getLogs failed")
            })
            .await?;

        let mut decoded = Vec::with_capacity(logs.len());
        for log in logs {
            let Some(block_number) = log.block_number else {
                continue;
            };

            let event = match Initialize::decode_log(&log.inner) {
                Ok(ev) => ev.data,
                Err(e) => {
                    warn!("Failed to decode Initialize log: {e}");
                    continue;
                },
            };

            // ANTI-SPOOFING: the event-carried pool ID must match the one
            // recomputed from its fields.
            let computed = compute_pool_id(
                event.currency0,
                event.currency1,
                event.fee.to::<u32>(),
                event.tickSpacing.as_i32(),
                event.hooks,
            );
            if computed != event.id {
                warn!(
                    "Initialize: pool ID mismatch, event {} vs computed {}",
                    event.id, computed
                );
                continue;
            }

            decoded.push(InitializeLog {
                pool_id: event.id,
                currency0: event.currency0,
                currency1: event.currency1,
                fee: event.fee.to::<u32>(),
                tick_spacing: event.tickSpacing.as_i32(),
                hooks: event.hooks,
                block_number,
            });
        }

        Ok(decoded)
    }

    async fn block_header(&self, block_number: u64) -> Result<BlockHeader> {
        let block = self
            .with_timeout("eth_getBlockByNumber", async {
                self.provider
                    .get_block_by_number(block_number.into())
                    .await
                    .context("eth_getBlockByNumber failed")
            })
            .await?
            .with_context(|| format!("block {block_number} not found"))?;

        Ok(BlockHeader {
            number: block_number,
            timestamp: block.header.timestamp,
        })
    }

    async fn latest_block_number(&self) -> Result<u64> {
        self.with_timeout("eth_blockNumber", async {
            self.provider
                .get_block_number()
                .await
                .context("eth_blockNumber failed")
        })
        .await
    }

    async fn read_state_view(&self, pool_id: B256) -> Result<PoolState> {
        let state_view = IStateView::new(self.state_view, &self.provider);

        // Callers see one logical read; the slot0/liquidity split is internal.
        let (slot0, liquidity) = self
            .with_timeout("StateView read", async {
                let slot0_call = state_view.getSlot0(pool_id);
                let liquidity_call = state_view.getLiquidity(pool_id);
                let (slot0, liquidity) = tokio::try_join!(slot0_call.call(), liquidity_call.call())
                    .context("StateView call failed")?;
                Ok((slot0, liquidity))
            })
            .await?;

        Ok(PoolState {
            sqrt_price_x96: slot0.sqrtPriceX96.to_string(),
            tick: slot0.tick.as_i32(),
            liquidity,
        })
    }

    async fn read_fungible_meta(&self, address: Address) -> Result<FungibleMeta> {
        let token = IERC20::new(address, &self.provider);

        let (name, symbol, decimals) = self
            .with_timeout("ERC20 metadata read", async {
                let name_call = token.name();
                let symbol_call = token.symbol();
                let decimals_call = token.decimals();
                let (name, symbol, decimals) =
                    tokio::join!(name_call.call(), symbol_call.call(), decimals_call.call());
                Ok((name, symbol, decimals))
            })
            .await?;

        // Decimals is required; a token without it cannot be priced.
        let decimals = decimals.with_context(|| format!("decimals() failed for {address}"))?;
        if decimals > 24 {
            anyhow::bail!("token {address} has implausible decimals {decimals}");
        }

        Ok(FungibleMeta {
            name: name.map(|n| n.to_string()).unwrap_or_default(),
            symbol: symbol.map(|s| s.to_string()).unwrap_or_default(),
            decimals,
        })
    }
}
