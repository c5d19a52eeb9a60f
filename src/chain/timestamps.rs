//! Batched, memoized block-number to timestamp lookup.
//!
//! Scoped to a single scan cycle; there is no cross-cycle retention.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;

use crate::exec::{BatchExecutor, RetryPolicy};

use super::ChainRpc;

const LOOKUP_BATCH_SIZE: usize = 10;
const LOOKUP_BATCH_DELAY: Duration = Duration::from_millis(200);

pub struct BlockTimestampCache {
    chain: Arc<dyn ChainRpc>,
    retry: RetryPolicy,
    batch: BatchExecutor,
    memo: Mutex<FxHashMap<u64, u64>>,
}

impl BlockTimestampCache {
    pub fn new(chain: Arc<dyn ChainRpc>) -> Self {
        Self {
            chain,
            retry: RetryPolicy::default(),
            batch: BatchExecutor::new(LOOKUP_BATCH_SIZE, LOOKUP_BATCH_DELAY),
            memo: Mutex::new(FxHashMap::default()),
        }
    }

    /// Resolve timestamps for the given block numbers.
    ///
    /// Duplicates collapse; the result holds one entry per unique input.
    /// Within each batch of 10, header reads run concurrently under the
    /// retry executor; batches are paced 200 ms apart.
    pub async fn timestamps(&self, block_numbers: &[u64]) -> Result<FxHashMap<u64, u64>> {
        let unique: BTreeSet<u64> = block_numbers.iter().copied().collect();

        let mut result = FxHashMap::default();
        let mut missing = Vec::new();
        {
            let memo = self.memo.lock().await;
            for block in unique {
                match memo.get(&block) {
                    Some(ts) => {
                        result.insert(block, *ts);
                    },
                    None => missing.push(block),
                }
            }
        }

        if missing.is_empty() {
            return Ok(result);
        }

        let fetched = self
            .batch
            .execute(missing, |block| async move {
                self.retry
                    .run(|| self.chain.block_header(block))
                    .await
                    .map(|header| (block, header.timestamp))
            })
            .await;

        let mut memo = self.memo.lock().await;
        for entry in fetched {
            let (block, timestamp) = entry?;
            memo.insert(block, timestamp);
            result.insert(block, timestamp);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::gateway::{BlockHeader, FungibleMeta, InitializeLog, PoolState};
    use alloy::primitives::{Address, B256};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChain {
        header_calls: AtomicUsize,
    }

    #[async_trait]
    impl ChainRpc for CountingChain {
        async fn initialize_events(&self, _: u64, _: u64) -> Result<Vec<InitializeLog>> {
            unimplemented!()
        }

        async fn block_header(&self, block_number: u64) -> Result<BlockHeader> {
            self.header_calls.fetch_add(1, Ordering::SeqCst);
            Ok(BlockHeader {
                number: block_number,
                timestamp: 1_700_000_000 + block_number,
            })
        }

        async fn latest_block_number(&self) -> Result<u64> {
            unimplemented!()
        }

        async fn read_state_view(&self, _: B256) -> Result<PoolState> {
            unimplemented!()
        }

        async fn read_fungible_meta(&self, _: Address) -> Result<FungibleMeta> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn collapses_duplicates_and_memoizes() {
        let chain = Arc::new(CountingChain {
            header_calls: AtomicUsize::new(0),
        });
        let cache = BlockTimestampCache::new(chain.clone());

        let result = cache.timestamps(&[5, 5, 7, 5]).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[&5], 1_700_000_005);
        assert_eq!(result[&7], 1_700_000_007);
        assert_eq!(chain.header_calls.load(Ordering::SeqCst), 2);

        // Second lookup for the same blocks hits the memo.
        let again = cache.timestamps(&[5, 7]).await.unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(chain.header_calls.load(Ordering::SeqCst), 2);
    }
}
