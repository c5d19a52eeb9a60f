//! Semantic currency resolution.
//!
//! A V4 currency slot holds either the zero address (the chain's native
//! currency) or an ERC-20 contract. The resolver fetches metadata lazily and
//! holds no cross-call cache; the pool processor resolves both sides of a
//! pair in parallel within one scan.

use std::sync::Arc;

use alloy::primitives::Address;
use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::exec::RetryPolicy;

use super::ChainRpc;

/// Native currency display metadata.
const NATIVE_SYMBOL: &str = "ETH";
const NATIVE_NAME: &str = "Ether";
const NATIVE_DECIMALS: u8 = 18;

/// A resolved currency: the chain's native asset or a fungible token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Currency {
    Native {
        chain_id: u64,
    },
    #[serde(rename_all = "camelCase")]
    Fungible {
        chain_id: u64,
        address: Address,
        decimals: u8,
        symbol: String,
        name: String,
    },
}

impl Currency {
    pub fn address(&self) -> Address {
        match self {
            Self::Native { .. } => Address::ZERO,
            Self::Fungible { address, .. } => *address,
        }
    }

    pub fn decimals(&self) -> u8 {
        match self {
            Self::Native { .. } => NATIVE_DECIMALS,
            Self::Fungible { decimals, .. } => *decimals,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Self::Native { .. } => NATIVE_SYMBOL,
            Self::Fungible { symbol, .. } => symbol,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Native { .. } => NATIVE_NAME,
            Self::Fungible { name, .. } => name,
        }
    }
}

/// Resolves an address to a [`Currency`] with metadata.
#[derive(Clone)]
pub struct CurrencyResolver {
    chain: Arc<dyn ChainRpc>,
    chain_id: u64,
    retry: RetryPolicy,
}

impl CurrencyResolver {
    pub fn new(chain: Arc<dyn ChainRpc>, chain_id: u64) -> Self {
        Self {
            chain,
            chain_id,
            retry: RetryPolicy::default(),
        }
    }

    pub async fn resolve(&self, address: Address) -> Result<Currency> {
        if address == Address::ZERO {
            return Ok(Currency::Native {
                chain_id: self.chain_id,
            });
        }

        let meta = self
            .retry
            .run(|| self.chain.read_fungible_meta(address))
            .await?;

        Ok(Currency::Fungible {
            chain_id: self.chain_id,
            address,
            decimals: meta.decimals,
            symbol: meta.symbol,
            name: meta.name,
        })
    }
}
