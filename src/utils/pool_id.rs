//! Uniswap V4 pool ID utilities.

use alloy::primitives::{keccak256, Address, B256};
use alloy::sol_types::SolValue;

/// Compute the Uniswap V4 pool ID from pool parameters.
///
/// The pool ID is computed as:
/// ```text
/// keccak256(abi.encode(currency0, currency1, fee, tickSpacing, hooks))
/// ```
///
/// Where currency0 and currency1 are sorted by address (lower address first).
/// The native currency (zero address) always sorts first, so it is always
/// currency0 when paired with any non-zero address.
pub fn compute_pool_id(
    currency_a: Address,
    currency_b: Address,
    fee: u32,
    tick_spacing: i32,
    hooks: Address,
) -> B256 {
    // Lower address is currency0, matching Uniswap's sortsBefore logic.
    let (currency0, currency1) = if currency_a < currency_b {
        (currency_a, currency_b)
    } else {
        (currency_b, currency_a)
    };

    // ABI encode (address, address, uint24, int24, address) and hash.
    let encoded = (currency0, currency1, fee, tick_spacing, hooks).abi_encode();

    keccak256(&encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> Address {
        "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48".parse().unwrap()
    }

    #[test]
    fn pool_id_is_order_independent() {
        let id1 = compute_pool_id(Address::ZERO, usdc(), 3000, 60, Address::ZERO);
        let id2 = compute_pool_id(usdc(), Address::ZERO, 3000, 60, Address::ZERO);
        assert_eq!(id1, id2);
    }

    #[test]
    fn different_hooks_produce_different_ids() {
        let hook: Address = "0x1234567890abcdef1234567890abcdef12345678"
            .parse()
            .unwrap();

        let id_no_hooks = compute_pool_id(Address::ZERO, usdc(), 3000, 60, Address::ZERO);
        let id_with_hooks = compute_pool_id(Address::ZERO, usdc(), 3000, 60, hook);
        assert_ne!(id_no_hooks, id_with_hooks);
    }

    #[test]
    fn different_fee_tiers_produce_different_ids() {
        let id_30bps = compute_pool_id(Address::ZERO, usdc(), 3000, 60, Address::ZERO);
        let id_5bps = compute_pool_id(Address::ZERO, usdc(), 500, 10, Address::ZERO);
        assert_ne!(id_30bps, id_5bps);
    }

    #[test]
    fn pool_id_is_stable() {
        let id1 = compute_pool_id(Address::ZERO, usdc(), 3000, 60, Address::ZERO);
        let id2 = compute_pool_id(Address::ZERO, usdc(), 3000, 60, Address::ZERO);
        assert_eq!(id1, id2);
    }
}
