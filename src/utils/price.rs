//! Price conversion utilities for Uniswap V4 pools.
//!
//! Converts sqrtPriceX96 values into decimal-adjusted prices and formats
//! them for display.

use bigdecimal::BigDecimal;
use num_bigint::{BigInt, Sign};
use num_traits::ToPrimitive;
use once_cell::sync::Lazy;
use std::str::FromStr;

/// Upper bound on a sane price ratio. Values beyond this are artifacts of
/// bogus pool state (dust liquidity, decimal bombs) and are rejected.
const MAX_PRICE_RATIO: f64 = 1e30;

static POW10_CACHE: Lazy<[BigDecimal; 25]> =
    Lazy::new(|| std::array::from_fn(|i| BigDecimal::from(BigInt::from(10u32).pow(i as u32))));

fn big_pow10(exp: u32) -> BigDecimal {
    if (exp as usize) < POW10_CACHE.len() {
        POW10_CACHE[exp as usize].clone()
    } else {
        BigDecimal::from(BigInt::from(10u32).pow(exp))
    }
}

fn validate_price_ratio(price: f64) -> Option<f64> {
    if price.is_finite() && price > 0.0 && price < MAX_PRICE_RATIO {
        Some(price)
    } else {
        None
    }
}

/// Convert a sqrtPriceX96 string to the decimal-adjusted price of currency0
/// denominated in currency1.
///
/// The string form preserves the full precision of the original uint160;
/// BigDecimal math avoids the f64 rounding that a direct conversion incurs.
///
/// ```text
/// price = (sqrtPriceX96 / 2^96)^2 * 10^(decimals0 - decimals1)
/// ```
pub fn sqrt_price_x96_to_price(
    sqrt_price_x96: &str,
    token0_decimals: u8,
    token1_decimals: u8,
) -> Option<f64> {
    if token0_decimals > 24 || token1_decimals > 24 {
        return None;
    }

    let sqrt_price = BigDecimal::from_str(sqrt_price_x96).ok()?;
    if sqrt_price.sign() != Sign::Plus {
        return None;
    }

    // Q96 = 2^96 (exact)
    let q96 = BigDecimal::from_str("79228162514264337593543950336").ok()?;

    let normalized = &sqrt_price / &q96;
    let raw_price = &normalized * &normalized;

    let decimal_diff = token0_decimals as i32 - token1_decimals as i32;
    let adjusted = if decimal_diff >= 0 {
        raw_price * big_pow10(decimal_diff as u32)
    } else {
        raw_price / big_pow10((-decimal_diff) as u32)
    };

    let adjusted_f64 = adjusted.to_f64()?;
    validate_price_ratio(adjusted_f64)
}

/// Both price directions for a pool, decimal-adjusted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePair {
    /// Price of currency0 denominated in currency1.
    pub price0_in_1: f64,
    /// Price of currency1 denominated in currency0.
    pub price1_in_0: f64,
}

impl PricePair {
    pub fn from_sqrt_price_x96(
        sqrt_price_x96: &str,
        token0_decimals: u8,
        token1_decimals: u8,
    ) -> Option<Self> {
        let price0_in_1 = sqrt_price_x96_to_price(sqrt_price_x96, token0_decimals, token1_decimals)?;
        let price1_in_0 = validate_price_ratio(1.0 / price0_in_1)?;

        Some(Self {
            price0_in_1,
            price1_in_0,
        })
    }
}

/// Format a price for display: rounded to 6 significant digits and rendered
/// with 6 decimal places (`0.0005` -> `"0.000500"`).
pub fn format_human_price(price: f64) -> String {
    if !price.is_finite() || price <= 0.0 {
        return "0.000000".to_string();
    }

    let exponent = price.abs().log10().floor() as i32;
    let factor = 10f64.powi(5 - exponent);
    let rounded = if factor.is_finite() && factor > 0.0 {
        (price * factor).round() / factor
    } else {
        price
    };

    format!("{rounded:.6}")
}

#[cfg(test)]
mod tests {
    use super::*;

    // sqrt(0.0005) * 2^96 for equal-decimals tokens.
    const SQRT_PRICE_0_0005: &str = "1771595571142957102961017161";

    #[test]
    fn converts_known_sqrt_price() {
        let price = sqrt_price_x96_to_price(SQRT_PRICE_0_0005, 18, 18).unwrap();
        assert!((price - 0.0005).abs() < 1e-9);
    }

    #[test]
    fn unit_price_round_trips() {
        // sqrtPriceX96 == 2^96 means a 1:1 price.
        let price = sqrt_price_x96_to_price("79228162514264337593543950336", 18, 18).unwrap();
        assert!((price - 1.0).abs() < 1e-12);
    }

    #[test]
    fn decimal_adjustment_applies() {
        // 1:1 raw price, 6-decimals token0 vs 18-decimals token1.
        let price = sqrt_price_x96_to_price("79228162514264337593543950336", 6, 18).unwrap();
        assert!((price - 1e-12).abs() < 1e-24);
    }

    #[test]
    fn rejects_zero_and_garbage() {
        assert!(sqrt_price_x96_to_price("0", 18, 18).is_none());
        assert!(sqrt_price_x96_to_price("not-a-number", 18, 18).is_none());
        assert!(sqrt_price_x96_to_price(SQRT_PRICE_0_0005, 25, 18).is_none());
    }

    #[test]
    fn price_pair_directions_are_reciprocal() {
        let pair = PricePair::from_sqrt_price_x96(SQRT_PRICE_0_0005, 18, 18).unwrap();
        assert!((pair.price0_in_1 * pair.price1_in_0 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn formats_six_decimal_places() {
        assert_eq!(format_human_price(0.0005), "0.000500");
        assert_eq!(format_human_price(1.0), "1.000000");
        assert_eq!(format_human_price(0.0), "0.000000");
        assert_eq!(format_human_price(f64::NAN), "0.000000");
    }

    #[test]
    fn rounds_to_six_significant_digits() {
        assert_eq!(format_human_price(0.000123456789), "0.000123");
        assert_eq!(format_human_price(1234.56789), "1234.570000");
    }
}
