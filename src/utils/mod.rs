//! Utility functions for the Tidepool backend.
//!
//! This module is organized into focused submodules:
//!
//! - [`pool_id`] - Uniswap V4 pool ID computation
//! - [`price`] - Price conversion utilities (sqrtPriceX96, human formatting)
//! - [`validation`] - Request input validation helpers

mod pool_id;
mod price;
mod validation;

pub use pool_id::compute_pool_id;
pub use price::{format_human_price, sqrt_price_x96_to_price, PricePair};
pub use validation::{
    clamp_limit, clamp_page, is_token_address, is_wallet_address, normalize_address,
    validate_comment_content,
};
