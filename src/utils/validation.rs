//! Input validation helpers for the HTTP boundary.
//!
//! Addresses are validated structurally (`0x` + 40 hex chars) and stored
//! lower-cased; identity is a wallet address asserted by the caller.

/// Maximum accepted comment length, in characters.
pub const MAX_COMMENT_LEN: usize = 500;

/// Maximum page size across list endpoints.
pub const MAX_PAGE_LIMIT: u32 = 100;

fn is_hex_address(value: &str) -> bool {
    let Some(hex) = value.strip_prefix("0x") else {
        return false;
    };
    hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit())
}

/// Validate a wallet address shape: `^0x[0-9a-fA-F]{40}$`.
pub fn is_wallet_address(value: &str) -> bool {
    is_hex_address(value)
}

/// Validate a token address shape. Same structural rule as wallets.
pub fn is_token_address(value: &str) -> bool {
    is_hex_address(value)
}

/// Lower-case an address for storage and key derivation.
pub fn normalize_address(value: &str) -> String {
    value.to_lowercase()
}

/// Validate comment content: between 1 and 500 characters.
pub fn validate_comment_content(content: &str) -> Result<(), String> {
    let len = content.chars().count();
    if len == 0 {
        return Err("content must not be empty".to_string());
    }
    if len > MAX_COMMENT_LEN {
        return Err(format!("content must be at most {MAX_COMMENT_LEN} characters"));
    }
    Ok(())
}

/// Clamp a page number to `>= 1`.
pub fn clamp_page(page: Option<u32>) -> u32 {
    page.unwrap_or(1).max(1)
}

/// Clamp a page size to `[1, 100]`, falling back to `default` when absent.
pub fn clamp_limit(limit: Option<u32>, default: u32) -> u32 {
    limit.unwrap_or(default).clamp(1, MAX_PAGE_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_addresses() {
        assert!(is_wallet_address("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"));
        assert!(is_token_address("0x0000000000000000000000000000000000000000"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!is_wallet_address("833589fcd6edb6e08f4c7c32d4f71b54bda02913"));
        assert!(!is_wallet_address("0x123"));
        assert!(!is_wallet_address("0x833589fcd6edb6e08f4c7c32d4f71b54bda0291g"));
        assert!(!is_wallet_address(""));
    }

    #[test]
    fn comment_length_boundaries() {
        assert!(validate_comment_content("").is_err());
        assert!(validate_comment_content("a").is_ok());
        assert!(validate_comment_content(&"a".repeat(500)).is_ok());
        assert!(validate_comment_content(&"a".repeat(501)).is_err());
    }

    #[test]
    fn pagination_clamps() {
        assert_eq!(clamp_page(None), 1);
        assert_eq!(clamp_page(Some(0)), 1);
        assert_eq!(clamp_page(Some(7)), 7);

        assert_eq!(clamp_limit(None, 20), 20);
        assert_eq!(clamp_limit(Some(0), 20), 1);
        assert_eq!(clamp_limit(Some(250), 20), 100);
        assert_eq!(clamp_limit(Some(50), 20), 50);
    }

    #[test]
    fn normalization_lower_cases() {
        assert_eq!(
            normalize_address("0xABCDEF0000000000000000000000000000000000"),
            "0xabcdef0000000000000000000000000000000000"
        );
    }
}
