//! Built-in response codes.
//!
//! Codes `0..=99` are reserved for the protocol itself; application response
//! tables must use codes outside that range.

/// Generic success.
pub const OK: i32 = 10;

/// Generic failure.  Also sent when a method handler returns without a
/// terminal reply.
pub const ERR: i32 = 20;

/// The handler failed (returned an error, panicked, or never replied to a
/// tag write).  The `reason` body field carries the diagnostic.
pub const CALLBACK_ERR: i32 = 30;

/// Highest reserved code.
pub const RESERVED_MAX: i32 = 99;

/// Body field carrying the diagnostic of `ERR` and `CALLBACK_ERR` replies.
pub const REASON_FIELD: &str = "reason";

pub fn is_reserved(code: i32) -> bool {
    (0..=RESERVED_MAX).contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_codes_are_reserved() {
        for code in [OK, ERR, CALLBACK_ERR] {
            assert!(is_reserved(code));
        }
        assert!(!is_reserved(200));
        assert!(!is_reserved(-1));
    }
}
