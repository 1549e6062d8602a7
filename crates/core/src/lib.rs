pub mod config;
pub mod signing;
pub mod types;

/// Headers carried by every outbound webhook request.
pub mod headers {
    pub const EVENT: &str = "X-Quill-Event";
    pub const DELIVERY: &str = "X-Quill-Delivery";
    pub const SIGNATURE: &str = "X-Quill-Signature";
    pub const TIMESTAMP: &str = "X-Quill-Timestamp";
}

/// Upper bound on rows returned by the recent-deliveries read interface.
pub const RECENT_DELIVERIES_LIMIT: i64 = 50;

/// Batch size used by the on-demand trigger when the caller omits `limit`.
pub const DEFAULT_TRIGGER_LIMIT: i64 = 10;

/// Attempts a delivery gets when neither the producer nor the
/// configuration says otherwise.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

pub const DELIVERY_ID_PREFIX: &str = "dlv_";

/// Generate a new delivery identifier.
pub fn new_delivery_id() -> String {
    format!("{}{}", DELIVERY_ID_PREFIX, nanoid::nanoid!(16))
}

/// Generate an opaque token identifying one claim of a delivery.
pub fn new_claim_token() -> String {
    format!("clm_{}", nanoid::nanoid!(21))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_id_format() {
        let id = new_delivery_id();
        assert!(id.starts_with("dlv_"));
        assert_eq!(id.len(), 4 + 16);
    }

    #[test]
    fn test_claim_tokens_are_unique() {
        assert_ne!(new_claim_token(), new_claim_token());
    }
}
