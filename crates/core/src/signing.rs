//! Webhook payload signing and receiver-side verification.
//!
//! The signed string is `"{timestamp}.{canonical_json(payload)}"`. Both sides
//! must serialize the payload with [`canonical_json`]; the dispatcher sends that
//! exact string as the request body.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Replay window accepted by [`verify`] when the receiver has no preference.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Serialize `value` as compact JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Sign a payload with HMAC-SHA256.
pub fn sign(secret: &str, payload: &Value, timestamp: i64) -> String {
    sign_body(secret, &canonical_json(payload), timestamp)
}

/// Sign an already-canonical body.
pub fn sign_body(secret: &str, body: &str, timestamp: i64) -> String {
    let data = format!("{}.{}", timestamp, body);
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
    };
    mac.update(data.as_bytes());
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

/// Check a signature received with a webhook against the current clock.
pub fn verify(
    signature: &str,
    secret: &str,
    payload: &Value,
    timestamp: i64,
    tolerance_secs: i64,
) -> bool {
    verify_at(signature, secret, payload, timestamp, tolerance_secs, Utc::now().timestamp())
}

/// [`verify`] with an explicit clock reading in unix seconds.
pub fn verify_at(
    signature: &str,
    secret: &str,
    payload: &Value,
    timestamp: i64,
    tolerance_secs: i64,
    now: i64,
) -> bool {
    if !signature.starts_with(SIGNATURE_PREFIX) {
        return false;
    }

    let skew = match now.checked_sub(timestamp) {
        Some(delta) => delta.checked_abs(),
        None => None,
    };
    match skew {
        Some(skew) if skew <= tolerance_secs.max(0) => {}
        _ => return false,
    }

    let expected = sign(secret, payload, timestamp);
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

/// Compare a configured token with one presented by a caller.
pub fn tokens_match(expected: &str, provided: &str) -> bool {
    !expected.is_empty() && constant_time_eq(expected.as_bytes(), provided.as_bytes())
}

// Lengths are public for hex digests and tokens; only content is compared in constant time.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
