//! HMAC-SHA256 delivery signatures.
//!
//! The signature covers the exact body bytes that go on the wire. Receivers
//! recompute it over the raw request body (never a re-serialized copy).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Scheme prefix of the `X-Webhook-Signature` header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("signing key rejected: {0}")]
pub struct SignatureError(String);

fn keyed(secret: &str) -> Result<HmacSha256, SignatureError> {
    <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()).map_err(|e| SignatureError(e.to_string()))
}

/// Lower-case hex HMAC-SHA256 of `payload` under `secret`.
pub fn sign(secret: &str, payload: &[u8]) -> Result<String, SignatureError> {
    let mut mac = keyed(secret)?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature.
pub fn verify(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = keyed(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// `sha256=<hex>`, the value of `X-Webhook-Signature`.
pub fn signature_header(secret: &str, payload: &[u8]) -> Result<String, SignatureError> {
    Ok(format!("{SIGNATURE_PREFIX}{}", sign(secret, payload)?))
}

/// Verify an `X-Webhook-Signature` header value.
pub fn verify_header(secret: &str, payload: &[u8], header: &str) -> bool {
    header
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .is_some_and(|hex| verify(secret, payload, hex))
}
