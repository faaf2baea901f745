//! Provider signature verification.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac-sha256>`, where the MAC
//! covers `"<t>.<raw body>"`. Several `v1` entries may be present during a
//! secret rotation; any one matching is enough.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("no webhook secret configured")]
    MissingSecret,

    #[error("malformed signature header")]
    MalformedHeader,

    #[error("signature timestamp {timestamp} outside tolerance of {tolerance}s")]
    Stale { timestamp: i64, tolerance: u64 },

    #[error("no signature matches the payload")]
    Mismatch,
}

/// Check `header` against `body` signed with `secret`, at time `now`.
pub fn verify_signature(
    body: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::MissingSecret);
    }
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(
                    value
                        .parse::<i64>()
                        .map_err(|_| SignatureError::MalformedHeader)?,
                )
            }
            Some(("v1", value)) => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(SignatureError::MalformedHeader);
    }

    if now.abs_diff(timestamp) > tolerance_secs {
        return Err(SignatureError::Stale {
            timestamp,
            tolerance: tolerance_secs,
        });
    }

    let mac = keyed(secret, timestamp, body)?;
    if signatures
        .iter()
        .any(|candidate| mac.clone().verify_slice(candidate).is_ok())
    {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Produce a header accepted by [`verify_signature`].
pub fn sign(body: &[u8], secret: &str, timestamp: i64) -> Result<String, SignatureError> {
    let signature = keyed(secret, timestamp, body)?.finalize().into_bytes();
    Ok(format!("t={timestamp},v1={}", hex::encode(signature)))
}

fn keyed(secret: &str, timestamp: i64, body: &[u8]) -> Result<HmacSha256, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::MissingSecret);
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::MissingSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}
