// src/connectors/signature.rs
use crate::connectors::error::KrakenError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

type HmacSha512 = Hmac<Sha512>;

pub const NONCE_FIELD: &str = "nonce";

/// Computes the `API-Sign` header value for a private call.
///
/// `params` is form-encoded in the given order; the `nonce` entry's raw value is
/// prepended to that body and hashed with SHA-256. The HMAC-SHA512 (keyed by the
/// decoded secret) covers the path bytes followed by the raw digest bytes.
///
/// Pure: no clock, no I/O. Callers are responsible for supplying a fresh nonce;
/// `params` without a `nonce` entry is rejected with `MissingNonce`.
pub fn sign(path: &str, params: &[(String, String)], secret: &[u8]) -> Result<String, KrakenError> {
    let body = serde_urlencoded::to_string(params)?;
    let nonce = params
        .iter()
        .find(|(key, _)| key == NONCE_FIELD)
        .map(|(_, value)| value.as_str())
        .ok_or(KrakenError::MissingNonce)?;

    let mut hasher = Sha256::new();
    hasher.update(nonce.as_bytes());
    hasher.update(body.as_bytes());
    let digest = hasher.finalize();

    let mut mac = HmacSha512::new_from_slice(secret)
        .map_err(|e| KrakenError::InvalidSecret(e.to_string()))?;
    mac.update(path.as_bytes());
    mac.update(&digest);

    Ok(BASE64.encode(mac.finalize().into_bytes()))
}
