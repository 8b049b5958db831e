//! GitHub webhook signature verification.
//!
//! GitHub signs every delivery with HMAC-SHA256 over the raw request body and
//! sends the result in `X-Hub-Signature-256` as `sha256=<hex>`. Verification
//! must run on the untouched bytes, before any JSON decoding.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Length of a hex-encoded SHA-256 digest.
const SIGNATURE_HEX_LEN: usize = 64;

/// Verify a `sha256=<hex>` signature header against the raw payload.
///
/// Fails closed: a missing prefix, a digest of the wrong length, invalid hex
/// or a mismatch all return `false`. The digest comparison is constant-time.
pub fn verify_github_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };

    if signature_hex.len() != SIGNATURE_HEX_LEN {
        return false;
    }

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    mac.verify_slice(&signature_bytes).is_ok()
}

/// Compute the raw HMAC-SHA256 digest of a payload.
pub fn compute_signature(secret: &str, payload: &[u8]) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Format a digest the way GitHub sends it.
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(signature))
}

/// Convenience for tests and tooling: sign a payload and format the header.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    format_signature_header(&compute_signature(secret, payload))
}
