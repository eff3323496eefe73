//! HMAC-SHA256 signatures over serialized payloads.
//!
//! The tag is hex-encoded and travels next to the payload (the
//! [`HASH_HEADER`] HTTP header or the [`HASH_METADATA`] gRPC metadata key),
//! never inside it.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HTTP header carrying the hex signature of the uncompressed body.
pub const HASH_HEADER: &str = "HashSHA256";

/// gRPC metadata key carrying the same signature (metadata keys are lowercase).
pub const HASH_METADATA: &str = "hashsha256";

/// Computes the hex-encoded HMAC-SHA256 of `msg` under `key`.
///
/// # Examples
///
/// ```
/// use telemon_common::hash::{sign, verify};
///
/// let tag = sign(b"payload", b"secret");
/// assert_eq!(tag.len(), 64);
/// assert!(verify(b"payload", &tag, b"secret"));
/// assert!(!verify(b"payload", &tag, b"other"));
/// ```
pub fn sign(msg: &[u8], key: &[u8]) -> String {
    hex::encode(mac_for(msg, key).finalize().into_bytes())
}

/// Verifies a hex-encoded tag in constant time. Malformed hex never verifies.
pub fn verify(msg: &[u8], tag_hex: &str, key: &[u8]) -> bool {
    let Ok(tag) = hex::decode(tag_hex.trim()) else {
        return false;
    };
    mac_for(msg, key).verify_slice(&tag).is_ok()
}

fn mac_for(msg: &[u8], key: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length; oversized keys are hashed first.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(msg);
    mac
}
