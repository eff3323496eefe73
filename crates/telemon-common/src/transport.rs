//! Payload encoding shared by the agent (encode) and the server (decode).
//!
//! Encoding runs JSON serialization, HMAC signing, gzip and RSA encryption
//! in that order, each step toggled by [`EncoderOptions`]. The signature is
//! always computed over the plain JSON bytes. Decoding reverses the steps.

use crate::hash;
use crate::types::{Metric, WireMetric};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// PKCS#1 v1.5 padding overhead in bytes.
const PKCS1_V15_OVERHEAD: usize = 11;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport: gzip error: {0}")]
    Compression(#[from] std::io::Error),

    /// Direct PKCS#1 v1.5 encryption cannot carry more than `max` bytes
    /// for the configured key; the payload is refused rather than split.
    #[error("Transport: payload of {len} bytes exceeds the {max}-byte RSA plaintext ceiling")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Transport: encryption failed: {0}")]
    Encryption(String),

    #[error("Transport: decryption failed: {0}")]
    Decryption(String),

    #[error("Transport: decompressed payload exceeds {limit} bytes")]
    InflatedTooLarge { limit: usize },

    #[error("Transport: signature required but missing")]
    MissingSignature,

    #[error("Transport: signature mismatch")]
    SignatureMismatch,

    #[error("Transport: invalid key: {0}")]
    InvalidKey(String),

    #[error("Transport: cannot read key file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Bytes ready to put on the wire plus the side-channel metadata the
/// receiver needs to reverse the encoding.
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    pub body: Vec<u8>,
    /// Hex HMAC of the plain JSON, when a shared key is configured.
    pub signature: Option<String>,
    /// Whether `body` (before encryption) is gzip-compressed.
    pub gzip: bool,
    pub encrypted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EncoderOptions {
    pub key: Option<Vec<u8>>,
    pub compress: bool,
    pub public_key: Option<RsaPublicKey>,
}

#[derive(Debug, Clone, Default)]
pub struct Encoder {
    opts: EncoderOptions,
}

impl Encoder {
    pub fn new(opts: EncoderOptions) -> Self {
        Self { opts }
    }

    pub fn encode_metric(&self, metric: &Metric) -> Result<EncodedPayload> {
        let json = serde_json::to_vec(&WireMetric::from(metric.clone()))?;
        self.seal(json)
    }

    pub fn encode_batch(&self, metrics: &[Metric]) -> Result<EncodedPayload> {
        let wire: Vec<WireMetric> = metrics.iter().cloned().map(WireMetric::from).collect();
        let json = serde_json::to_vec(&wire)?;
        self.seal(json)
    }

    /// Signs raw bytes without transforming them. Used for bodiless
    /// requests and gRPC calls, where only the signature travels.
    pub fn sign(&self, bytes: &[u8]) -> Option<String> {
        self.opts.key.as_deref().map(|key| hash::sign(bytes, key))
    }

    fn seal(&self, json: Vec<u8>) -> Result<EncodedPayload> {
        let signature = self.sign(&json);

        let mut body = json;
        if self.opts.compress {
            body = gzip(&body)?;
        }

        let encrypted = match &self.opts.public_key {
            Some(public_key) => {
                body = encrypt(public_key, &body)?;
                true
            }
            None => false,
        };

        Ok(EncodedPayload {
            body,
            signature,
            gzip: self.opts.compress,
            encrypted,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecoderOptions {
    pub key: Option<Vec<u8>>,
    pub private_key: Option<RsaPrivateKey>,
    /// Cap on the gunzipped size. `None` leaves inflation unbounded.
    pub max_plain_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Decoder {
    opts: DecoderOptions,
}

impl Decoder {
    pub fn new(opts: DecoderOptions) -> Self {
        Self { opts }
    }

    pub fn requires_signature(&self) -> bool {
        self.opts.key.is_some()
    }

    /// Reverses [`Encoder`]: decrypt, gunzip, then verify the signature
    /// against the plain bytes. Returns the bytes only once they are trusted.
    pub fn decode(&self, body: &[u8], gzip: bool, signature: Option<&str>) -> Result<Vec<u8>> {
        let mut plain = match &self.opts.private_key {
            Some(private_key) if !body.is_empty() => decrypt(private_key, body)?,
            _ => body.to_vec(),
        };

        if gzip && !plain.is_empty() {
            plain = match self.opts.max_plain_bytes {
                Some(limit) => gunzip_limited(&plain, limit)?,
                None => gunzip(&plain)?,
            };
        }

        if let Some(key) = self.opts.key.as_deref() {
            let tag = signature.ok_or(TransportError::MissingSignature)?;
            if !hash::verify(&plain, tag, key) {
                return Err(TransportError::SignatureMismatch);
            }
        }

        Ok(plain)
    }
}

pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Like [`gunzip`] but stops reading one byte past `limit`, so a small
/// body cannot inflate into an unbounded allocation.
pub fn gunzip_limited(data: &[u8], limit: usize) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data).take(limit as u64 + 1);
    let mut out = Vec::with_capacity(data.len().saturating_mul(2).min(limit));
    decoder.read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(TransportError::InflatedTooLarge { limit });
    }
    Ok(out)
}

/// Largest plaintext the key can encrypt in one PKCS#1 v1.5 block.
pub fn max_plaintext_len(public_key: &RsaPublicKey) -> usize {
    public_key.size().saturating_sub(PKCS1_V15_OVERHEAD)
}

pub fn encrypt(public_key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>> {
    let max = max_plaintext_len(public_key);
    if data.len() > max {
        return Err(TransportError::PayloadTooLarge {
            len: data.len(),
            max,
        });
    }
    let mut rng = rand::thread_rng();
    public_key
        .encrypt(&mut rng, Pkcs1v15Encrypt, data)
        .map_err(|e| TransportError::Encryption(e.to_string()))
}

pub fn decrypt(private_key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>> {
    private_key
        .decrypt(Pkcs1v15Encrypt, data)
        .map_err(|e| TransportError::Decryption(e.to_string()))
}

/// Loads a PEM public key in SPKI (PKCS#8) or PKCS#1 form.
pub fn load_public_key(path: &Path) -> Result<RsaPublicKey> {
    let pem = read_pem(path)?;
    RsaPublicKey::from_public_key_pem(&pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(&pem))
        .map_err(|e| TransportError::InvalidKey(format!("{}: {e}", path.display())))
}

/// Loads a PEM private key in PKCS#8 or PKCS#1 form.
pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey> {
    let pem = read_pem(path)?;
    RsaPrivateKey::from_pkcs8_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
        .map_err(|e| TransportError::InvalidKey(format!("{}: {e}", path.display())))
}

fn read_pem(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| TransportError::KeyFile {
        path: path.to_path_buf(),
        source,
    })
}
