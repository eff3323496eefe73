use crate::config::ServerConfig;
use anyhow::Context;
use std::sync::Arc;
use telemon_common::transport::{load_private_key, Decoder, DecoderOptions};
use telemon_storage::Storage;

/// Shared by every HTTP handler, the middleware and the gRPC service.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub decoder: Arc<Decoder>,
    /// HMAC key for response signatures and gRPC metadata checks.
    pub key: Option<Arc<[u8]>>,
    pub max_body_bytes: usize,
}

impl AppState {
    /// `max_body_bytes` caps the wire body and, unless `opts` sets its own
    /// limit, the decompressed body too.
    pub fn new(storage: Arc<dyn Storage>, mut opts: DecoderOptions, max_body_bytes: usize) -> Self {
        opts.max_plain_bytes.get_or_insert(max_body_bytes);
        let key = opts.key.as_deref().map(Arc::from);
        Self {
            storage,
            decoder: Arc::new(Decoder::new(opts)),
            key,
            max_body_bytes,
        }
    }

    /// Loads the private key named by the config, if any.
    pub fn from_config(config: &ServerConfig, storage: Arc<dyn Storage>) -> anyhow::Result<Self> {
        let private_key = match &config.crypto_key {
            Some(path) => Some(
                load_private_key(path)
                    .with_context(|| format!("failed to load private key {}", path.display()))?,
            ),
            None => None,
        };
        let opts = DecoderOptions {
            key: config.key.as_ref().map(|k| k.as_bytes().to_vec()),
            private_key,
            max_plain_bytes: Some(config.max_body_bytes),
        };
        Ok(Self::new(storage, opts, config.max_body_bytes))
    }
}
