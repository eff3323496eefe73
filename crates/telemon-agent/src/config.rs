use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use telemon_common::transport::{load_public_key, Encoder, EncoderOptions};

/// How reports travel to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// `POST /update/{kind}/{name}/{value}`, one request per metric.
    Path,
    /// `POST /update/` with one JSON metric per request.
    Json,
    /// `POST /updates/` with the whole report as a JSON array.
    Batch,
    /// `AddGaugeMetric` / `AddCounterMetric` calls.
    Grpc,
}

impl WireFormat {
    /// Whether a report is queued as one job rather than one job per metric.
    pub fn batches(&self) -> bool {
        matches!(self, WireFormat::Batch)
    }
}

impl FromStr for WireFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "path" => Ok(WireFormat::Path),
            "json" => Ok(WireFormat::Json),
            "batch" => Ok(WireFormat::Batch),
            "grpc" => Ok(WireFormat::Grpc),
            other => anyhow::bail!("unknown wire format '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_server_endpoint")]
    pub server_endpoint: String,
    /// gRPC listener of the server, used with `wire_format = "grpc"`.
    #[serde(default = "default_grpc_endpoint")]
    pub grpc_endpoint: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    /// Number of delivery workers.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Shared HMAC key; when set every payload is signed.
    pub key: Option<String>,
    /// Path to the server's RSA public key (PEM).
    pub crypto_key: Option<PathBuf>,
    #[serde(default = "default_compress")]
    pub compress: bool,
    #[serde(default = "default_wire_format")]
    pub wire_format: WireFormat,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_server_endpoint() -> String {
    "localhost:8080".to_string()
}

fn default_grpc_endpoint() -> String {
    "localhost:3200".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_rate_limit() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    64
}

fn default_compress() -> bool {
    true
}

fn default_wire_format() -> WireFormat {
    WireFormat::Batch
}

fn default_request_timeout() -> u64 {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_endpoint: default_server_endpoint(),
            grpc_endpoint: default_grpc_endpoint(),
            poll_interval_secs: default_poll_interval(),
            report_interval_secs: default_report_interval(),
            rate_limit: default_rate_limit(),
            queue_capacity: default_queue_capacity(),
            key: None,
            crypto_key: None,
            compress: default_compress(),
            wire_format: default_wire_format(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn parse_var<T>(name: &str, raw: String) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid value for {name}: {e}"))
}

fn non_empty(v: String) -> Option<String> {
    (!v.trim().is_empty()).then_some(v)
}

fn with_scheme(endpoint: &str) -> String {
    let addr = endpoint.trim().trim_end_matches('/');
    if addr.contains("://") {
        return addr.to_string();
    }
    format!("http://{addr}")
}

impl AgentConfig {
    /// Reads the TOML file (a missing file yields the defaults), then
    /// applies environment overrides.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read agent config {path}"))?;
            toml::from_str(&content).with_context(|| format!("invalid agent config {path}"))?
        } else {
            tracing::info!(path, "Agent config not found, using defaults");
            Self::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `ADDRESS`, `KEY`, `CRYPTO_KEY`, `RATE_LIMIT`, `POLL_INTERVAL`,
    /// `REPORT_INTERVAL` and `WIRE_FORMAT` from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ADDRESS") {
            self.server_endpoint = v;
        }
        if let Some(v) = lookup("KEY") {
            self.key = non_empty(v);
        }
        if let Some(v) = lookup("CRYPTO_KEY") {
            self.crypto_key = non_empty(v).map(PathBuf::from);
        }
        if let Some(v) = lookup("RATE_LIMIT") {
            self.rate_limit = parse_var("RATE_LIMIT", v)?;
        }
        if let Some(v) = lookup("POLL_INTERVAL") {
            self.poll_interval_secs = parse_var("POLL_INTERVAL", v)?;
        }
        if let Some(v) = lookup("REPORT_INTERVAL") {
            self.report_interval_secs = parse_var("REPORT_INTERVAL", v)?;
        }
        if let Some(v) = lookup("WIRE_FORMAT") {
            self.wire_format = parse_var("WIRE_FORMAT", v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.rate_limit > 0, "rate_limit must be at least 1");
        anyhow::ensure!(self.queue_capacity > 0, "queue_capacity must be at least 1");
        anyhow::ensure!(self.poll_interval_secs > 0, "poll_interval_secs must be positive");
        anyhow::ensure!(
            self.report_interval_secs > 0,
            "report_interval_secs must be positive"
        );
        Ok(())
    }

    /// HTTP base URL, adding `http://` when the endpoint has no scheme.
    pub fn base_url(&self) -> String {
        with_scheme(&self.server_endpoint)
    }

    pub fn grpc_url(&self) -> String {
        with_scheme(&self.grpc_endpoint)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Builds the payload encoder, loading the public key when configured.
    pub fn encoder(&self) -> anyhow::Result<Encoder> {
        let public_key = match &self.crypto_key {
            Some(path) => Some(
                load_public_key(path)
                    .with_context(|| format!("failed to load public key {}", path.display()))?,
            ),
            None => None,
        };
        Ok(Encoder::new(EncoderOptions {
            key: self.key.as_ref().map(|k| k.as_bytes().to_vec()),
            compress: self.compress,
            public_key,
        }))
    }
}
