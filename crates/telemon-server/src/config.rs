use anyhow::Context;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_grpc_address")]
    pub grpc_address: String,
    /// Seconds between snapshots of the in-process store; 0 saves after
    /// every accepted update instead.
    #[serde(default = "default_store_interval_secs")]
    pub store_interval_secs: u64,
    #[serde(default = "default_file_storage_path")]
    pub file_storage_path: PathBuf,
    /// Load `file_storage_path` into the in-process store at startup.
    #[serde(default = "default_restore")]
    pub restore: bool,
    /// Relational backend URL. When set, snapshots are not used.
    pub database_dsn: Option<String>,
    /// Shared HMAC key for request verification and response signing.
    pub key: Option<String>,
    /// Path to the RSA private key (PEM) used to decrypt request bodies.
    pub crypto_key: Option<PathBuf>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_grpc_address() -> String {
    "0.0.0.0:3200".to_string()
}

fn default_store_interval_secs() -> u64 {
    300
}

fn default_file_storage_path() -> PathBuf {
    PathBuf::from("/tmp/metrics-db.json")
}

fn default_restore() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            grpc_address: default_grpc_address(),
            store_interval_secs: default_store_interval_secs(),
            file_storage_path: default_file_storage_path(),
            restore: default_restore(),
            database_dsn: None,
            key: None,
            crypto_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
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

impl ServerConfig {
    /// Reads the TOML file (a missing file yields the defaults), then
    /// applies environment overrides.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read server config {path}"))?;
            toml::from_str(&content).with_context(|| format!("invalid server config {path}"))?
        } else {
            tracing::info!(path, "Server config not found, using defaults");
            Self::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ADDRESS") {
            self.address = v;
        }
        if let Some(v) = lookup("GRPC_ADDRESS") {
            self.grpc_address = v;
        }
        if let Some(v) = lookup("STORE_INTERVAL") {
            self.store_interval_secs = parse_var("STORE_INTERVAL", v)?;
        }
        if let Some(v) = lookup("FILE_STORAGE_PATH") {
            self.file_storage_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("RESTORE") {
            self.restore = parse_var("RESTORE", v)?;
        }
        if let Some(v) = lookup("DATABASE_DSN") {
            self.database_dsn = non_empty(v);
        }
        if let Some(v) = lookup("KEY") {
            self.key = non_empty(v);
        }
        if let Some(v) = lookup("CRYPTO_KEY") {
            self.crypto_key = non_empty(v).map(PathBuf::from);
        }
        Ok(())
    }

    pub fn http_addr(&self) -> anyhow::Result<SocketAddr> {
        self.address
            .parse()
            .with_context(|| format!("invalid HTTP address '{}'", self.address))
    }

    pub fn grpc_addr(&self) -> anyhow::Result<SocketAddr> {
        self.grpc_address
            .parse()
            .with_context(|| format!("invalid gRPC address '{}'", self.grpc_address))
    }

    pub fn store_interval(&self) -> Duration {
        Duration::from_secs(self.store_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// DSN with the password replaced, for logs.
    pub fn redacted_dsn(&self) -> Option<String> {
        self.database_dsn.as_deref().map(redact_dsn)
    }
}

fn redact_dsn(dsn: &str) -> String {
    let Some((scheme, rest)) = dsn.split_once("://") else {
        return dsn.to_string();
    };
    let Some((userinfo, host)) = rest.split_once('@') else {
        return dsn.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => dsn.to_string(),
    }
}
