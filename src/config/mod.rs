//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or the
//! pipeline time budget is inconsistent. Sensitive values are wrapped in
//! secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub blob_store_url: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub pipeline: PipelineSettings,
}

/// Tuning for the capture/archival pipeline.
///
/// `chunk_ttl` bounds how long chunks live in the ephemeral store;
/// `archive_delay` is how long after completion the archival job waits.
/// The delay must fit inside the TTL or archival would only ever find
/// expired chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub namespace: String,
    pub concurrency: usize,
    pub chunk_ttl: Duration,
    pub archive_delay: Duration,
    pub chunk_throttle: Duration,
    pub max_attempts: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            namespace: "chunklog".to_string(),
            concurrency: 4,
            chunk_ttl: Duration::from_secs(86_400),
            archive_delay: Duration::from_secs(60),
            chunk_throttle: Duration::ZERO,
            max_attempts: 4,
        }
    }
}

impl PipelineSettings {
    /// Reject settings that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(Error::Config("namespace must not be empty".to_string()));
        }
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if !self.chunk_ttl.is_zero() && self.archive_delay >= self.chunk_ttl {
            return Err(Error::Config(format!(
                "archive delay ({}s) must be shorter than chunk ttl ({}s)",
                self.archive_delay.as_secs(),
                self.chunk_ttl.as_secs()
            )));
        }
        Ok(())
    }

    /// Apply overrides from a TOML tuning file.
    ///
    /// ```toml
    /// [pipeline]
    /// concurrency = 8
    /// chunk_ttl_secs = 7200
    /// ```
    pub fn merge_file(mut self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let file: TuningFile = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad config file {}: {e}", path.display())))?;

        let t = file.pipeline;
        if let Some(namespace) = t.namespace {
            self.namespace = namespace;
        }
        if let Some(concurrency) = t.concurrency {
            self.concurrency = concurrency;
        }
        if let Some(secs) = t.chunk_ttl_secs {
            self.chunk_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = t.archive_delay_secs {
            self.archive_delay = Duration::from_secs(secs);
        }
        if let Some(ms) = t.chunk_throttle_ms {
            self.chunk_throttle = Duration::from_millis(ms);
        }
        if let Some(n) = t.max_attempts {
            self.max_attempts = n;
        }
        self.validate()?;
        Ok(self)
    }
}

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct TuningFile {
    #[serde(default)]
    pipeline: PipelineTuning,
}

#[derive(Debug, Default, Deserialize)]
struct PipelineTuning {
    namespace: Option<String>,
    concurrency: Option<usize>,
    chunk_ttl_secs: Option<u64>,
    archive_delay_secs: Option<u64>,
    chunk_throttle_ms: Option<u64>,
    max_attempts: Option<u32>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        let defaults = PipelineSettings::default();
        let pipeline = PipelineSettings {
            namespace: std::env::var("CHUNKLOG_NAMESPACE").unwrap_or(defaults.namespace),
            concurrency: parsed_var("CHUNKLOG_CONCURRENCY")?.unwrap_or(defaults.concurrency),
            chunk_ttl: parsed_var("CHUNK_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.chunk_ttl),
            archive_delay: parsed_var("ARCHIVE_DELAY_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.archive_delay),
            chunk_throttle: parsed_var("CHUNK_THROTTLE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.chunk_throttle),
            max_attempts: parsed_var("JOB_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
        };
        pipeline.validate()?;

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            blob_store_url: std::env::var("BLOB_STORE_URL")
                .unwrap_or_else(|_| "memory://".to_string()),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            pipeline,
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid value for {name}: {e}"))),
        Err(_) => Ok(None),
    }
}
