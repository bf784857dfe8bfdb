//! Process configuration read from environment variables.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::enrichment::EnrichmentConfig;
use crate::generation::GenerationConfig;
use crate::jobs::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Postgres store when set, in-memory store otherwise.
    pub database_url: Option<String>,
    pub ai_gateway_url: String,
    pub ai_gateway_timeout: Duration,
    pub image_store_dir: PathBuf,
    pub image_public_base_url: String,
    pub enrichment_concurrency: usize,
    pub progress_interval: Duration,
    pub enrichment_max_attempts: u32,
    pub enrichment_retry_base: Duration,
    pub sse_keepalive: Duration,
    pub min_context_rows: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source (the process env in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let enrichment_concurrency: usize = parse(&var, "ENRICHMENT_CONCURRENCY", 5)?;
        if enrichment_concurrency == 0 {
            return Err(ConfigError::Invalid {
                var: "ENRICHMENT_CONCURRENCY",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        let enrichment_max_attempts: u32 = parse(&var, "ENRICHMENT_MAX_ATTEMPTS", 3)?;
        if enrichment_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "ENRICHMENT_MAX_ATTEMPTS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            bind_addr: parse(&var, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            database_url: var("DATABASE_URL"),
            ai_gateway_url: var("AI_GATEWAY_URL").unwrap_or_else(|| "http://localhost:8090".into()),
            ai_gateway_timeout: Duration::from_secs(parse(&var, "AI_GATEWAY_TIMEOUT_SECS", 120)?),
            image_store_dir: var("IMAGE_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/images")),
            image_public_base_url: var("IMAGE_PUBLIC_BASE_URL").unwrap_or_else(|| "/images".into()),
            enrichment_concurrency,
            progress_interval: Duration::from_millis(parse(&var, "ENRICHMENT_PROGRESS_INTERVAL_MS", 500)?),
            enrichment_max_attempts,
            enrichment_retry_base: Duration::from_millis(parse(&var, "ENRICHMENT_RETRY_BASE_MS", 1000)?),
            sse_keepalive: Duration::from_secs(parse(&var, "SSE_KEEPALIVE_SECS", 30)?),
            min_context_rows: parse(&var, "MIN_CONTEXT_ROWS", 2)?,
        })
    }

    /// Convenience for tests: build from literal pairs.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Result<Self, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::from_lookup(|name| map.get(name).cloned())
    }

    pub fn enrichment(&self) -> EnrichmentConfig {
        EnrichmentConfig {
            concurrency: self.enrichment_concurrency,
            retry: RetryPolicy::linear(self.enrichment_max_attempts, self.enrichment_retry_base),
            progress_interval: self.progress_interval,
        }
    }

    pub fn generation(&self) -> GenerationConfig {
        GenerationConfig {
            min_context_rows: self.min_context_rows,
            ..GenerationConfig::default()
        }
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var: name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
