//! Process-wide configuration loaded once at boot from the environment.
//!
//! Only the options enumerated in the specification's configuration surface are
//! recognized here. Model name, temperature, max output tokens, and LLM concurrency
//! are deliberately absent: they are compiled constants (see [`crate::worker`]) so
//! operators cannot accidentally widen the cost envelope via the environment.

use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Top-level application configuration, assembled once in [`AppConfig::from_env`].
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Postgres connection string.
    pub database_url: String,
    /// Enables the background sync-dispatcher and summarizer-worker loops in this process.
    pub worker_mode: bool,
    /// Enables the Summarizer Worker specifically (independent of sync).
    pub ai_summ_enabled: bool,
    /// Worker claim batch size.
    pub ai_jobs_batch: i64,
    /// Worker idle sleep between empty claims.
    pub ai_idle_sleep: Duration,
    /// Enables reply-chain removal in the preprocessor.
    pub strip_reply_chains: bool,
    /// Comma-separated allowlist of CORS origins.
    pub cors_allowed_origins: Vec<String>,
    /// Base URL of the LLM completion service.
    pub llm_endpoint_url: String,
    /// Bearer credential for the LLM service. Absence drives `enqueue_summary`'s `no_key` response.
    pub llm_api_key: Option<String>,
    /// Base URL of the mailbox provider adapter's HTTP backend.
    pub provider_api_base_url: String,
}

fn env_flag(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::Invalid {
                name,
                value: other.to_string(),
            }),
        },
        Err(_) => Ok(default),
    }
}

fn env_i64(name: &'static str, default: i64) -> Result<i64, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value: value.clone(),
        }),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Load configuration from the process environment, applying the defaults named in the spec.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let ai_idle_sleep_secs = env_i64("AI_IDLE_SLEEP", 5)?;

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|_| vec!["*".to_string()]);

        Ok(Self {
            database_url,
            worker_mode: env_flag("WORKER_MODE", true)?,
            ai_summ_enabled: env_flag("AI_SUMM_ENABLED", true)?,
            ai_jobs_batch: env_i64("AI_JOBS_BATCH", 5)?,
            ai_idle_sleep: Duration::from_secs(ai_idle_sleep_secs.max(0) as u64),
            strip_reply_chains: env_flag("STRIP_REPLY_CHAINS", true)?,
            cors_allowed_origins,
            llm_endpoint_url: env::var("LLM_ENDPOINT_URL")
                .unwrap_or_else(|_| "http://localhost:8081".to_string()),
            llm_api_key: env::var("LLM_API_KEY").ok().filter(|k| !k.is_empty()),
            provider_api_base_url: env::var("PROVIDER_API_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8082".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_flag_accepts_common_spellings() {
        unsafe {
            env::set_var("TEST_FLAG_TRUE", "yes");
            env::set_var("TEST_FLAG_FALSE", "0");
        }
        assert!(env_flag("TEST_FLAG_TRUE", false).unwrap());
        assert!(!env_flag("TEST_FLAG_FALSE", true).unwrap());
        unsafe {
            env::remove_var("TEST_FLAG_TRUE");
            env::remove_var("TEST_FLAG_FALSE");
        }
    }

    #[test]
    fn env_flag_rejects_garbage() {
        unsafe {
            env::set_var("TEST_FLAG_BAD", "maybe");
        }
        assert!(env_flag("TEST_FLAG_BAD", false).is_err());
        unsafe {
            env::remove_var("TEST_FLAG_BAD");
        }
    }
}
