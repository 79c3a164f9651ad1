//! Scheduler configuration structures.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::{
    AppResult, Backoff, ConstantBackoff, ExponentialBackoff, NoBackoff, RetryPolicy,
    SchedulerError, TaskPolicy,
};

/// Environment variable overriding [`SchedulerConfig::concurrency_limit`].
pub const ENV_CONCURRENCY_LIMIT: &str = "SCHEDULER_CONCURRENCY_LIMIT";
/// Environment variable overriding [`SchedulerConfig::max_queue_depth`].
pub const ENV_MAX_QUEUE_DEPTH: &str = "SCHEDULER_MAX_QUEUE_DEPTH";
/// Environment variable overriding [`SchedulerConfig::default_deadline_ms`].
pub const ENV_DEFAULT_DEADLINE_MS: &str = "SCHEDULER_DEFAULT_DEADLINE_MS";
/// Environment variable enabling retries with the given attempt budget.
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "SCHEDULER_RETRY_MAX_ATTEMPTS";
/// Environment variable enabling the rate limiter with the given limit.
pub const ENV_RATE_LIMIT: &str = "SCHEDULER_RATE_LIMIT";
/// Environment variable setting the rate limiter window.
pub const ENV_RATE_INTERVAL_MS: &str = "SCHEDULER_RATE_INTERVAL_MS";

const DEFAULT_RATE_INTERVAL_MS: u64 = 1_000;

/// Delay strategy between retry attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// Retry immediately.
    #[default]
    None,
    /// Fixed delay after every failure.
    Constant {
        /// Delay in milliseconds.
        delay_ms: u64,
    },
    /// Delay growing by `multiplier` per failure, capped at `max_ms`.
    Exponential {
        /// Delay after the first failure.
        initial_ms: u64,
        /// Growth factor.
        multiplier: u32,
        /// Upper bound for any single delay.
        max_ms: u64,
    },
}

impl BackoffConfig {
    fn build(self) -> Arc<dyn Backoff> {
        match self {
            Self::None => Arc::new(NoBackoff),
            Self::Constant { delay_ms } => Arc::new(ConstantBackoff(Duration::from_millis(delay_ms))),
            Self::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => Arc::new(ExponentialBackoff {
                initial: Duration::from_millis(initial_ms),
                multiplier,
                max: Duration::from_millis(max_ms),
            }),
        }
    }
}

/// Retry budget applied by default to policy-driven submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum invocations, including the first.
    pub max_attempts: u32,
    /// Delay strategy between attempts.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

/// Sliding-window admission settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Admissions allowed per window.
    pub limit: u32,
    /// Window length in milliseconds.
    pub interval_ms: u64,
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum concurrently running tasks.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Maximum queued tasks before rejection; unbounded when absent.
    #[serde(default)]
    pub max_queue_depth: Option<usize>,
    /// Per-attempt deadline for policy-driven submissions.
    #[serde(default)]
    pub default_deadline_ms: Option<u64>,
    /// Retry budget for policy-driven submissions.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Admission limiter settings.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

fn default_concurrency_limit() -> usize {
    num_cpus::get().max(1)
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            max_queue_depth: None,
            default_deadline_ms: None,
            retry: None,
            rate_limit: None,
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// A description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency_limit == 0 {
            return Err("concurrency_limit must be greater than 0".into());
        }
        if self.max_queue_depth == Some(0) {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.default_deadline_ms == Some(0) {
            return Err("default_deadline_ms must be greater than 0".into());
        }
        if let Some(retry) = &self.retry {
            if retry.max_attempts == 0 {
                return Err("retry.max_attempts must be at least 1".into());
            }
            if let BackoffConfig::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } = retry.backoff
            {
                if multiplier == 0 {
                    return Err("retry.backoff.multiplier must be greater than 0".into());
                }
                if max_ms < initial_ms {
                    return Err("retry.backoff.max_ms must be at least initial_ms".into());
                }
            }
        }
        if let Some(rate) = &self.rate_limit {
            if rate.limit == 0 {
                return Err("rate_limit.limit must be greater than 0".into());
            }
            if rate.interval_ms == 0 {
                return Err("rate_limit.interval_ms must be greater than 0".into());
            }
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Parse failures and validation failures, as text.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the process environment, reading a `.env` file
    /// first if one exists. Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Unparseable values and validation failures.
    pub fn from_env() -> AppResult<Self> {
        // A missing .env file is not an error.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup using the
    /// `SCHEDULER_*` names.
    ///
    /// # Errors
    ///
    /// Unparseable values and validation failures.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(limit) = parse_var(&lookup, ENV_CONCURRENCY_LIMIT)? {
            cfg.concurrency_limit = limit;
        }
        cfg.max_queue_depth = parse_var(&lookup, ENV_MAX_QUEUE_DEPTH)?;
        cfg.default_deadline_ms = parse_var(&lookup, ENV_DEFAULT_DEADLINE_MS)?;
        cfg.retry = parse_var(&lookup, ENV_RETRY_MAX_ATTEMPTS)?.map(|max_attempts| RetryConfig {
            max_attempts,
            backoff: BackoffConfig::None,
        });

        let interval_ms: Option<u64> = parse_var(&lookup, ENV_RATE_INTERVAL_MS)?;
        cfg.rate_limit = match parse_var(&lookup, ENV_RATE_LIMIT)? {
            Some(limit) => Some(RateLimitConfig {
                limit,
                interval_ms: interval_ms.unwrap_or(DEFAULT_RATE_INTERVAL_MS),
            }),
            None if interval_ms.is_some() => {
                anyhow::bail!("{ENV_RATE_INTERVAL_MS} is set but {ENV_RATE_LIMIT} is not");
            }
            None => None,
        };

        cfg.validate().map_err(|e| anyhow::anyhow!("config invalid: {e}"))?;
        Ok(cfg)
    }

    /// Default per-task policy described by this configuration.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidArgument`] for a zero retry budget.
    pub fn to_policy(&self) -> Result<TaskPolicy, SchedulerError> {
        let mut policy = TaskPolicy::new();
        if let Some(ms) = self.default_deadline_ms {
            policy = policy.with_deadline(Duration::from_millis(ms));
        }
        if let Some(retry) = &self.retry {
            let retry_policy =
                RetryPolicy::new(retry.max_attempts)?.with_shared_backoff(retry.backoff.build());
            policy = policy.with_retry(retry_policy);
        }
        Ok(policy)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> AppResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{key} has invalid value `{raw}`"))
        })
        .transpose()
}
