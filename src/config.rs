use crate::{classify::DEFAULT_MASTER_TAINT_KEYS, Error, Result};
use std::{collections::BTreeSet, time::Duration};

const MASTER_TAINT_KEYS_ENV: &str = "MASTER_TAINT_KEYS";
const CALL_TIMEOUT_ENV: &str = "NODE_CALL_TIMEOUT_SECS";
const CONCURRENCY_ENV: &str = "NODE_RECONCILE_CONCURRENCY";

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONCURRENCY: usize = 8;

/// Settings handed to the reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Taint keys that classify a node as control-plane
    pub master_taint_keys: BTreeSet<String>,
    /// Upper bound for every single remote call
    pub call_timeout: Duration,
    /// Nodes processed at the same time within one batch
    pub concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            master_taint_keys: DEFAULT_MASTER_TAINT_KEYS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl Config {
    /// Read overrides from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        let keys: BTreeSet<String> = lookup(MASTER_TAINT_KEYS_ENV)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if !keys.is_empty() {
            config.master_taint_keys = keys;
        }

        if let Some(raw) = lookup(CALL_TIMEOUT_ENV) {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("{CALL_TIMEOUT_ENV}={raw}: {e}")))?;
            if secs == 0 {
                return Err(Error::Config(format!("{CALL_TIMEOUT_ENV} must be at least 1")));
            }
            config.call_timeout = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup(CONCURRENCY_ENV) {
            let concurrency: usize = raw
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("{CONCURRENCY_ENV}={raw}: {e}")))?;
            if concurrency == 0 {
                return Err(Error::Config(format!("{CONCURRENCY_ENV} must be at least 1")));
            }
            config.concurrency = concurrency;
        }

        Ok(config)
    }

    pub fn with_master_taint_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.master_taint_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}
