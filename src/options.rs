use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{ApiError, Result};

/// Resolves the API base URL at request time.
///
/// Platform code implements this when the URL is not known at startup
/// (e.g. it is read from device settings).
#[async_trait]
pub trait BaseUrlResolver: Send + Sync {
    /// Returns the base URL, e.g. `https://ztp.example.net/api`.
    async fn resolve(&self) -> Result<String>;
}

/// Where requests are sent.
#[derive(Clone)]
pub enum BaseUrl {
    /// A base URL known up front.
    Fixed(String),
    /// A base URL looked up for every logical call.
    Resolver(Arc<dyn BaseUrlResolver>),
}

impl BaseUrl {
    pub(crate) async fn resolve(&self) -> Result<String> {
        let url = match self {
            Self::Fixed(url) => url.clone(),
            Self::Resolver(resolver) => resolver.resolve().await?,
        };
        Ok(url.trim_end_matches('/').to_owned())
    }
}

impl Default for BaseUrl {
    fn default() -> Self {
        Self::Fixed(String::new())
    }
}

impl fmt::Debug for BaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(url) => f.debug_tuple("Fixed").field(url).finish(),
            Self::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

impl From<&str> for BaseUrl {
    fn from(value: &str) -> Self {
        Self::Fixed(value.to_owned())
    }
}

impl From<String> for BaseUrl {
    fn from(value: String) -> Self {
        Self::Fixed(value)
    }
}

/// Configures URL resolution, timeouts, retry and bookkeeping behavior.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Base URL prepended to every request path.
    pub base_url: BaseUrl,
    /// HTTP client override. A default client is built when `None`.
    pub http_client: Option<reqwest::Client>,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Base retry backoff in milliseconds (jittered exponential strategy).
    pub retry_backoff_ms: u64,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Reads of the same URL started within this window share one call.
    pub dedup_window_ms: u64,
    /// Pending reads older than this are dropped by the sweep.
    pub pending_ttl_ms: u64,
    /// Interval of the background sweep of pending reads.
    pub sweep_interval_ms: u64,
    /// Number of calls kept in the history log.
    pub history_capacity: usize,
    /// Attach an `Idempotency-Key` header to mutations.
    pub idempotency_keys: bool,
    /// Hard bound on the connectivity probe.
    pub probe_timeout_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: BaseUrl::default(),
            http_client: None,
            max_retries: 3,
            retry_backoff_ms: 1_000,
            timeout_ms: 30_000,
            dedup_window_ms: 100,
            pending_ttl_ms: 5_000,
            sweep_interval_ms: 10_000,
            history_capacity: 100,
            idempotency_keys: false,
            probe_timeout_ms: 5_000,
        }
    }
}

impl ClientOptions {
    /// Creates options for a fixed base URL with every other value defaulted.
    pub fn new(base_url: impl Into<BaseUrl>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Creates options from environment variables.
    ///
    /// Reads:
    /// - `ZTP_API_URL`: API base URL (required)
    /// - `ZTP_MAX_RETRIES`: retries after the first attempt (optional)
    /// - `ZTP_RETRY_DELAY_MS`: base backoff delay (optional)
    /// - `ZTP_TIMEOUT_MS`: per-attempt timeout (optional)
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("ZTP_API_URL").map_err(|_| {
            ApiError::Config("missing ZTP_API_URL environment variable".to_owned())
        })?;
        if url.trim().is_empty() {
            return Err(ApiError::Config("ZTP_API_URL is set but empty".to_owned()));
        }

        let mut options = Self::new(url.trim());
        if let Some(value) = env_number("ZTP_MAX_RETRIES")? {
            options.max_retries = value as usize;
        }
        if let Some(value) = env_number("ZTP_RETRY_DELAY_MS")? {
            options.retry_backoff_ms = value;
        }
        if let Some(value) = env_number("ZTP_TIMEOUT_MS")? {
            options.timeout_ms = value;
        }
        Ok(options)
    }

    /// Uses a resolver instead of a fixed base URL.
    pub fn with_resolver(mut self, resolver: Arc<dyn BaseUrlResolver>) -> Self {
        self.base_url = BaseUrl::Resolver(resolver);
        self
    }

    /// Uses the given `reqwest::Client` for every call.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, max_retries: usize, retry_backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_ms = retry_backoff_ms;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_idempotency_keys(mut self, enabled: bool) -> Self {
        self.idempotency_keys = enabled;
        self
    }

    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub(crate) fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub(crate) fn pending_ttl(&self) -> Duration {
        Duration::from_millis(self.pending_ttl_ms)
    }

    pub(crate) fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub(crate) fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

fn env_number(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|err| ApiError::Config(format!("invalid {name} value '{raw}': {err}"))),
        Err(_) => Ok(None),
    }
}
