//! Per-call configuration and credential resolution.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{AthenaError, Result};

/// Shape in which a completed query's results are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultFormat {
    /// Decoded rows from `GetQueryResults`.
    #[default]
    Inline,
    /// The CSV file the engine writes at the result location.
    Delimited,
    /// Newline-delimited JSON objects written by an `UNLOAD` directive.
    Records,
    /// Parquet partitions written by an `UNLOAD` directive.
    Columnar,
}

/// Options for one query call.
///
/// # Example
///
/// ```rust
/// use athena_sql_client::{QueryConfig, ResultFormat};
///
/// let config = QueryConfig::default()
///     .with_database("analytics")
///     .with_workgroup("primary")
///     .with_output(ResultFormat::Delimited)
///     .with_raise_on_failure(true);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub catalog: Option<String>,

    #[serde(default)]
    pub workgroup: Option<String>,

    /// S3 prefix for result files. Either this or `workgroup` must be set.
    #[serde(default)]
    pub output_location: Option<String>,

    /// Identical submissions share an idempotency token so the engine can
    /// reuse a previous execution. Default: true
    #[serde(default = "default_true")]
    pub cache_query: bool,

    #[serde(default)]
    pub output: ResultFormat,

    /// When false, file-backed formats return object locations instead of
    /// fetched content. Default: true
    #[serde(default = "default_true")]
    pub fetch_body: bool,

    /// Return engine failures as errors instead of as a failed outcome.
    /// Default: false
    #[serde(default)]
    pub raise_on_failure: bool,

    /// Delay between status polls. Default: 1000ms
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of consecutive polls after which a single progress message is
    /// logged. Default: 5
    #[serde(default = "default_poll_log_threshold")]
    pub poll_log_threshold: u32,

    #[serde(default)]
    pub max_results_per_page: Option<u32>,

    /// Engine region. When unset, the resolved credentials' region is used,
    /// then `us-east-1`.
    #[serde(default)]
    pub region: Option<String>,

    /// Overrides `https://athena.<region>.amazonaws.com/`.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing)]
    pub credentials: Option<Credentials>,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_poll_log_threshold() -> u32 {
    5
}

const DEFAULT_REGION: &str = "us-east-1";

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            database: None,
            catalog: None,
            workgroup: None,
            output_location: None,
            cache_query: true,
            output: ResultFormat::Inline,
            fetch_body: true,
            raise_on_failure: false,
            poll_interval_ms: default_poll_interval_ms(),
            poll_log_threshold: default_poll_log_threshold(),
            max_results_per_page: None,
            region: None,
            endpoint: None,
            credentials: None,
        }
    }
}

impl QueryConfig {
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    pub fn with_workgroup(mut self, workgroup: impl Into<String>) -> Self {
        self.workgroup = Some(workgroup.into());
        self
    }

    pub fn with_output_location(mut self, location: impl Into<String>) -> Self {
        self.output_location = Some(location.into());
        self
    }

    pub fn with_cache_query(mut self, cache_query: bool) -> Self {
        self.cache_query = cache_query;
        self
    }

    pub fn with_output(mut self, output: ResultFormat) -> Self {
        self.output = output;
        self
    }

    pub fn with_fetch_body(mut self, fetch_body: bool) -> Self {
        self.fetch_body = fetch_body;
        self
    }

    pub fn with_raise_on_failure(mut self, raise: bool) -> Self {
        self.raise_on_failure = raise;
        self
    }

    pub fn with_poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    pub fn with_poll_log_threshold(mut self, threshold: u32) -> Self {
        self.poll_log_threshold = threshold;
        self
    }

    pub fn with_max_results_per_page(mut self, max_results: u32) -> Self {
        self.max_results_per_page = Some(max_results);
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn resolved_region<'a>(&'a self, credentials: &'a Credentials) -> &'a str {
        self.region
            .as_deref()
            .or(credentials.region.as_deref())
            .unwrap_or(DEFAULT_REGION)
    }

    pub fn endpoint_url(&self, credentials: &Credentials) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!(
                "https://athena.{}.amazonaws.com/",
                self.resolved_region(credentials)
            ),
        }
    }

    /// Checks that the engine has somewhere to write results.
    pub fn validate(&self) -> Result<()> {
        if self.workgroup.is_none() && self.output_location.is_none() {
            return Err(AthenaError::Configuration(
                "either a workgroup or an output location is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Session credentials handed to the request signer.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: Some(access_key_id.into()),
            secret_access_key: Some(secret_access_key.into()),
            session_token: None,
            region: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Fills every unset field of `self` from `fallback`.
    pub fn merge_over(self, fallback: Credentials) -> Credentials {
        Credentials {
            access_key_id: self.access_key_id.or(fallback.access_key_id),
            secret_access_key: self.secret_access_key.or(fallback.secret_access_key),
            session_token: self.session_token.or(fallback.session_token),
            region: self.region.or(fallback.region),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "***"))
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .field("region", &self.region)
            .finish()
    }
}

/// Source of credentials used when the caller does not supply them all.
pub trait CredentialProvider: Send + Sync {
    fn resolve(&self) -> Option<Credentials>;
}

/// Reads the standard `AWS_*` environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialProvider;

impl CredentialProvider for EnvCredentialProvider {
    fn resolve(&self) -> Option<Credentials> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let credentials = Credentials {
            access_key_id: var("AWS_ACCESS_KEY_ID"),
            secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
            session_token: var("AWS_SESSION_TOKEN"),
            region: var("AWS_REGION").or_else(|| var("AWS_DEFAULT_REGION")),
        };
        (credentials != Credentials::default()).then_some(credentials)
    }
}

#[derive(Debug, Clone)]
pub struct StaticCredentialProvider(pub Credentials);

impl CredentialProvider for StaticCredentialProvider {
    fn resolve(&self) -> Option<Credentials> {
        Some(self.0.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn resolve(&self) -> Option<Credentials> {
        None
    }
}

/// Explicit credentials win field by field over the provider's.
pub fn resolve_credentials(
    explicit: Option<&Credentials>,
    provider: &dyn CredentialProvider,
) -> Credentials {
    let explicit = explicit.cloned().unwrap_or_default();
    match provider.resolve() {
        Some(ambient) => explicit.merge_over(ambient),
        None => explicit,
    }
}
