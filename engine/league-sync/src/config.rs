use crate::error::{Result, SyncError};
use crate::fetcher::DEFAULT_MAX_PAGES;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Optional tuning file, looked up in the working directory (league-sync.toml, .json, ...)
pub const TUNING_FILE: &str = "league-sync";

/// Prefix for tuning overrides, e.g. `LEAGUE_SYNC__RETRY__MAX_ATTEMPTS=5`
pub const TUNING_ENV_PREFIX: &str = "LEAGUE_SYNC";

/// Configuration for one sync run. Built once at process start and passed by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// External data source
    pub source: SourceConfig,

    /// Persistent store
    pub store: StoreConfig,

    /// Retry policy for source requests
    pub retry: RetryConfig,

    /// Applier settings
    pub apply: ApplyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Endpoint returning the records as a JSON array
    pub url: String,

    /// API key for the source
    #[serde(skip_serializing)]
    pub api_key: String,

    /// Header carrying the key. `Authorization` sends it as a bearer token.
    pub api_key_header: String,

    /// Extra query parameters sent with every request
    pub filters: BTreeMap<String, String>,

    /// Page size; `None` fetches everything in one request
    pub page_size: Option<usize>,

    /// Most pages one fetch may request before giving up
    pub max_pages: usize,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `postgres://` for direct database access, `https://` for a PostgREST endpoint
    pub url: String,

    /// Service key for the store
    #[serde(skip_serializing)]
    pub key: String,

    /// Connection pool size (postgres only)
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay in milliseconds
    pub max_delay_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, initial_delay_ms: 500, max_delay_ms: 10_000, backoff_multiplier: 2.0 }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// How many operations may be written at once
    pub concurrency: usize,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

/// Settings that have defaults and may be overridden from file or environment
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub source: SourceTuning,
    pub store: StoreTuning,
    pub retry: RetryConfig,
    pub apply: ApplyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceTuning {
    pub api_key_header: String,
    pub filters: BTreeMap<String, String>,
    pub page_size: Option<usize>,
    pub max_pages: usize,
    pub timeout_secs: u64,
}

impl Default for SourceTuning {
    fn default() -> Self {
        Self {
            api_key_header: "Authorization".to_string(),
            filters: BTreeMap::new(),
            page_size: None,
            max_pages: DEFAULT_MAX_PAGES,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreTuning {
    pub max_connections: u32,
}

impl Default for StoreTuning {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

impl Tuning {
    /// Read tuning from the optional file and `LEAGUE_SYNC__*` environment variables
    pub fn load() -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::with_name(TUNING_FILE).required(false))
            .add_source(
                config::Environment::with_prefix(TUNING_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| SyncError::config(format!("Invalid tuning settings: {}", e)))
    }
}

impl SyncConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok(), Tuning::load()?)
    }

    /// Build the configuration from a variable lookup. Fails before any network call
    /// when a required variable is missing or empty.
    pub fn from_lookup<F>(lookup: F, tuning: Tuning) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source_url = required_var(&lookup, &["SOURCE_URL"])?;
        let source_api_key = required_var(&lookup, &["SOURCE_API_KEY"])?;
        let store_url = required_var(&lookup, &["STORE_URL", "SUPABASE_URL"])?;
        let store_key = required_var(&lookup, &["STORE_KEY", "SUPABASE_SERVICE_KEY"])?;

        let config = Self {
            source: SourceConfig {
                url: source_url,
                api_key: source_api_key,
                api_key_header: tuning.source.api_key_header,
                filters: tuning.source.filters,
                page_size: tuning.source.page_size,
                max_pages: tuning.source.max_pages,
                timeout_secs: tuning.source.timeout_secs,
            },
            store: StoreConfig {
                url: store_url,
                key: store_key,
                max_connections: tuning.store.max_connections,
            },
            retry: tuning.retry,
            apply: tuning.apply,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a run hang or never try
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(SyncError::config("retry.max_attempts must be at least 1"));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(SyncError::config("retry.backoff_multiplier must be >= 1.0"));
        }
        if self.source.timeout_secs == 0 {
            return Err(SyncError::config("source.timeout_secs must be greater than 0"));
        }
        if self.source.page_size == Some(0) {
            return Err(SyncError::config("source.page_size must be greater than 0"));
        }
        if self.source.max_pages == 0 {
            return Err(SyncError::config("source.max_pages must be at least 1"));
        }
        if self.apply.concurrency == 0 {
            return Err(SyncError::config("apply.concurrency must be at least 1"));
        }
        if self.store.max_connections == 0 {
            return Err(SyncError::config("store.max_connections must be at least 1"));
        }
        Ok(())
    }
}

/// First non-empty value among `names`
fn required_var<F>(lookup: &F, names: &[&str]) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    names
        .iter()
        .filter_map(|&name| lookup(name))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .ok_or_else(|| SyncError::config(format!("{} not set", names.join(" or "))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn full_env() -> HashMap<String, String> {
        vars(&[
            ("SOURCE_URL", "https://stats.example.com/v1/teams"),
            ("SOURCE_API_KEY", "source-key"),
            ("STORE_URL", "postgres://localhost/league"),
            ("STORE_KEY", "store-key"),
        ])
    }

    #[test]
    fn test_from_lookup_with_all_variables() {
        let env = full_env();
        let config = SyncConfig::from_lookup(|k| env.get(k).cloned(), Tuning::default()).unwrap();

        assert_eq!(config.source.url, "https://stats.example.com/v1/teams");
        assert_eq!(config.source.api_key_header, "Authorization");
        assert_eq!(config.source.timeout(), Duration::from_secs(30));
        assert_eq!(config.source.max_pages, 1000);
        assert_eq!(config.store.key, "store-key");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.apply.concurrency, 1);
    }

    #[test]
    fn test_missing_variable_is_configuration_error() {
        let mut env = full_env();
        env.remove("SOURCE_API_KEY");

        let err = SyncConfig::from_lookup(|k| env.get(k).cloned(), Tuning::default()).unwrap_err();
        match err {
            SyncError::Configuration { message } => assert_eq!(message, "SOURCE_API_KEY not set"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_empty_variable_counts_as_missing() {
        let mut env = full_env();
        env.insert("STORE_URL".to_string(), "   ".to_string());

        let err = SyncConfig::from_lookup(|k| env.get(k).cloned(), Tuning::default()).unwrap_err();
        assert!(matches!(err, SyncError::Configuration { .. }));
    }

    #[test]
    fn test_supabase_fallback_names() {
        let env = vars(&[
            ("SOURCE_URL", "https://stats.example.com/v1/players"),
            ("SOURCE_API_KEY", "source-key"),
            ("SUPABASE_URL", "https://league.supabase.co"),
            ("SUPABASE_SERVICE_KEY", "service-role"),
        ]);

        let config = SyncConfig::from_lookup(|k| env.get(k).cloned(), Tuning::default()).unwrap();
        assert_eq!(config.store.url, "https://league.supabase.co");
        assert_eq!(config.store.key, "service-role");
    }

    #[test]
    fn test_invalid_tuning_rejected() {
        let env = full_env();
        let mut tuning = Tuning::default();
        tuning.retry.max_attempts = 0;
        assert!(SyncConfig::from_lookup(|k| env.get(k).cloned(), tuning).is_err());

        let mut tuning = Tuning::default();
        tuning.apply.concurrency = 0;
        assert!(SyncConfig::from_lookup(|k| env.get(k).cloned(), tuning).is_err());

        let mut tuning = Tuning::default();
        tuning.retry.backoff_multiplier = 0.5;
        assert!(SyncConfig::from_lookup(|k| env.get(k).cloned(), tuning).is_err());

        let mut tuning = Tuning::default();
        tuning.source.max_pages = 0;
        assert!(SyncConfig::from_lookup(|k| env.get(k).cloned(), tuning).is_err());
    }
}
