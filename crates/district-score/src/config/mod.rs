pub mod topics;

use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

pub use topics::{
    CountryProfile, NumericDirection, SignalField, SignalKind, TopicCatalog, TopicProfile,
};

const DEFAULT_LLM_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_LLM_MODEL: &str = "stepfun/step-3.5-flash:free";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub providers: ProviderConfig,
    pub retrieval: RetrievalConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let providers = ProviderConfig {
            serper_api_key: non_empty_var("SERPER_API_KEY"),
            searxng_url: non_empty_var("SEARXNG_URL"),
            llm_api_key: non_empty_var("OPENROUTER_API_KEY"),
            llm_base_url: non_empty_var("LLM_BASE_URL")
                .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            llm_model: non_empty_var("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            search_timeout: Duration::from_secs(numeric_var("SEARCH_TIMEOUT_SECS", 15)?),
            llm_timeout: Duration::from_secs(numeric_var("LLM_TIMEOUT_SECS", 60)?),
        };

        let retrieval = RetrievalConfig {
            max_iterations: numeric_var("RETRIEVAL_MAX_ITERATIONS", 3)?.max(1) as usize,
            top_snippets: numeric_var("RETRIEVAL_TOP_SNIPPETS", 8)?.max(1) as usize,
            max_queries: numeric_var("RETRIEVAL_MAX_QUERIES", 4)?.max(1) as usize,
            results_per_query: numeric_var("SEARCH_MAX_RESULTS", 8)?.max(1) as usize,
        };

        let storage = StorageConfig {
            cache_dir: PathBuf::from(
                non_empty_var("SCORE_CACHE_DIR").unwrap_or_else(|| "data".to_string()),
            ),
            boundary_dir: non_empty_var("BOUNDARY_DIR").map(PathBuf::from),
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            providers,
            retrieval,
            storage,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn numeric_var(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match non_empty_var(key) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { key }),
        None => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Credentials and endpoints for the search backends and the language model.
#[derive(Clone)]
pub struct ProviderConfig {
    pub serper_api_key: Option<String>,
    pub searxng_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,
    pub search_timeout: Duration,
    pub llm_timeout: Duration,
}

impl ProviderConfig {
    /// Returns the model credential, failing when scoring cannot run without it.
    pub fn require_llm_key(&self) -> Result<&str, ConfigError> {
        self.llm_api_key
            .as_deref()
            .ok_or(ConfigError::MissingCredential("OPENROUTER_API_KEY"))
    }

    pub fn has_search_backend(&self) -> bool {
        self.serper_api_key.is_some() || self.searxng_url.is_some()
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("serper_api_key", &self.serper_api_key.as_ref().map(|_| "***"))
            .field("searxng_url", &self.searxng_url)
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "***"))
            .field("llm_base_url", &self.llm_base_url)
            .field("llm_model", &self.llm_model)
            .field("search_timeout", &self.search_timeout)
            .field("llm_timeout", &self.llm_timeout)
            .finish()
    }
}

/// Bounds applied by the evidence retrieval loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalConfig {
    pub max_iterations: usize,
    pub top_snippets: usize,
    pub max_queries: usize,
    pub results_per_query: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            top_snippets: 8,
            max_queries: 4,
            results_per_query: 8,
        }
    }
}

/// Filesystem locations for persisted scores and district boundaries.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub cache_dir: PathBuf,
    pub boundary_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str },
    MissingCredential(&'static str),
    NoSearchBackend,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key } => {
                write!(f, "{key} must be a non-negative integer")
            }
            ConfigError::MissingCredential(key) => write!(f, "{key} not set"),
            ConfigError::NoSearchBackend => {
                write!(f, "no search backend configured: set SERPER_API_KEY or SEARXNG_URL")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "SERPER_API_KEY",
            "SEARXNG_URL",
            "OPENROUTER_API_KEY",
            "LLM_BASE_URL",
            "LLM_MODEL",
            "SEARCH_TIMEOUT_SECS",
            "LLM_TIMEOUT_SECS",
            "SEARCH_MAX_RESULTS",
            "RETRIEVAL_MAX_ITERATIONS",
            "RETRIEVAL_TOP_SNIPPETS",
            "RETRIEVAL_MAX_QUERIES",
            "SCORE_CACHE_DIR",
            "BOUNDARY_DIR",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.retrieval, RetrievalConfig::default());
        assert_eq!(config.providers.llm_base_url, DEFAULT_LLM_BASE_URL);
        assert_eq!(config.storage.cache_dir, PathBuf::from("data"));
        assert!(config.storage.boundary_dir.is_none());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn rejects_non_numeric_iteration_cap() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("RETRIEVAL_MAX_ITERATIONS", "three");
        match AppConfig::load() {
            Err(ConfigError::InvalidNumber { key }) => {
                assert_eq!(key, "RETRIEVAL_MAX_ITERATIONS")
            }
            other => panic!("expected invalid number, got {other:?}"),
        }
        reset_env();
    }

    #[test]
    fn zero_iteration_cap_is_raised_to_one() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("RETRIEVAL_MAX_ITERATIONS", "0");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.retrieval.max_iterations, 1);
        reset_env();
    }

    #[test]
    fn missing_model_key_is_reported() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("SERPER_API_KEY", "serper-key");
        let config = AppConfig::load().expect("config loads");
        assert!(config.providers.has_search_backend());
        assert!(matches!(
            config.providers.require_llm_key(),
            Err(ConfigError::MissingCredential("OPENROUTER_API_KEY"))
        ));
        assert!(!format!("{:?}", config.providers).contains("serper-key"));
        reset_env();
    }
}
