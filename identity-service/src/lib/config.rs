use std::env;
use std::time::Duration;

use auth::HashPolicy;
use config::Config as ConfigBuilder;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;

use crate::domain::identity::tokens::TokenLifetimes;

/// Application configuration for identity-service.
///
/// Loaded from configuration files with environment variable overrides.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub password: PasswordConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

/// PostgreSQL database configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    25
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

/// HTTP server configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub http_port: u16,
    /// Key clients on the first `X-Forwarded-For` hop. Only safe behind a
    /// proxy that overwrites the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

/// Kafka producer configuration for "user created" events.
#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
}

/// Token lifetimes in hours.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TokenConfig {
    pub activation_ttl_hours: i64,
    pub access_ttl_hours: i64,
    pub refresh_ttl_hours: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            activation_ttl_hours: 72,
            access_ttl_hours: 7 * 24,
            refresh_ttl_hours: 30 * 24,
        }
    }
}

impl TokenConfig {
    pub fn lifetimes(&self) -> TokenLifetimes {
        TokenLifetimes {
            activation: chrono::Duration::hours(self.activation_ttl_hours),
            access: chrono::Duration::hours(self.access_ttl_hours),
            refresh: chrono::Duration::hours(self.refresh_ttl_hours),
        }
    }
}

/// Argon2id cost applied to new hashes; stored hashes with another cost are
/// upgraded at the next successful login.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PasswordConfig {
    pub memory_cost_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        let policy = HashPolicy::default();
        Self {
            memory_cost_kib: policy.memory_cost_kib,
            iterations: policy.iterations,
            parallelism: policy.parallelism,
        }
    }
}

impl PasswordConfig {
    pub fn policy(&self) -> HashPolicy {
        HashPolicy {
            memory_cost_kib: self.memory_cost_kib,
            iterations: self.iterations,
            parallelism: self.parallelism,
        }
    }
}

/// Session cache configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 600,
        }
    }
}

impl CacheConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Upper bound on each storage operation.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimeoutConfig {
    pub operation_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { operation_ms: 5000 }
    }
}

impl TimeoutConfig {
    pub fn operation(&self) -> Duration {
        Duration::from_millis(self.operation_ms)
    }
}

/// Per-client-IP request limiting.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 2,
            burst: 4,
        }
    }
}

/// Origins allowed to call the API from a browser.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CorsConfig {
    pub trusted_origins: Vec<String>,
}

impl Config {
    /// Load configuration from files with environment variable overrides.
    ///
    /// # Configuration Priority (highest to lowest)
    /// 1. Environment variables (DATABASE__URL, SERVER__HTTP_PORT, etc.)
    /// 2. Environment-specific config file (config/{environment}.toml)
    /// 3. Default config file (config/default.toml)
    ///
    /// # Errors
    /// Returns error if required configuration values are missing or invalid
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let configuration = ConfigBuilder::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Example: DATABASE__URL=postgres://... overrides database.url
            .add_source(Environment::with_prefix("").separator("__"))
            .build()?;

        configuration.try_deserialize()
    }
}
