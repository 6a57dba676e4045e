use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub dispatch: DispatchConfig,
    pub retry: RetryConfig,
    pub cost: CostConfig,
    pub providers: ProvidersConfig,
    pub sweeper: SweeperConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Maximum recipients per chunk handed to a channel worker.
    pub chunk_size: usize,
    /// Pause between successive chunk batches on the same channel, to smooth
    /// bursts against rate-limited gateways.
    pub inter_batch_pause_ms: u64,
    /// Concurrent chunks in flight per channel. SMS/WhatsApp gateways
    /// tolerate far less throughput than email/push.
    pub sms_concurrency: usize,
    pub whatsapp_concurrency: usize,
    pub email_concurrency: usize,
    pub push_concurrency: usize,
    /// Default dedup window (seconds) when a request does not set one.
    pub idempotency_window_seconds: u64,
    /// Display locale for rendered numbers and dates.
    pub locale: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per (recipient, channel) send, including the first.
    pub max_attempts: u32,
    /// Backoff before the first retry.
    pub base_delay_ms: u64,
    /// Cap for the exponential backoff.
    pub max_delay_ms: u64,
    /// Exponential multiplier between attempts.
    pub multiplier: f64,
    /// Random jitter range applied to each delay (0.0-1.0).
    pub jitter: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CostConfig {
    /// Unit cost per SMS segment.
    pub sms_unit: f64,
    pub whatsapp_unit: f64,
    pub email_unit: f64,
    pub push_unit: f64,
}

/// Provider gateway credentials. Each is optional; an unconfigured channel
/// simply has no adapter and is never dispatched.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    pub email: Option<GatewayConfig>,
    pub sms: Option<GatewayConfig>,
    pub whatsapp: Option<GatewayConfig>,
    pub push: Option<GatewayConfig>,
    /// Per-request timeout for gateway calls (milliseconds).
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Registered sender identity (SMS sender id, email from-address, ...).
    pub sender: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    /// Whether the stale-pending sweeper worker is enabled.
    pub enabled: bool,
    /// How often (seconds) the worker scans for stuck pending entries.
    pub interval_seconds: u64,
    /// Age (seconds) after which a pending entry is considered stuck.
    pub stale_after_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for the dispatch endpoint.
    pub dispatch_per_second: u32,
    /// Burst size for the dispatch endpoint.
    pub dispatch_burst: u32,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn gateway_from_env(prefix: &str) -> Option<GatewayConfig> {
    let endpoint = env::var(format!("{}_ENDPOINT", prefix)).ok()?;
    let api_key = env::var(format!("{}_API_KEY", prefix)).ok()?;
    Some(GatewayConfig {
        endpoint,
        api_key,
        sender: env::var(format!("{}_SENDER", prefix)).ok(),
    })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let port: u16 = env_string("PORT", "8080")
            .parse()
            .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?;

        Ok(Config {
            server: ServerConfig {
                host: env_string("HOST", "0.0.0.0"),
                port,
            },
            database: DatabaseConfig {
                url: env_string("DATABASE_URL", "sqlite://data/notify.db"),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 5),
            },
            dispatch: DispatchConfig {
                chunk_size: env_parse("DISPATCH_CHUNK_SIZE", 50),
                inter_batch_pause_ms: env_parse("DISPATCH_INTER_BATCH_PAUSE_MS", 200),
                sms_concurrency: env_parse("DISPATCH_SMS_CONCURRENCY", 2),
                whatsapp_concurrency: env_parse("DISPATCH_WHATSAPP_CONCURRENCY", 2),
                email_concurrency: env_parse("DISPATCH_EMAIL_CONCURRENCY", 8),
                push_concurrency: env_parse("DISPATCH_PUSH_CONCURRENCY", 8),
                idempotency_window_seconds: env_parse("DISPATCH_IDEMPOTENCY_WINDOW_SECONDS", 86400),
                locale: env_string("DISPATCH_LOCALE", "en-IN"),
            },
            retry: RetryConfig {
                max_attempts: env_parse("RETRY_MAX_ATTEMPTS", 3),
                base_delay_ms: env_parse("RETRY_BASE_DELAY_MS", 250),
                max_delay_ms: env_parse("RETRY_MAX_DELAY_MS", 10_000),
                multiplier: env_parse("RETRY_MULTIPLIER", 2.0),
                jitter: env_parse("RETRY_JITTER", 0.2),
            },
            cost: CostConfig {
                sms_unit: env_parse("COST_SMS_UNIT", 0.25),
                whatsapp_unit: env_parse("COST_WHATSAPP_UNIT", 0.75),
                email_unit: env_parse("COST_EMAIL_UNIT", 0.01),
                push_unit: env_parse("COST_PUSH_UNIT", 0.0),
            },
            providers: ProvidersConfig {
                email: gateway_from_env("EMAIL_GATEWAY"),
                sms: gateway_from_env("SMS_GATEWAY"),
                whatsapp: gateway_from_env("WHATSAPP_GATEWAY"),
                push: gateway_from_env("PUSH_GATEWAY"),
                request_timeout_ms: env_parse("PROVIDER_REQUEST_TIMEOUT_MS", 10_000),
            },
            sweeper: SweeperConfig {
                enabled: match env::var("SWEEPER_ENABLED") {
                    Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
                    Err(_) => true,
                },
                interval_seconds: env_parse("SWEEPER_INTERVAL_SECONDS", 60),
                stale_after_seconds: env_parse("SWEEPER_STALE_AFTER_SECONDS", 600),
            },
            rate_limit: RateLimitConfig {
                dispatch_per_second: env_parse("RATE_LIMIT_DISPATCH_PER_SECOND", 10),
                dispatch_burst: env_parse("RATE_LIMIT_DISPATCH_BURST", 30),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite://data/notify.db".to_string(),
                max_connections: 5,
            },
            dispatch: DispatchConfig {
                chunk_size: 50,
                inter_batch_pause_ms: 200,
                sms_concurrency: 2,
                whatsapp_concurrency: 2,
                email_concurrency: 8,
                push_concurrency: 8,
                idempotency_window_seconds: 86400,
                locale: "en-IN".to_string(),
            },
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 250,
                max_delay_ms: 10_000,
                multiplier: 2.0,
                jitter: 0.2,
            },
            cost: CostConfig {
                sms_unit: 0.25,
                whatsapp_unit: 0.75,
                email_unit: 0.01,
                push_unit: 0.0,
            },
            providers: ProvidersConfig {
                email: None,
                sms: None,
                whatsapp: None,
                push: None,
                request_timeout_ms: 10_000,
            },
            sweeper: SweeperConfig {
                enabled: true,
                interval_seconds: 60,
                stale_after_seconds: 600,
            },
            rate_limit: RateLimitConfig {
                dispatch_per_second: 10,
                dispatch_burst: 30,
            },
        }
    }
}
