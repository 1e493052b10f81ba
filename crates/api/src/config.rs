//! Application configuration loaded from environment variables.
//!
//! Every value has a default. Values that fail to parse fall back to the
//! default as well.

use std::str::FromStr;
use std::time::Duration;

use inventory::ConsumerConfig;
use resilience::{BackoffPolicy, BreakerConfig, CallConfig, DependencyConfig, DependencyRegistry};
use saga::{DEFAULT_PUBLISH_TIMEOUT, PRODUCT_SERVICE, USER_SERVICE};

/// Server, dependency and messaging configuration.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `USER_SERVICE_*`, `PRODUCT_SERVICE_*`: base URL, timeout, retries,
///   backoff and breaker settings for each dependency
/// - `ORDER_EVENTS_EXCHANGE`, `PRODUCT_ORDER_QUEUE`, `PRODUCT_ORDER_DLQ`,
///   `ORDER_QUEUE_MESSAGE_TTL_MS`, `CONSUMER_MAX_RETRIES`,
///   `CONSUMER_RECONNECT_DELAY_MS`: consumer topology
/// - `EVENT_PUBLISH_TIMEOUT_MS`: upper bound on publishing an order event
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub user_service: DependencyConfig,
    pub product_service: DependencyConfig,
    pub consumer: ConsumerConfig,
    pub publish_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which returns the raw value for
    /// a variable name if set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let env = Env { lookup: &lookup };

        let consumer = ConsumerConfig {
            topic: env.string("ORDER_EVENTS_EXCHANGE", defaults.consumer.topic),
            queue: env.string("PRODUCT_ORDER_QUEUE", defaults.consumer.queue),
            dead_letter_queue: env.string("PRODUCT_ORDER_DLQ", defaults.consumer.dead_letter_queue),
            message_ttl: env.millis("ORDER_QUEUE_MESSAGE_TTL_MS", defaults.consumer.message_ttl),
            max_retries: env.parse("CONSUMER_MAX_RETRIES", defaults.consumer.max_retries),
            prefetch: defaults.consumer.prefetch,
            reconnect_delay: env.millis(
                "CONSUMER_RECONNECT_DELAY_MS",
                defaults.consumer.reconnect_delay,
            ),
        };

        Self {
            host: env.string("HOST", defaults.host),
            port: env.parse("PORT", defaults.port),
            log_level: env.string("RUST_LOG", defaults.log_level),
            user_service: env.dependency("USER_SERVICE", defaults.user_service),
            product_service: env.dependency("PRODUCT_SERVICE", defaults.product_service),
            consumer,
            publish_timeout: env.millis("EVENT_PUBLISH_TIMEOUT_MS", defaults.publish_timeout),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds the dependency registry the order orchestrator calls through.
    pub fn registry(&self) -> DependencyRegistry {
        DependencyRegistry::new()
            .with(USER_SERVICE, self.user_service.clone())
            .with(PRODUCT_SERVICE, self.product_service.clone())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            user_service: DependencyConfig::new("http://127.0.0.1:3000/api/users"),
            product_service: DependencyConfig::new("http://127.0.0.1:3000/api/products"),
            consumer: ConsumerConfig::default(),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }
}

struct Env<'a, F> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, key: &str, default: String) -> String {
        (self.lookup)(key).unwrap_or(default)
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        (self.lookup)(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        (self.lookup)(key)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
            .unwrap_or(default)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        (self.lookup)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(default)
    }

    /// Reads the `{prefix}_*` family of settings for one dependency.
    fn dependency(&self, prefix: &str, default: DependencyConfig) -> DependencyConfig {
        let key = |suffix: &str| format!("{prefix}_{suffix}");
        let call = default.call;
        let breaker = default.breaker;

        DependencyConfig {
            base_url: self.string(&key("URL"), default.base_url),
            call: CallConfig {
                timeout: self.secs(&key("TIMEOUT"), call.timeout),
                max_attempts: self.parse(&key("MAX_RETRIES"), call.max_attempts).max(1),
                backoff: BackoffPolicy::new(
                    self.millis(&key("BACKOFF_BASE_MS"), call.backoff.base),
                    self.millis(&key("BACKOFF_CAP_MS"), call.backoff.cap),
                ),
            },
            breaker: BreakerConfig {
                failure_threshold: self.parse(
                    &key("CIRCUIT_BREAKER_THRESHOLD"),
                    breaker.failure_threshold,
                ),
                open_duration: self.secs(&key("CIRCUIT_BREAKER_TIMEOUT"), breaker.open_duration),
                half_open_probe_duration: self.secs(
                    &key("CIRCUIT_BREAKER_HALF_OPEN_TIMEOUT"),
                    breaker.half_open_probe_duration,
                ),
            },
        }
    }
}
