//! Relay Configuration Settings
//!
//! Configuration types for the quote relay, loaded from environment variables.

use std::time::Duration;

use crate::domain::feed::SubscriptionKey;

/// How the dispatcher picks recipients for an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMode {
    /// Every update goes to every connected subscriber.
    #[default]
    Broadcast,
    /// An update goes only to subscribers holding its key.
    PerKey,
}

impl RoutingMode {
    /// Parse routing mode from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "per_key" | "per-key" | "perkey" => Self::PerKey,
            _ => Self::Broadcast,
        }
    }

    /// Get the mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::PerKey => "per_key",
        }
    }
}

/// Upstream feed connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamSettings {
    /// WebSocket URL of the feed origin.
    pub url: String,
    /// Keys sent in the subscribe handshake.
    pub subscription_keys: Vec<SubscriptionKey>,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Maximum silence from the origin (`None` = watchdog disabled).
    pub idle_timeout: Option<Duration>,
    /// Transport connect timeout.
    pub connect_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier (1.0 = fixed delay).
    pub reconnect_delay_multiplier: f64,
    /// Reconnection jitter fraction.
    pub reconnect_jitter: f64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: "ws://39.107.99.235/ws".to_string(),
            subscription_keys: vec!["btcusdt".to_string(), "ethusdt".to_string()],
            heartbeat_interval: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(180)),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay_initial: Duration::from_secs(10),
            reconnect_delay_max: Duration::from_secs(10),
            reconnect_delay_multiplier: 1.0,
            reconnect_jitter: 0.0,
        }
    }
}

/// Fan-out settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Recipient selection.
    pub routing: RoutingMode,
    /// Capacity of the connector → dispatcher queue.
    pub dispatch_queue_capacity: usize,
    /// Capacity of each subscriber's outbound queue.
    pub subscriber_queue_capacity: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            routing: RoutingMode::Broadcast,
            dispatch_queue_capacity: 4096,
            subscriber_queue_capacity: 256,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Subscriber WebSocket gateway port.
    pub gateway_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            gateway_port: 8090,
            health_port: 8082,
        }
    }
}

/// REST collaborator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestSettings {
    /// K-line endpoint.
    pub kline_url: String,
    /// Quote endpoint.
    pub quote_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            kline_url: "http://39.107.99.235:1008/redis.php".to_string(),
            quote_url: "http://39.107.99.235:1008/getQuote.php".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelayConfig {
    /// Upstream connection settings.
    pub upstream: UpstreamSettings,
    /// Fan-out settings.
    pub dispatch: DispatchSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// REST collaborator settings.
    pub rest: RestSettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required value is empty or a URL has the wrong
    /// scheme.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// Unset or unparseable values fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a required value is empty or a URL has the wrong
    /// scheme.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let upstream_defaults = UpstreamSettings::default();
        let dispatch_defaults = DispatchSettings::default();
        let server_defaults = ServerSettings::default();
        let rest_defaults = RestSettings::default();

        let url = env.string("RELAY_UPSTREAM_URL", upstream_defaults.url);
        require_scheme("RELAY_UPSTREAM_URL", &url, &["ws://", "wss://"])?;

        let subscription_keys = match env.raw("RELAY_SUBSCRIPTION_KEYS") {
            Some(raw) => parse_keys(&raw),
            None => upstream_defaults.subscription_keys,
        };
        if subscription_keys.is_empty() {
            return Err(ConfigError::EmptyValue(
                "RELAY_SUBSCRIPTION_KEYS".to_string(),
            ));
        }

        let idle_timeout_secs = env.parse(
            "RELAY_IDLE_TIMEOUT_SECS",
            upstream_defaults.idle_timeout.map_or(0, |d| d.as_secs()),
        );

        let upstream = UpstreamSettings {
            url,
            subscription_keys,
            heartbeat_interval: Some(env.duration_secs(
                "RELAY_HEARTBEAT_INTERVAL_SECS",
                upstream_defaults.heartbeat_interval,
            ))
            .filter(|interval| !interval.is_zero())
            .unwrap_or(upstream_defaults.heartbeat_interval),
            idle_timeout: (idle_timeout_secs > 0).then(|| Duration::from_secs(idle_timeout_secs)),
            connect_timeout: env.duration_secs(
                "RELAY_CONNECT_TIMEOUT_SECS",
                upstream_defaults.connect_timeout,
            ),
            reconnect_delay_initial: env.duration_millis(
                "RELAY_RECONNECT_DELAY_INITIAL_MS",
                upstream_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.duration_secs(
                "RELAY_RECONNECT_DELAY_MAX_SECS",
                upstream_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env
                .finite(
                    "RELAY_RECONNECT_DELAY_MULTIPLIER",
                    upstream_defaults.reconnect_delay_multiplier,
                )
                .max(1.0),
            reconnect_jitter: env
                .finite("RELAY_RECONNECT_JITTER", upstream_defaults.reconnect_jitter)
                .clamp(0.0, 1.0),
        };

        let dispatch = DispatchSettings {
            routing: env
                .raw("RELAY_ROUTING")
                .map(|s| RoutingMode::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            dispatch_queue_capacity: env
                .parse(
                    "RELAY_DISPATCH_QUEUE_CAPACITY",
                    dispatch_defaults.dispatch_queue_capacity,
                )
                .max(1),
            subscriber_queue_capacity: env
                .parse(
                    "RELAY_SUBSCRIBER_QUEUE_CAPACITY",
                    dispatch_defaults.subscriber_queue_capacity,
                )
                .max(1),
        };

        let server = ServerSettings {
            gateway_port: env.parse("RELAY_GATEWAY_PORT", server_defaults.gateway_port),
            health_port: env.parse("RELAY_HEALTH_PORT", server_defaults.health_port),
        };

        let rest = RestSettings {
            kline_url: env.string("RELAY_KLINE_URL", rest_defaults.kline_url),
            quote_url: env.string("RELAY_QUOTE_URL", rest_defaults.quote_url),
            timeout: env.duration_secs("RELAY_HTTP_TIMEOUT_SECS", rest_defaults.timeout),
        };
        require_scheme("RELAY_KLINE_URL", &rest.kline_url, &["http://", "https://"])?;
        require_scheme("RELAY_QUOTE_URL", &rest.quote_url, &["http://", "https://"])?;

        Ok(Self {
            upstream,
            dispatch,
            server,
            rest,
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// URL does not use an accepted scheme.
    #[error("environment variable {key} has unsupported URL {value}")]
    InvalidUrl {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

/// Split a comma-separated key list, dropping blanks and duplicates.
fn parse_keys(raw: &str) -> Vec<SubscriptionKey> {
    let mut keys: Vec<SubscriptionKey> = Vec::new();
    for key in raw.split(',').map(str::trim).filter(|k| !k.is_empty()) {
        if !keys.iter().any(|existing| existing == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

fn require_scheme(key: &str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    if schemes.iter().any(|scheme| value.starts_with(scheme)) {
        Ok(())
    } else {
        Err(ConfigError::InvalidUrl {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn string(&self, key: &str, default: String) -> String {
        self.raw(key).map(|v| v.trim().to_string()).unwrap_or(default)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.raw(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Like `parse`, but `NaN` and infinities fall back to the default.
    fn finite(&self, key: &str, default: f64) -> f64 {
        self.raw(key)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.raw(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.raw(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
