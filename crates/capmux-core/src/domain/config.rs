//! Server and pool configuration
//!
//! Server entries follow the standard MCP client format used by VS Code,
//! Cursor and Claude Desktop: transport fields (`command`/`args`/`env` or
//! `url`/`headers`) sit at the top level of each entry, optionally with an
//! explicit `"type"`. Connection tuning knobs sit next to them:
//!
//! ```json
//! {
//!   "pool": { "maxPoolSize": 16, "warmupOnStart": true },
//!   "mcpServers": {
//!     "github": { "command": "npx", "args": ["-y", "@modelcontextprotocol/server-github"] },
//!     "search": { "url": "https://search.example.com/mcp", "connectionMode": "strict" }
//!   }
//! }
//! ```

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Transport
// ============================================================================

/// Transport family of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
    Sse,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
            Self::Sse => "sse",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved transport parameters
///
/// Environment variables and headers are passed through untouched; any
/// credentials they carry are opaque to capmux.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    /// Local child process speaking over stdin/stdout
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    /// Streamable HTTP endpoint
    Http {
        url: String,
        headers: HashMap<String, String>,
    },
    /// Legacy SSE endpoint
    Sse {
        url: String,
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio { .. } => TransportKind::Stdio,
            Self::Http { .. } => TransportKind::Http,
            Self::Sse { .. } => TransportKind::Sse,
        }
    }

    /// Short human-readable description for logs
    pub fn describe(&self) -> String {
        match self {
            Self::Stdio { command, args, .. } if args.is_empty() => command.clone(),
            Self::Stdio { command, args, .. } => format!("{} {}", command, args.join(" ")),
            Self::Http { url, .. } | Self::Sse { url, .. } => url.clone(),
        }
    }
}

// ============================================================================
// Tuning
// ============================================================================

/// Whether a server must come up for startup to succeed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Startup fails if this server does not reach Ready
    Strict,
    /// Startup failures are logged and tolerated
    #[default]
    Lenient,
}

/// Retry and recovery policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Recovery attempts before the connection is marked Failed (0 disables recovery)
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Jitter as a fraction of the computed delay (0.0 - 1.0)
    pub jitter: f64,
    /// Wall-clock cap on one recovery episode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_timeout_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.1,
            recovery_timeout_ms: None,
        }
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn recovery_timeout(&self) -> Option<Duration> {
        self.recovery_timeout_ms.map(Duration::from_millis)
    }

    /// Policy that never retries
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitBreakerConfig {
    /// Failures inside `time_window_ms` that open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again
    pub success_threshold: u32,
    /// How long the circuit stays open before admitting a probe
    pub recovery_timeout_ms: u64,
    pub time_window_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            recovery_timeout_ms: 30_000,
            time_window_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn time_window(&self) -> Duration {
        Duration::from_millis(self.time_window_ms)
    }
}

/// Liveness probing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    /// Consecutive probe failures before the connection counts as degraded
    pub unhealthy_threshold: u32,
    /// Consecutive probe failures before recovery kicks in
    pub recovery_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            timeout_ms: 5_000,
            unhealthy_threshold: 2,
            recovery_threshold: 4,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ============================================================================
// Server config
// ============================================================================

/// Full configuration of one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ServerEntry", into = "ServerEntry")]
pub struct ServerConfig {
    pub transport: TransportConfig,
    pub connection_mode: ConnectionMode,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    pub health_check: HealthCheckConfig,
}

/// Default connection timeout (30 seconds)
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Default per-request timeout (60 seconds)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;

impl ServerConfig {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            connection_mode: ConnectionMode::default(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            health_check: HealthCheckConfig::default(),
        }
    }

    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(TransportConfig::Stdio {
            command: command.into(),
            args,
            env: HashMap::new(),
        })
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self::new(TransportConfig::Http {
            url: url.into(),
            headers: HashMap::new(),
        })
    }

    pub fn sse(url: impl Into<String>) -> Self {
        Self::new(TransportConfig::Sse {
            url: url.into(),
            headers: HashMap::new(),
        })
    }

    pub fn with_mode(mut self, mode: ConnectionMode) -> Self {
        self.connection_mode = mode;
        self
    }

    pub fn strict(self) -> Self {
        self.with_mode(ConnectionMode::Strict)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    pub fn with_health_check(mut self, health_check: HealthCheckConfig) -> Self {
        self.health_check = health_check;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn is_strict(&self) -> bool {
        self.connection_mode == ConnectionMode::Strict
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reject configurations that can never produce a working connection
    pub fn validate(&self) -> Result<()> {
        match &self.transport {
            TransportConfig::Stdio { command, .. } if command.trim().is_empty() => {
                return Err(Error::Config("stdio transport requires a command".into()));
            }
            TransportConfig::Http { url, .. } | TransportConfig::Sse { url, .. }
                if !(url.starts_with("http://") || url.starts_with("https://")) =>
            {
                return Err(Error::Config(format!(
                    "{} transport requires an http(s) url, got '{}'",
                    self.transport_kind(),
                    url
                )));
            }
            _ => {}
        }

        if self.connect_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be greater than zero".into()));
        }
        if self.circuit_breaker.failure_threshold == 0 || self.circuit_breaker.success_threshold == 0
        {
            return Err(Error::Config(
                "circuit breaker thresholds must be greater than zero".into(),
            ));
        }
        if self.circuit_breaker.recovery_timeout_ms == 0 {
            return Err(Error::Config(
                "circuit breaker recoveryTimeoutMs must be greater than zero".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(Error::Config("retry multiplier must be at least 1.0".into()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(Error::Config("retry jitter must be between 0.0 and 1.0".into()));
        }
        if self.health_check.enabled
            && (self.health_check.interval_ms == 0
                || self.health_check.unhealthy_threshold == 0
                || self.health_check.recovery_threshold < self.health_check.unhealthy_threshold)
        {
            return Err(Error::Config(
                "health check needs a non-zero interval and recoveryThreshold >= unhealthyThreshold"
                    .into(),
            ));
        }
        Ok(())
    }

    /// [`validate`](Self::validate) with the server name in the message
    pub fn validate_as(&self, name: &str) -> Result<()> {
        self.validate().map_err(|e| match e {
            Error::Config(reason) => Error::Config(format!("server '{}': {}", name, reason)),
            other => other,
        })
    }
}

/// Flat on-disk shape of a server entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerEntry {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<TransportKind>,

    // --- Stdio ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    env: HashMap<String, String>,

    // --- HTTP / SSE ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    headers: HashMap<String, String>,

    // --- Tuning ---
    #[serde(default)]
    connection_mode: ConnectionMode,
    #[serde(default = "default_connect_timeout_ms")]
    connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    request_timeout_ms: u64,
    #[serde(default)]
    retry: RetryPolicy,
    #[serde(default)]
    circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    health_check: HealthCheckConfig,
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

impl TryFrom<ServerEntry> for ServerConfig {
    type Error = Error;

    fn try_from(entry: ServerEntry) -> Result<Self> {
        let transport = match (entry.kind, entry.command, entry.url) {
            (Some(TransportKind::Stdio) | None, Some(command), None) => TransportConfig::Stdio {
                command,
                args: entry.args,
                env: entry.env,
            },
            (Some(TransportKind::Http) | None, None, Some(url)) => TransportConfig::Http {
                url,
                headers: entry.headers,
            },
            (Some(TransportKind::Sse), None, Some(url)) => TransportConfig::Sse {
                url,
                headers: entry.headers,
            },
            (kind, command, url) => {
                return Err(Error::Config(format!(
                    "server entry must set exactly one of 'command' or 'url' matching its type \
                     (type={:?}, command={}, url={})",
                    kind.map(|k| k.as_str()),
                    command.is_some(),
                    url.is_some()
                )));
            }
        };

        Ok(Self {
            transport,
            connection_mode: entry.connection_mode,
            connect_timeout_ms: entry.connect_timeout_ms,
            request_timeout_ms: entry.request_timeout_ms,
            retry: entry.retry,
            circuit_breaker: entry.circuit_breaker,
            health_check: entry.health_check,
        })
    }
}

impl From<ServerConfig> for ServerEntry {
    fn from(config: ServerConfig) -> Self {
        let mut entry = ServerEntry {
            kind: Some(config.transport.kind()),
            connection_mode: config.connection_mode,
            connect_timeout_ms: config.connect_timeout_ms,
            request_timeout_ms: config.request_timeout_ms,
            retry: config.retry,
            circuit_breaker: config.circuit_breaker,
            health_check: config.health_check,
            ..Default::default()
        };
        match config.transport {
            TransportConfig::Stdio { command, args, env } => {
                entry.command = Some(command);
                entry.args = args;
                entry.env = env;
            }
            TransportConfig::Http { url, headers } | TransportConfig::Sse { url, headers } => {
                entry.url = Some(url);
                entry.headers = headers;
            }
        }
        entry
    }
}

// ============================================================================
// Ordered server list
// ============================================================================

/// Server configurations in declaration order
///
/// Declaration order decides which server keeps an unprefixed capability
/// name, so it is kept in a list rather than a hash map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerConfigs(Vec<(String, ServerConfig)>);

impl ServerConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a server, replacing an earlier entry of the same name in place
    pub fn push(&mut self, name: impl Into<String>, config: ServerConfig) {
        let name = name.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = config,
            None => self.0.push((name, config)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, config: ServerConfig) -> Self {
        self.push(name, config);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ServerConfig> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, ServerConfig)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for ServerConfigs {
    type Item = (String, ServerConfig);
    type IntoIter = std::vec::IntoIter<(String, ServerConfig)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<(String, ServerConfig)> for ServerConfigs {
    fn from_iter<I: IntoIterator<Item = (String, ServerConfig)>>(iter: I) -> Self {
        let mut configs = Self::new();
        for (name, config) in iter {
            configs.push(name, config);
        }
        configs
    }
}

impl Serialize for ServerConfigs {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, config) in &self.0 {
            map.serialize_entry(name, config)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ServerConfigs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = ServerConfigs;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of server name to server configuration")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut configs = ServerConfigs::new();
                while let Some((name, config)) = access.next_entry::<String, ServerConfig>()? {
                    configs.push(name, config);
                }
                Ok(configs)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

// ============================================================================
// Pool / gateway config
// ============================================================================

/// Pool-level settings, adjustable at runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
    /// Upper bound on live connections
    pub max_pool_size: usize,
    /// Ping every connection once initialization finishes
    pub warmup_on_start: bool,
    pub warmup_timeout_ms: u64,
    /// Grace period for in-flight requests during shutdown
    pub shutdown_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 64,
            warmup_on_start: false,
            warmup_timeout_ms: 10_000,
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl PoolConfig {
    pub fn warmup_timeout(&self) -> Duration {
        Duration::from_millis(self.warmup_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Top-level configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(rename = "mcpServers", default)]
    pub servers: ServerConfigs,
}

impl GatewayConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool.max_pool_size == 0 {
            return Err(Error::Config("maxPoolSize must be greater than zero".into()));
        }
        for (name, config) in self.servers.iter() {
            if name.trim().is_empty() {
                return Err(Error::Config("server names must not be empty".into()));
            }
            config.validate_as(name)?;
        }
        Ok(())
    }
}
