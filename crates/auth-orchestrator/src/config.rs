//! # Configuration
//!
//! [`OrchestratorConfig`] holds every endpoint, timing constant, and
//! threshold the orchestrator, fetcher, and connection hub use.
//!
//! ## Loading Priority
//!
//! Configuration is loaded from the first source that provides a value:
//!
//! 1. Explicit struct fields (programmatic construction)
//! 2. Environment variables (`AUTH_ORCHESTRATOR_API_URL`, etc.)
//! 3. TOML config file at an explicit path
//! 4. `./orchestrator.toml` in the current directory
//! 5. `~/.config/auth-orchestrator/orchestrator.toml`
//!
//! Individual fields can always be overridden by environment variables,
//! even when loading from a file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AuthError, AuthResult};

/// Default backend base URL for HTTP calls.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// Default backend base URL for channel sockets.
pub const DEFAULT_WS_BASE_URL: &str = "ws://localhost:8000";

const DEFAULT_WHOAMI_PATH: &str = "/api/auth/whoami";
const DEFAULT_HEALTH_PATH: &str = "/health";
const DEFAULT_REFRESH_PATH: &str = "/api/auth/refresh";
const DEFAULT_MUSIC_WS_PATH: &str = "/ws/music";
const DEFAULT_CARE_WS_PATH: &str = "/ws/care";

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_HEALTH_PROBE_TIMEOUT_MS: u64 = 1_500;
const DEFAULT_WS_CONNECT_TIMEOUT_MS: u64 = 5_000;

const DEFAULT_DEBOUNCE_MS: u64 = 1_000;
const DEFAULT_MIN_INTERVAL_MS: u64 = 5_000;
const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
const DEFAULT_EXPLICIT_CHANGE_WINDOW_MS: u64 = 100;

const DEFAULT_IDENTITY_CACHE_TTL_MS: u64 = 3_000;
const DEFAULT_IDENTITY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_IDENTITY_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_IDENTITY_MAX_DELAY_MS: u64 = 5_000;

const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 500;
const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 5_000;

const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 30;
const DEFAULT_HEALTH_MAX_FAILURES: u32 = 3;
const DEFAULT_HEALTH_CACHE_TTL_MS: u64 = 2_000;

const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 25;

/// Auth-gate retry delay in production.
const AUTH_GATE_DELAY_MS: u64 = 500;

/// Auth-gate retry delay when `test_mode` is set.
const AUTH_GATE_TEST_DELAY_MS: u64 = 100;

/// Configuration for the session orchestrator and its channel hub.
///
/// # Examples
///
/// ```
/// use auth_orchestrator::config::OrchestratorConfig;
///
/// let config = OrchestratorConfig::new("https://api.example.com");
/// assert_eq!(config.whoami_url(), "https://api.example.com/api/auth/whoami");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Base URL for identity, health, and refresh calls.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Base URL for channel sockets. Left out of a config file, it is
    /// derived from `api_base_url` on load.
    #[serde(default)]
    pub ws_base_url: String,

    /// JSON file backing the token store. `None` keeps tokens in memory.
    #[serde(default)]
    pub token_store_path: Option<PathBuf>,

    /// Shortens the auth-gate retry delay for tests.
    #[serde(default)]
    pub test_mode: bool,

    /// Endpoint paths, relative to the base URLs.
    #[serde(default)]
    pub endpoints: EndpointConfig,

    /// Network timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Debounce, rate limit, and failure backoff for identity checks.
    #[serde(default)]
    pub checks: CheckConfig,

    /// Resilient identity fetcher cache and retry schedule.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Channel reconnect behavior.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Backend health polling.
    #[serde(default)]
    pub health: HealthConfig,

    /// Channel liveness pings.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

/// Endpoint paths appended to the base URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_whoami_path")]
    pub whoami_path: String,

    #[serde(default = "default_health_path")]
    pub health_path: String,

    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,

    #[serde(default = "default_music_ws_path")]
    pub music_ws_path: String,

    #[serde(default = "default_care_ws_path")]
    pub care_ws_path: String,
}

/// Timeout settings, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Timeout for identity and refresh requests.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Abort timeout wrapped around each health probe.
    #[serde(default = "default_health_probe_timeout")]
    pub health_probe_timeout_ms: u64,

    /// Timeout for a channel socket handshake.
    #[serde(default = "default_ws_connect_timeout")]
    pub ws_connect_timeout_ms: u64,
}

/// Identity check pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Trailing debounce window for `check_auth` / `refresh_auth`.
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,

    /// Minimum spacing between live identity calls.
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,

    /// Failure backoff base (grows by 1.5x per consecutive failure).
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Failure backoff cap.
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// How long `mark_explicit_state_change` stays armed.
    #[serde(default = "default_explicit_change_window")]
    pub explicit_change_window_ms: u64,
}

/// Resilient identity fetcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// How long a successful identity payload is served from cache.
    #[serde(default = "default_identity_cache_ttl")]
    pub cache_ttl_ms: u64,

    /// Total attempts (initial + retries) for transient failures.
    #[serde(default = "default_identity_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(default = "default_identity_base_delay")]
    pub base_delay_ms: u64,

    /// Retry delay cap.
    #[serde(default = "default_identity_max_delay")]
    pub max_delay_ms: u64,
}

/// Channel reconnect behavior when a socket drops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Consecutive reconnects before the channel is marked failed.
    #[serde(default = "default_reconnect_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first reconnect.
    #[serde(default = "default_reconnect_base_delay")]
    pub base_delay_ms: u64,

    /// Reconnect delay cap.
    #[serde(default = "default_reconnect_max_delay")]
    pub max_delay_ms: u64,
}

/// Backend health polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Enable background health polling.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval between health probes, in seconds.
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    /// Consecutive probe failures before the backend is reported unhealthy.
    #[serde(default = "default_health_max_failures")]
    pub max_consecutive_failures: u32,

    /// How long a probe verdict is reused by the channel hub.
    #[serde(default = "default_health_cache_ttl")]
    pub cache_ttl_ms: u64,
}

/// Channel heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between `"ping"` frames on an open channel, in seconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
}

// ─── Defaults ───────────────────────────────────────────────────────────

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_whoami_path() -> String {
    DEFAULT_WHOAMI_PATH.to_string()
}

fn default_health_path() -> String {
    DEFAULT_HEALTH_PATH.to_string()
}

fn default_refresh_path() -> String {
    DEFAULT_REFRESH_PATH.to_string()
}

fn default_music_ws_path() -> String {
    DEFAULT_MUSIC_WS_PATH.to_string()
}

fn default_care_ws_path() -> String {
    DEFAULT_CARE_WS_PATH.to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_health_probe_timeout() -> u64 {
    DEFAULT_HEALTH_PROBE_TIMEOUT_MS
}

fn default_ws_connect_timeout() -> u64 {
    DEFAULT_WS_CONNECT_TIMEOUT_MS
}

fn default_debounce() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_min_interval() -> u64 {
    DEFAULT_MIN_INTERVAL_MS
}

fn default_backoff_base() -> u64 {
    DEFAULT_BACKOFF_BASE_MS
}

fn default_backoff_max() -> u64 {
    DEFAULT_BACKOFF_MAX_MS
}

fn default_explicit_change_window() -> u64 {
    DEFAULT_EXPLICIT_CHANGE_WINDOW_MS
}

fn default_identity_cache_ttl() -> u64 {
    DEFAULT_IDENTITY_CACHE_TTL_MS
}

fn default_identity_max_attempts() -> u32 {
    DEFAULT_IDENTITY_MAX_ATTEMPTS
}

fn default_identity_base_delay() -> u64 {
    DEFAULT_IDENTITY_BASE_DELAY_MS
}

fn default_identity_max_delay() -> u64 {
    DEFAULT_IDENTITY_MAX_DELAY_MS
}

fn default_reconnect_max_attempts() -> u32 {
    DEFAULT_RECONNECT_MAX_ATTEMPTS
}

fn default_reconnect_base_delay() -> u64 {
    DEFAULT_RECONNECT_BASE_DELAY_MS
}

fn default_reconnect_max_delay() -> u64 {
    DEFAULT_RECONNECT_MAX_DELAY_MS
}

fn default_health_interval() -> u64 {
    DEFAULT_HEALTH_INTERVAL_SECS
}

fn default_health_max_failures() -> u32 {
    DEFAULT_HEALTH_MAX_FAILURES
}

fn default_health_cache_ttl() -> u64 {
    DEFAULT_HEALTH_CACHE_TTL_MS
}

fn default_heartbeat_interval() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}

// ─── Default impls ──────────────────────────────────────────────────────

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            whoami_path: default_whoami_path(),
            health_path: default_health_path(),
            refresh_path: default_refresh_path(),
            music_ws_path: default_music_ws_path(),
            care_ws_path: default_care_ws_path(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            health_probe_timeout_ms: DEFAULT_HEALTH_PROBE_TIMEOUT_MS,
            ws_connect_timeout_ms: DEFAULT_WS_CONNECT_TIMEOUT_MS,
        }
    }
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            explicit_change_window_ms: DEFAULT_EXPLICIT_CHANGE_WINDOW_MS,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: DEFAULT_IDENTITY_CACHE_TTL_MS,
            max_attempts: DEFAULT_IDENTITY_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_IDENTITY_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_IDENTITY_MAX_DELAY_MS,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RECONNECT_MAX_DELAY_MS,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_HEALTH_INTERVAL_SECS,
            max_consecutive_failures: DEFAULT_HEALTH_MAX_FAILURES,
            cache_ttl_ms: DEFAULT_HEALTH_CACHE_TTL_MS,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE_URL)
    }
}

// ─── OrchestratorConfig impl ────────────────────────────────────────────

impl OrchestratorConfig {
    /// Create a config for the given API base URL.
    ///
    /// The socket base URL is derived by swapping the scheme
    /// (`http` → `ws`, `https` → `wss`).
    pub fn new(api_base_url: impl Into<String>) -> Self {
        let api_base_url = api_base_url.into();
        let ws_base_url = derive_ws_url(&api_base_url);
        Self {
            api_base_url,
            ws_base_url,
            token_store_path: None,
            test_mode: false,
            endpoints: EndpointConfig::default(),
            timeouts: TimeoutConfig::default(),
            checks: CheckConfig::default(),
            identity: IdentityConfig::default(),
            reconnect: ReconnectConfig::default(),
            health: HealthConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }

    /// Load config from environment variables.
    ///
    /// Required: `AUTH_ORCHESTRATOR_API_URL`
    ///
    /// Optional: `AUTH_ORCHESTRATOR_WS_URL`, `AUTH_ORCHESTRATOR_TOKEN_STORE`
    pub fn from_env() -> AuthResult<Self> {
        let api_url =
            std::env::var("AUTH_ORCHESTRATOR_API_URL").map_err(|_| AuthError::ConfigError {
                reason: "AUTH_ORCHESTRATOR_API_URL environment variable not set".into(),
            })?;

        let mut config = Self::new(api_url);
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from a TOML file, with environment variable overrides.
    #[cfg(feature = "config-toml")]
    pub fn from_file(path: impl AsRef<Path>) -> AuthResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| AuthError::ConfigError {
            reason: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;
        let mut config: Self = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("AUTH_ORCHESTRATOR_API_URL") {
            config.api_base_url = url;
        }
        if config.ws_base_url.is_empty() {
            config.ws_base_url = derive_ws_url(&config.api_base_url);
        }
        config.apply_env_overrides();

        Ok(config)
    }

    /// Discover and load config from the standard search path:
    ///
    /// 1. Explicit path (if `Some`)
    /// 2. `AUTH_ORCHESTRATOR_CONFIG` environment variable
    /// 3. `./orchestrator.toml`
    /// 4. `~/.config/auth-orchestrator/orchestrator.toml`
    ///
    /// Falls back to environment-variable-only config if no file is found.
    #[cfg(feature = "config-toml")]
    pub fn discover(explicit_path: Option<&Path>) -> AuthResult<Self> {
        if let Some(path) = explicit_path {
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var("AUTH_ORCHESTRATOR_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        let local_path = PathBuf::from("orchestrator.toml");
        if local_path.exists() {
            return Self::from_file(&local_path);
        }

        if let Some(config_path) = dirs_config_path() {
            if config_path.exists() {
                return Self::from_file(&config_path);
            }
        }

        Self::from_env()
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("AUTH_ORCHESTRATOR_WS_URL") {
            self.ws_base_url = url;
        }
        if let Ok(path) = std::env::var("AUTH_ORCHESTRATOR_TOKEN_STORE") {
            self.token_store_path = Some(PathBuf::from(path));
        }
    }

    // ─── Derived values ─────────────────────────────────────────────────

    pub fn whoami_url(&self) -> String {
        join_url(&self.api_base_url, &self.endpoints.whoami_path)
    }

    pub fn health_url(&self) -> String {
        join_url(&self.api_base_url, &self.endpoints.health_path)
    }

    pub fn refresh_url(&self) -> String {
        join_url(&self.api_base_url, &self.endpoints.refresh_path)
    }

    pub fn music_ws_url(&self) -> String {
        join_url(&self.ws_base_url, &self.endpoints.music_ws_path)
    }

    pub fn care_ws_url(&self) -> String {
        join_url(&self.ws_base_url, &self.endpoints.care_ws_path)
    }

    /// Delay before the single auth-gate retry.
    pub fn auth_gate_delay(&self) -> Duration {
        if self.test_mode {
            Duration::from_millis(AUTH_GATE_TEST_DELAY_MS)
        } else {
            Duration::from_millis(AUTH_GATE_DELAY_MS)
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn derive_ws_url(api_base_url: &str) -> String {
    if let Some(rest) = api_base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        DEFAULT_WS_BASE_URL.to_string()
    }
}

/// Platform-appropriate config file path.
#[cfg(feature = "config-toml")]
fn dirs_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(|dir| {
            PathBuf::from(dir)
                .join("auth-orchestrator")
                .join("orchestrator.toml")
        })
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok().map(|dir| {
            PathBuf::from(dir)
                .join(".config")
                .join("auth-orchestrator")
                .join("orchestrator.toml")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::fs;
    use std::sync::Mutex;
    use std::time::{SystemTime, UNIX_EPOCH};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "AUTH_ORCHESTRATOR_API_URL",
        "AUTH_ORCHESTRATOR_WS_URL",
        "AUTH_ORCHESTRATOR_TOKEN_STORE",
        "AUTH_ORCHESTRATOR_CONFIG",
    ];

    struct EnvGuard {
        saved: Vec<(&'static str, Option<OsString>)>,
    }

    impl EnvGuard {
        fn capture(keys: &[&'static str]) -> Self {
            let saved = keys.iter().map(|k| (*k, std::env::var_os(k))).collect();
            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in &self.saved {
                // SAFETY: tests touching the environment serialize on ENV_LOCK.
                unsafe {
                    if let Some(value) = value {
                        std::env::set_var(key, value);
                    } else {
                        std::env::remove_var(key);
                    }
                }
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn unique_temp_dir(label: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "auth-orchestrator-config-tests-{}-{}-{}",
            label,
            std::process::id(),
            now
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn clear_env() {
        for key in ENV_KEYS {
            // SAFETY: tests touching the environment serialize on ENV_LOCK.
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn test_new_defaults() {
        let config = OrchestratorConfig::new("https://api.example.com/");
        assert_eq!(config.ws_base_url, "wss://api.example.com/");
        assert_eq!(config.checks.debounce_ms, 1_000);
        assert_eq!(config.checks.min_interval_ms, 5_000);
        assert_eq!(config.identity.cache_ttl_ms, 3_000);
        assert_eq!(config.identity.max_attempts, 3);
        assert_eq!(config.timeouts.health_probe_timeout_ms, 1_500);
        assert_eq!(config.heartbeat.interval_secs, 25);
        assert!(config.health.enabled);
        assert!(!config.test_mode);
    }

    #[test]
    fn test_urls_are_joined_without_double_slashes() {
        let config = OrchestratorConfig::new("http://localhost:9000/");
        assert_eq!(config.whoami_url(), "http://localhost:9000/api/auth/whoami");
        assert_eq!(config.health_url(), "http://localhost:9000/health");
        assert_eq!(config.refresh_url(), "http://localhost:9000/api/auth/refresh");
        assert_eq!(config.music_ws_url(), "ws://localhost:9000/ws/music");
        assert_eq!(config.care_ws_url(), "ws://localhost:9000/ws/care");
    }

    #[test]
    fn test_auth_gate_delay_shortened_in_test_mode() {
        let mut config = OrchestratorConfig::default();
        assert_eq!(config.auth_gate_delay(), Duration::from_millis(500));
        config.test_mode = true;
        assert_eq!(config.auth_gate_delay(), Duration::from_millis(100));
    }

    #[cfg(feature = "config-toml")]
    #[test]
    fn test_deserialize_toml() {
        let toml_str = r#"
            api_base_url = "https://api.example.com"
            ws_base_url = "wss://ws.example.com"
            test_mode = true

            [checks]
            debounce_ms = 250

            [identity]
            max_attempts = 5

            [reconnect]
            max_attempts = 2

            [health]
            enabled = false
        "#;

        let config: OrchestratorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api_base_url, "https://api.example.com");
        assert_eq!(config.ws_base_url, "wss://ws.example.com");
        assert!(config.test_mode);
        assert_eq!(config.checks.debounce_ms, 250);
        assert_eq!(config.checks.min_interval_ms, 5_000);
        assert_eq!(config.identity.max_attempts, 5);
        assert_eq!(config.reconnect.max_attempts, 2);
        assert!(!config.health.enabled);
        assert_eq!(config.endpoints.whoami_path, "/api/auth/whoami");
    }

    #[test]
    fn test_from_env_requires_api_url_and_applies_overrides() {
        let _lock = env_lock();
        let _env = EnvGuard::capture(ENV_KEYS);
        clear_env();

        let missing = OrchestratorConfig::from_env().unwrap_err();
        assert!(matches!(missing, AuthError::ConfigError { .. }));
        assert!(missing.to_string().contains("AUTH_ORCHESTRATOR_API_URL"));

        // SAFETY: tests touching the environment serialize on ENV_LOCK.
        unsafe {
            std::env::set_var("AUTH_ORCHESTRATOR_API_URL", "http://env.example:8080");
            std::env::set_var("AUTH_ORCHESTRATOR_TOKEN_STORE", "/tmp/tokens.json");
        }

        let config = OrchestratorConfig::from_env().unwrap();
        assert_eq!(config.api_base_url, "http://env.example:8080");
        assert_eq!(config.ws_base_url, "ws://env.example:8080");
        assert_eq!(
            config.token_store_path.as_deref(),
            Some(Path::new("/tmp/tokens.json"))
        );
    }

    #[cfg(feature = "config-toml")]
    #[test]
    fn test_from_file_env_overrides_precedence() {
        let _lock = env_lock();
        let _env = EnvGuard::capture(ENV_KEYS);
        clear_env();

        let dir = unique_temp_dir("from-file-overrides");
        let config_path = dir.join("orchestrator.toml");
        fs::write(
            &config_path,
            r#"
api_base_url = "http://file.example"
ws_base_url = "ws://file.example"
"#,
        )
        .unwrap();

        // SAFETY: tests touching the environment serialize on ENV_LOCK.
        unsafe { std::env::set_var("AUTH_ORCHESTRATOR_WS_URL", "ws://env.example") };

        let config = OrchestratorConfig::from_file(&config_path).unwrap();
        assert_eq!(config.api_base_url, "http://file.example");
        assert_eq!(config.ws_base_url, "ws://env.example");

        fs::remove_dir_all(dir).unwrap();
    }

    #[cfg(feature = "config-toml")]
    #[test]
    fn test_from_file_derives_ws_url_from_final_api_url() {
        let _lock = env_lock();
        let _env = EnvGuard::capture(ENV_KEYS);
        clear_env();

        let dir = unique_temp_dir("derive-ws");
        let config_path = dir.join("orchestrator.toml");
        fs::write(&config_path, "api_base_url = \"https://file.example\"\n").unwrap();

        let config = OrchestratorConfig::from_file(&config_path).unwrap();
        assert_eq!(config.ws_base_url, "wss://file.example");
        assert_eq!(config.music_ws_url(), "wss://file.example/ws/music");

        // SAFETY: tests touching the environment serialize on ENV_LOCK.
        unsafe { std::env::set_var("AUTH_ORCHESTRATOR_API_URL", "http://env.example:9000") };

        let config = OrchestratorConfig::from_file(&config_path).unwrap();
        assert_eq!(config.api_base_url, "http://env.example:9000");
        assert_eq!(config.ws_base_url, "ws://env.example:9000");

        fs::remove_dir_all(dir).unwrap();
    }

    #[cfg(feature = "config-toml")]
    #[test]
    fn test_discover_prefers_explicit_then_env_pointer() {
        let _lock = env_lock();
        let _env = EnvGuard::capture(ENV_KEYS);
        clear_env();

        let dir = unique_temp_dir("discover");
        let explicit = dir.join("explicit.toml");
        let pointed = dir.join("pointed.toml");
        fs::write(&explicit, "api_base_url = \"http://explicit\"\n").unwrap();
        fs::write(&pointed, "api_base_url = \"http://pointed\"\n").unwrap();

        // SAFETY: tests touching the environment serialize on ENV_LOCK.
        unsafe { std::env::set_var("AUTH_ORCHESTRATOR_CONFIG", &pointed) };

        let config = OrchestratorConfig::discover(Some(&explicit)).unwrap();
        assert_eq!(config.api_base_url, "http://explicit");

        let config = OrchestratorConfig::discover(None).unwrap();
        assert_eq!(config.api_base_url, "http://pointed");

        fs::remove_dir_all(dir).unwrap();
    }

    #[cfg(feature = "config-toml")]
    #[test]
    fn test_from_file_missing_and_invalid_errors() {
        let _lock = env_lock();
        let dir = unique_temp_dir("from-file-errors");

        let missing = OrchestratorConfig::from_file(dir.join("missing.toml")).unwrap_err();
        assert!(matches!(missing, AuthError::ConfigError { .. }));
        assert!(missing.to_string().contains("Failed to read config file"));

        let invalid_path = dir.join("invalid.toml");
        fs::write(&invalid_path, "api_base_url = [").unwrap();
        let invalid = OrchestratorConfig::from_file(&invalid_path).unwrap_err();
        assert!(matches!(invalid, AuthError::ConfigError { .. }));

        fs::remove_dir_all(dir).unwrap();
    }
}
