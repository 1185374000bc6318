//! Configuration parsing and validation for chatrelay.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

/// Conventional environment variable consulted when the config file does not
/// name an upstream API key.
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

/// Root configuration structure.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:5001")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:5001".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Upstream chat-completions API configuration.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Full URL of the chat-completions endpoint.
    pub url: String,
    /// Model substituted when the client request names none.
    pub default_model: String,
    /// Bearer token for the upstream API. Missing key is a warning at
    /// startup; requests fail individually until one is configured.
    pub api_key: Option<ApiKey>,
    /// TCP connect timeout for upstream calls, in seconds.
    pub connect_timeout_secs: u64,
    /// Optional whole-request timeout, in seconds. Left unset by default:
    /// a whole-request timeout would sever long-lived streams.
    pub request_timeout_secs: Option<u64>,
}

fn default_upstream_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "openai/gpt-5.1".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            default_model: default_model(),
            api_key: None,
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// The inner `SecretString` ensures the key value is:
/// - Zeroized in memory when dropped
/// - Never exposed via Debug or Display
/// - Only accessible via `.expose_secret()` (grep-auditable)
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value. Every call site is auditable via `grep expose_secret`.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// How the upstream API key was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Key was a literal string in config (no ${} references)
    Literal,
    /// Key contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Key was taken from the conventional env var (holds var name)
    Convention(String),
    /// No key available
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set: {message}")]
    EnvVar { var: String, message: String },
}

/// Raw upstream config deserialized directly from TOML.
/// api_key is `Option<String>` so it may contain `${VAR}` references not yet expanded.
#[derive(Deserialize)]
pub struct RawUpstreamConfig {
    #[serde(default = "default_upstream_url")]
    url: String,
    #[serde(default = "default_model")]
    default_model: String,
    api_key: Option<String>,
    #[serde(default = "default_connect_timeout")]
    connect_timeout_secs: u64,
    request_timeout_secs: Option<u64>,
}

impl Default for RawUpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            default_model: default_model(),
            api_key: None,
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: None,
        }
    }
}

/// Raw configuration deserialized directly from TOML.
#[derive(Deserialize, Default)]
pub struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    upstream: RawUpstreamConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// The closure-based design makes this testable without touching global env state.
/// Supports multiple `${VAR}` in one string. Fails on first missing variable,
/// unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            message: format!("Unclosed '${{' in config value: {}", input),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            message: format!("Environment variable '{}' is not set", var_name),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

impl Config {
    /// Convert raw (deserialized) config to final config, resolving the API key.
    ///
    /// Resolution order:
    /// - If `upstream.api_key` contains `${VAR}`: expand via `lookup`, source = `EnvExpanded`
    /// - If `upstream.api_key` is a literal string: wrap directly, source = `Literal`
    /// - If `upstream.api_key` is absent: consult the conventional variable
    ///   (`OPENROUTER_API_KEY`) via `lookup`, source = `Convention(..)` or `None`
    ///
    /// The lookup closure stands in for the process environment so resolution
    /// is testable without mutating global env state.
    pub fn from_raw_with<F>(raw: RawConfig, lookup: F) -> Result<(Self, KeySource), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (api_key, source) = match raw.upstream.api_key {
            Some(ref raw_key) if raw_key.contains("${") => {
                let expanded = expand_env_vars_with(raw_key, &lookup)?;
                (Some(ApiKey::from(expanded)), KeySource::EnvExpanded)
            }
            Some(ref raw_key) => (Some(ApiKey::from(raw_key.as_str())), KeySource::Literal),
            None => match lookup(API_KEY_ENV) {
                Some(value) => (
                    Some(ApiKey::from(value)),
                    KeySource::Convention(API_KEY_ENV.to_string()),
                ),
                None => (None, KeySource::None),
            },
        };

        let config = Config {
            server: raw.server,
            upstream: UpstreamConfig {
                url: raw.upstream.url,
                default_model: raw.upstream.default_model,
                api_key,
                connect_timeout_secs: raw.upstream.connect_timeout_secs,
                request_timeout_secs: raw.upstream.request_timeout_secs,
            },
            logging: raw.logging,
        };

        config.validate()?;
        Ok((config, source))
    }

    /// Convert raw config using the real process environment.
    pub fn from_raw(raw: RawConfig) -> Result<(Self, KeySource), ConfigError> {
        Self::from_raw_with(raw, |name| std::env::var(name).ok())
    }

    /// Parse configuration from a TOML string, resolving the key from the
    /// real process environment.
    pub fn parse_str(content: &str) -> Result<(Self, KeySource), ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
        Self::from_raw(raw)
    }

    /// Load configuration from a TOML file.
    ///
    /// A missing file is not an error: the relay is configured entirely by
    /// defaults plus the conventional env var in that case. An unreadable or
    /// invalid file is a hard startup error.
    pub fn load(path: impl AsRef<Path>) -> Result<(Self, KeySource), ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            return Self::from_raw(RawConfig::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::parse_str(&content)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.url.is_empty() {
            return Err(ConfigError::Validation("Upstream URL is empty".to_string()));
        }
        if self.upstream.default_model.is_empty() {
            return Err(ConfigError::Validation(
                "Default model is empty".to_string(),
            ));
        }
        if self.upstream.api_key.is_none() {
            tracing::warn!(
                env = API_KEY_ENV,
                "No upstream API key configured - chat requests will fail until one is set"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Lookup that resolves nothing, for tests exercising the no-key paths.
    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn parse_with<F>(content: &str, lookup: F) -> Result<(Config, KeySource), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = toml::from_str(content).unwrap();
        Config::from_raw_with(raw, lookup)
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [server]
            listen = "127.0.0.1:9000"
        "#;

        let (config, source) = parse_with(toml, no_env).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(
            config.upstream.url,
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert_eq!(config.upstream.default_model, "openai/gpt-5.1");
        assert!(config.upstream.api_key.is_none());
        assert_eq!(source, KeySource::None);
    }

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let (config, _) = parse_with("", no_env).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:5001");
        assert_eq!(config.upstream.connect_timeout_secs, 10);
        assert!(config.upstream.request_timeout_secs.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [server]
            listen = "0.0.0.0:8080"

            [upstream]
            url = "https://example.com/v1/chat/completions"
            default_model = "test/model-1"
            api_key = "literal-key"
            connect_timeout_secs = 5
            request_timeout_secs = 300

            [logging]
            level = "debug"
        "#;

        let (config, source) = parse_with(toml, no_env).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.upstream.url, "https://example.com/v1/chat/completions");
        assert_eq!(config.upstream.default_model, "test/model-1");
        assert_eq!(config.upstream.connect_timeout_secs, 5);
        assert_eq!(config.upstream.request_timeout_secs, Some(300));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(source, KeySource::Literal);
        assert_eq!(
            config.upstream.api_key.as_ref().unwrap().expose_secret(),
            "literal-key"
        );
    }

    #[test]
    fn test_empty_upstream_url_rejected() {
        let toml = r#"
            [upstream]
            url = ""
        "#;

        let result = parse_with(toml, no_env);
        assert!(result.is_err());
    }

    #[test]
    fn test_api_key_debug_redaction() {
        let key = ApiKey::from("super-secret-token");
        let debug_output = format!("{:?}", key);
        assert_eq!(debug_output, "[REDACTED]");
        assert!(!debug_output.contains("super-secret"));
    }

    #[test]
    fn test_api_key_display_redaction() {
        let key = ApiKey::from("super-secret-token");
        let display_output = format!("{}", key);
        assert_eq!(display_output, "[REDACTED]");
        assert!(!display_output.contains("super-secret"));
    }

    #[test]
    fn test_api_key_serialize_redaction() {
        let key = ApiKey::from("real-secret-value");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"[REDACTED]\"");
        assert!(!json.contains("real-secret"));
    }

    #[test]
    fn test_api_key_expose_secret() {
        let key = ApiKey::from("the-actual-value");
        assert_eq!(key.expose_secret(), "the-actual-value");
    }

    #[test]
    fn test_config_debug_redaction() {
        let toml = r#"
            [upstream]
            api_key = "sk-or-v1-secret"
        "#;

        let (config, _) = parse_with(toml, no_env).unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-or-v1-secret"));
    }

    // ── Expansion tests (using lookup closures, no global env state) ──

    #[test]
    fn test_expand_single_var() {
        let lookup = |name: &str| match name {
            "MY_KEY" => Some("sk-abcd".to_string()),
            _ => None,
        };
        let result = expand_env_vars_with("${MY_KEY}", lookup).unwrap();
        assert_eq!(result, "sk-abcd");
    }

    #[test]
    fn test_expand_mixed_literal_and_var() {
        let lookup = |name: &str| match name {
            "KEY" => Some("resolved".to_string()),
            _ => None,
        };
        let result = expand_env_vars_with("prefix-${KEY}-suffix", lookup).unwrap();
        assert_eq!(result, "prefix-resolved-suffix");
    }

    #[test]
    fn test_expand_no_vars_passthrough() {
        let lookup = |_: &str| -> Option<String> { panic!("should not be called") };
        let result = expand_env_vars_with("literal-value", lookup).unwrap();
        assert_eq!(result, "literal-value");
    }

    #[test]
    fn test_expand_missing_var_fails() {
        let result = expand_env_vars_with("${MISSING}", no_env);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("MISSING"), "Error should name the variable");
    }

    #[test]
    fn test_expand_unclosed_brace_fails() {
        let lookup = |_: &str| -> Option<String> { panic!("should not be called") };
        let result = expand_env_vars_with("${UNCLOSED", lookup);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string().to_lowercase();
        assert!(err.contains("unclosed"));
    }

    #[test]
    fn test_expand_empty_var_name_fails() {
        let lookup = |_: &str| -> Option<String> { panic!("should not be called") };
        let result = expand_env_vars_with("${}", lookup);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string().to_lowercase();
        assert!(err.contains("empty"));
    }

    #[test]
    fn test_expand_dollar_without_brace_passthrough() {
        let lookup = |_: &str| -> Option<String> { panic!("should not be called") };
        let result = expand_env_vars_with("$NOT_A_VAR", lookup).unwrap();
        assert_eq!(result, "$NOT_A_VAR");
    }

    // ── Key resolution tests ──

    #[test]
    fn test_key_env_expanded() {
        let toml = r#"
            [upstream]
            api_key = "${RELAY_TEST_KEY}"
        "#;
        let lookup = |name: &str| match name {
            "RELAY_TEST_KEY" => Some("expanded-token".to_string()),
            _ => None,
        };

        let (config, source) = parse_with(toml, lookup).unwrap();
        assert_eq!(source, KeySource::EnvExpanded);
        assert_eq!(
            config.upstream.api_key.as_ref().unwrap().expose_secret(),
            "expanded-token"
        );
    }

    #[test]
    fn test_key_convention_fallback() {
        let lookup = |name: &str| match name {
            "OPENROUTER_API_KEY" => Some("convention-token".to_string()),
            _ => None,
        };

        let (config, source) = parse_with("", lookup).unwrap();
        assert_eq!(
            source,
            KeySource::Convention("OPENROUTER_API_KEY".to_string())
        );
        assert_eq!(
            config.upstream.api_key.as_ref().unwrap().expose_secret(),
            "convention-token"
        );
    }

    #[test]
    fn test_key_literal_wins_over_convention() {
        let toml = r#"
            [upstream]
            api_key = "from-config"
        "#;
        let lookup = |name: &str| match name {
            "OPENROUTER_API_KEY" => Some("from-env".to_string()),
            _ => None,
        };

        let (config, source) = parse_with(toml, lookup).unwrap();
        assert_eq!(source, KeySource::Literal);
        assert_eq!(
            config.upstream.api_key.as_ref().unwrap().expose_secret(),
            "from-config"
        );
    }

    #[test]
    fn test_key_missing_env_var_fails() {
        let toml = r#"
            [upstream]
            api_key = "${RELAY_DEFINITELY_MISSING}"
        "#;

        let result = parse_with(toml, no_env);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("RELAY_DEFINITELY_MISSING"));
    }
}
