//! Configuration management

use std::{env, net::IpAddr, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::credential::Principal;
use crate::keys::SigningKey;
use crate::{Error, Result};

/// Key id used when a secret is configured without an id.
pub const DEFAULT_KEY_ID: &str = "primary";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// HTTP server
    pub server: ServerConfig,
    /// Session tokens
    pub tokens: TokenConfig,
    /// Failed-attempt lockout
    pub lockout: LockoutConfig,
    /// Per-source request throttle
    pub throttle: ThrottleConfig,
    /// Signing keys
    pub keys: KeysConfig,
    /// Credential store
    pub credentials: CredentialsConfig,
    /// Admin endpoints
    pub admin: AdminConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // AUTH_GATEWAY_SERVER__PORT=8080 style overrides
        figment = figment.merge(Env::prefixed("AUTH_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars()?;
        config.validate()?;

        Ok(config)
    }

    /// Reject settings the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.server
            .host
            .parse::<IpAddr>()
            .map_err(|e| Error::Config(format!("Invalid host {:?}: {e}", self.server.host)))?;
        if self.tokens.ttl < Duration::from_secs(1) {
            return Err(Error::Config("tokens.ttl must be at least 1s".to_string()));
        }
        if self.tokens.sweep_interval.is_zero() {
            return Err(Error::Config(
                "tokens.sweep_interval must be greater than zero".to_string(),
            ));
        }
        if self.lockout.enabled && (self.lockout.max_failures == 0 || self.lockout.window.is_zero()) {
            return Err(Error::Config(
                "lockout.max_failures and lockout.window must be greater than zero".to_string(),
            ));
        }
        if self.throttle.enabled && self.throttle.requests_per_second == 0 {
            return Err(Error::Config(
                "throttle.requests_per_second must be greater than zero".to_string(),
            ));
        }
        if self.keys.rotation_interval.is_some_and(|i| i.is_zero()) {
            return Err(Error::Config(
                "keys.rotation_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} in path-like values
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        if let Some(file) = &mut self.credentials.file {
            let expanded = expand_string(&re, &file.to_string_lossy());
            *file = PathBuf::from(expand_home(&expanded));
        }
        Ok(())
    }
}

fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

fn expand_string(re: &Regex, value: &str) -> String {
    re.replace_all(value, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

/// Resolve `env:VAR_NAME` references. Unset variables are an error.
fn resolve_env_ref(value: &str) -> Result<String> {
    match value.strip_prefix("env:") {
        Some(var_name) => env::var(var_name)
            .map_err(|_| Error::Config(format!("Environment variable {var_name} is not set"))),
        None => Ok(value.to_string()),
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a trusted reverse proxy.
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39500,
            request_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(30),
            trust_forwarded_for: false,
        }
    }
}

/// Session token settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Token lifetime
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// How often expired entries are swept from the token cache
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Failed-attempt lockout settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    /// Enable lockout
    pub enabled: bool,
    /// Failures within `window` that lock a principal
    pub max_failures: u32,
    /// Sliding window length
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failures: 5,
            window: Duration::from_secs(60),
        }
    }
}

/// Per-source request throttle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Enable the throttle
    pub enabled: bool,
    /// Sustained authentication requests per second per source
    pub requests_per_second: u32,
    /// Burst size
    pub burst: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 10,
            burst: 20,
        }
    }
}

/// Signing key settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Identifier of the initial key (random when unset)
    pub initial_key_id: Option<String>,
    /// Hex key material for the initial key.
    /// Supports: literal value or `env:VAR_NAME`. Random when unset.
    pub initial_secret: Option<String>,
    /// How long a rotated-out key keeps verifying
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
    /// Rotate automatically on this interval
    #[serde(default, with = "humantime_serde::option")]
    pub rotation_interval: Option<Duration>,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            initial_key_id: None,
            initial_secret: None,
            grace_period: Duration::from_secs(3600),
            rotation_interval: None,
        }
    }
}

impl KeysConfig {
    /// Build the initial signing key.
    pub fn initial_signing_key(&self) -> Result<SigningKey> {
        let secret = self.initial_secret.as_deref().map(resolve_env_ref).transpose()?;
        let key = match (self.initial_key_id.as_deref(), secret) {
            (id, Some(hex)) => SigningKey::from_hex(id.unwrap_or(DEFAULT_KEY_ID), &hex)?,
            (Some(id), None) => SigningKey::generate(id)?,
            (None, None) => SigningKey::generate_random_id(),
        };
        Ok(key)
    }

    /// Whether signing keys are regenerated on every start.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        self.initial_secret.is_none()
    }
}

/// Credential store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Maximum time to wait for a credential lookup
    #[serde(with = "humantime_serde")]
    pub lookup_timeout: Duration,
    /// YAML credentials file (supports `${VAR}` and `~`). Takes precedence
    /// over inline `principals`.
    pub file: Option<PathBuf>,
    /// Inline principals
    pub principals: Vec<Principal>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(2),
            file: None,
            principals: Vec::new(),
        }
    }
}

/// Admin endpoint settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bearer token for `/v1/admin/*`.
    /// Supports: literal value, `env:VAR_NAME`, or `auto` (generates random token).
    /// Admin endpoints answer 503 when unset.
    pub bearer_token: Option<String>,
}

impl AdminConfig {
    /// Resolve the bearer token (expand env vars, generate if `auto`)
    pub fn resolve_bearer_token(&self) -> Result<Option<String>> {
        match self.bearer_token.as_deref() {
            None => Ok(None),
            Some("auto") => {
                let random_bytes: [u8; 32] = rand::random();
                Ok(Some(format!(
                    "adm_{}",
                    base64::Engine::encode(
                        &base64::engine::general_purpose::URL_SAFE_NO_PAD,
                        random_bytes
                    )
                )))
            }
            Some(token) => resolve_env_ref(token).map(Some),
        }
    }
}

/// Human-readable `Duration` serde: `"30s"`, `"5m"`, `"2h"`, `"100ms"`, or bare seconds.
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize as whole seconds (`"30s"`), or milliseconds (`"100ms"`) when
    /// the value has a fractional second.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize a duration string.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse a duration string.
    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            number(s, ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            scaled(s, secs, 1)
        } else if let Some(mins) = s.strip_suffix('m') {
            scaled(s, mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            scaled(s, hours, 3600)
        } else {
            scaled(s, s, 1)
        }
    }

    fn number(input: &str, digits: &str) -> Result<u64, String> {
        digits
            .parse::<u64>()
            .map_err(|e| format!("invalid duration {input:?}: {e}"))
    }

    fn scaled(input: &str, digits: &str, factor: u64) -> Result<Duration, String> {
        number(input, digits)?
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration {input:?} is out of range"))
    }

    /// Same format for `Option<Duration>`.
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialize `Some` as a duration string, `None` as null.
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize an optional duration string.
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| super::parse(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tokens.ttl, Duration::from_secs(3600));
        assert_eq!(config.lockout.max_failures, 5);
        assert!(config.admin.bearer_token.is_none());
    }

    #[test]
    fn yaml_sections_deserialize() {
        let yaml = r#"
server:
  port: 8443
  trust_forwarded_for: true
tokens:
  ttl: 15m
  sweep_interval: 30s
lockout:
  max_failures: 3
  window: 2m
keys:
  initial_key_id: k1
  grace_period: 1h
  rotation_interval: 24h
credentials:
  lookup_timeout: 500ms
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 8443);
        assert!(config.server.trust_forwarded_for);
        assert_eq!(config.tokens.ttl, Duration::from_secs(900));
        assert_eq!(config.lockout.window, Duration::from_secs(120));
        assert_eq!(config.keys.grace_period, Duration::from_secs(3600));
        assert_eq!(config.keys.rotation_interval, Some(Duration::from_secs(86_400)));
        assert_eq!(config.credentials.lookup_timeout, Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_ttl_and_bad_host() {
        let mut config = Config::default();
        config.tokens.ttl = Duration::ZERO;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.tokens.ttl = Duration::from_millis(500);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.tokens.ttl = Duration::from_secs(1);
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.server.host = "not a host".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn load_reads_file_and_principals() {
        let principal = Principal::new("alice", "s3cret");
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "tokens:\n  ttl: 60s\ncredentials:\n  principals:\n    - id: alice\n      credential: \"{}\"",
            principal.credential.encode()
        )
        .unwrap();

        let config = Config::load(Some(f.path())).unwrap();
        assert_eq!(config.tokens.ttl, Duration::from_secs(60));
        assert_eq!(config.credentials.principals.len(), 1);
        assert_eq!(config.credentials.principals[0].id, "alice");
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let result = Config::load(Some(Path::new("/nonexistent/gateway.yaml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn initial_key_from_hex_secret() {
        let keys = KeysConfig {
            initial_key_id: Some("k7".to_string()),
            initial_secret: Some("ab".repeat(32)),
            ..Default::default()
        };
        let key = keys.initial_signing_key().unwrap();
        assert_eq!(key.id(), "k7");
        assert_eq!(key.material(), vec![0xab; 32].as_slice());
        assert!(!keys.is_ephemeral());
    }

    #[test]
    fn initial_key_from_unset_env_reference_fails() {
        let keys = KeysConfig {
            initial_secret: Some("env:AUTH_GW_TEST_UNSET_SIGNING_KEY".to_string()),
            ..Default::default()
        };
        assert!(matches!(keys.initial_signing_key(), Err(Error::Config(_))));
    }

    #[test]
    fn initial_key_generated_when_unset() {
        let keys = KeysConfig::default();
        let key = keys.initial_signing_key().unwrap();
        assert!(key.id().starts_with("k-"));
        assert!(keys.is_ephemeral());
    }

    #[test]
    fn admin_token_auto_generates() {
        let admin = AdminConfig {
            bearer_token: Some("auto".to_string()),
        };
        let token = admin.resolve_bearer_token().unwrap().unwrap();
        assert!(token.starts_with("adm_"));
        assert!(AdminConfig::default().resolve_bearer_token().unwrap().is_none());
    }

    #[test]
    fn credentials_file_path_expands_vars() {
        let mut config = Config::default();
        config.credentials.file = Some(PathBuf::from("${AUTH_GW_TEST_UNSET_DIR:-/etc/gw}/creds.yaml"));
        config.expand_env_vars().unwrap();
        assert_eq!(config.credentials.file, Some(PathBuf::from("/etc/gw/creds.yaml")));
    }

    #[test]
    fn humantime_parse_units() {
        assert_eq!(humantime_serde::parse("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(humantime_serde::parse("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(humantime_serde::parse("42").unwrap(), Duration::from_secs(42));
        assert!(humantime_serde::parse("soon").is_err());
    }

    #[test]
    fn humantime_parse_rejects_overflow() {
        let huge = format!("{}h", u64::MAX / 1000);
        assert!(humantime_serde::parse(&huge).unwrap_err().contains("out of range"));
        assert!(humantime_serde::parse(&format!("{}m", u64::MAX)).is_err());
        assert_eq!(
            humantime_serde::parse(&format!("{}s", u64::MAX)).unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn humantime_serialize_keeps_sub_second_values() {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(with = "humantime_serde")]
            value: Duration,
        }
        let render = |value| serde_json::to_string(&Wrapper { value }).unwrap();

        assert_eq!(render(Duration::from_millis(100)), r#"{"value":"100ms"}"#);
        assert_eq!(render(Duration::from_millis(1500)), r#"{"value":"1500ms"}"#);
        assert_eq!(render(Duration::from_secs(30)), r#"{"value":"30s"}"#);
    }

    #[test]
    fn load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        config.load_env_files();
    }
}
