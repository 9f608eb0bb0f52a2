//! Configuration loading and credential resolution
//!
//! Settings resolve with the following priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file never aborts startup: defaults are used and a warning
//! is logged. A TOML file that exists but does not parse is an error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default service host
pub const DEFAULT_HOST: &str = "trax.audionamix.com";

/// Default API endpoint prefix
pub const DEFAULT_ENDPOINT: &str = "/api/v1";

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default job polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Environment variable holding the access key
pub const ACCESS_KEY_ENV: &str = "AUDIONAMIX_ACCESS_KEY";

/// Environment variable holding the access secret
pub const SECRET_ENV: &str = "AUDIONAMIX_SECRET";

/// API key pair injected into every request
///
/// Constant for the lifetime of the process. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub access_secret: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, access_secret: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            access_secret: access_secret.into(),
        }
    }

    /// Value of the `Authorization` header: `ApiKey <key>:<secret>`
    pub fn authorization(&self) -> String {
        format!("ApiKey {}:{}", self.access_key, self.access_secret)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("access_secret", &"<redacted>")
            .finish()
    }
}

/// How response bodies are interpreted by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Parse every body as JSON (default)
    #[default]
    Json,
    /// Return the raw body text
    Text,
}

/// Immutable client configuration
///
/// Built once at client creation and passed by reference to every operation.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub credentials: Credentials,
    pub host: String,
    /// Explicit port; `None` uses the scheme default
    pub port: Option<u16>,
    pub endpoint: String,
    /// `true` to use https
    pub secure: bool,
    /// Idle timeout: a request fails once no bytes move for this long
    pub timeout: Duration,
    pub response_format: ResponseFormat,
    /// Log resolved URLs and headers at debug level
    pub debug: bool,
}

impl ClientConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            host: DEFAULT_HOST.to_string(),
            port: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            secure: true,
            timeout: DEFAULT_TIMEOUT,
            response_format: ResponseFormat::Json,
            debug: false,
        }
    }

    /// Build from TOML settings, keeping compiled defaults for absent keys
    pub fn from_toml(credentials: Credentials, toml: &TomlConfig) -> Self {
        let mut config = Self::new(credentials);
        if let Some(host) = &toml.host {
            config.host = host.clone();
        }
        config.port = toml.port;
        if let Some(endpoint) = &toml.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(secure) = toml.secure {
            config.secure = secure;
        }
        if let Some(secs) = toml.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(format) = toml.response_format {
            config.response_format = format;
        }
        config
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Build a config pointing at a full base URL such as `http://127.0.0.1:8080/api/v1`
    pub fn for_base_url(credentials: Credentials, base_url: &str) -> Result<Self> {
        let (secure, rest) = if let Some(rest) = base_url.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = base_url.strip_prefix("http://") {
            (false, rest)
        } else {
            return Err(Error::Config(format!(
                "Base URL must start with http:// or https://: {}",
                base_url
            )));
        };

        let (authority, endpoint) = match rest.find('/') {
            Some(idx) => (&rest[..idx], rest[idx..].trim_end_matches('/')),
            None => (rest, ""),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|e| Error::Config(format!("Invalid port '{}': {}", port, e)))?;
                (host, Some(port))
            }
            None => (authority, None),
        };

        if host.is_empty() {
            return Err(Error::Config(format!("Base URL has no host: {}", base_url)));
        }

        Ok(Self::new(credentials)
            .with_secure(secure)
            .with_host(host)
            .with_port(port)
            .with_endpoint(endpoint))
    }

    /// Scheme, host, optional port and endpoint prefix
    ///
    /// The port is omitted when it is the scheme default.
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        let default_port = if self.secure { 443 } else { 80 };
        match self.port {
            Some(port) if port != default_port => {
                format!("{}://{}:{}{}", scheme, self.host, port, self.endpoint)
            }
            _ => format!("{}://{}{}", scheme, self.host, self.endpoint),
        }
    }
}

/// Configuration loaded from the TOML file
///
/// Every field is optional; absent keys fall back to compiled defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub secure: Option<bool>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    /// `json` (default) or `text`
    #[serde(default)]
    pub response_format: Option<ResponseFormat>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub access_secret: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TomlConfig {
    /// Polling interval from TOML, or the compiled default
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Platform config file location: `<config_dir>/trax/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("trax").join("config.toml"))
}

/// Load TOML configuration
///
/// With an explicit path the file must exist. Without one, the platform
/// default location is tried and a missing file yields defaults.
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => match default_config_path() {
            Some(p) if p.exists() => p,
            Some(p) => {
                debug!("No config file at {}, using defaults", p.display());
                return Ok(TomlConfig::default());
            }
            None => {
                warn!("Could not determine config directory, using defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Resolve credentials from CLI → ENV → TOML
///
/// Each half of the pair resolves independently. Blank values are skipped.
pub fn resolve_credentials(
    cli_key: Option<&str>,
    cli_secret: Option<&str>,
    toml: &TomlConfig,
) -> Result<Credentials> {
    let access_key = resolve_value(cli_key, ACCESS_KEY_ENV, toml.access_key.as_deref());
    let access_secret = resolve_value(cli_secret, SECRET_ENV, toml.access_secret.as_deref());

    match (access_key, access_secret) {
        (Some(key), Some(secret)) => Ok(Credentials::new(key, secret)),
        (None, _) => Err(Error::Config(format!(
            "Access key not configured. Please set it using one of:\n\
             1. Command line: --access-key <key>\n\
             2. Environment: export {}=<key>\n\
             3. TOML config: access_key = \"<key>\"",
            ACCESS_KEY_ENV
        ))),
        (_, None) => Err(Error::Config(format!(
            "Access secret not configured. Please set it using one of:\n\
             1. Command line: --secret <secret>\n\
             2. Environment: export {}=<secret>\n\
             3. TOML config: access_secret = \"<secret>\"",
            SECRET_ENV
        ))),
    }
}

fn resolve_value(cli: Option<&str>, env_name: &str, toml: Option<&str>) -> Option<String> {
    if let Some(v) = cli.filter(|v| is_valid_key(v)) {
        return Some(v.to_string());
    }
    if let Some(v) = std::env::var(env_name).ok().filter(|v| is_valid_key(v)) {
        return Some(v);
    }
    toml.filter(|v| is_valid_key(v)).map(str::to_string)
}

/// Validate a credential value (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
