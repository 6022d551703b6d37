//! Fetcher and parser configuration, plus the optional TOML config file.
//!
//! The config file is optional; a missing file yields `ParserConfig::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos. Range checks run after parsing so a bad value is
//! reported with the offending field name.
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use std::path::Path;
use thiserror::Error;

/// User agent sent when none is configured. Several large sitemap hosts
/// answer bot-looking agents with 403, so this mirrors a current desktop browser.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Inclusive bounds shared by `max_retries` and `max_depth`.
pub const MIN_LIMIT: u64 = 1;
pub const MAX_LIMIT: u64 = 10;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A numeric setting fell outside its allowed range.
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Settings for a single logical fetch.
///
/// Fields are public so callers can override them between calls; a change
/// takes effect on the next fetch. The proxy URI may carry credentials, so the
/// Debug impl masks it.
#[derive(Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Only accept responses whose `Content-Type` is on the allow-list.
    pub validate_content_type: bool,

    /// Extra attempts after the first one (1..=10).
    pub max_retries: u32,

    /// Applied separately to connect/header receipt and to each body read.
    pub timeout_ms: u64,

    /// Linear pause between attempts (`retry_delay_ms * attempt`). 0 disables.
    pub retry_delay_ms: u64,

    /// Ceiling for both the raw body and the decompressed document.
    pub max_body_bytes: usize,

    pub user_agent: String,

    /// Route requests through this proxy. Upstream certificates are not
    /// validated when a proxy is set.
    #[serde(deserialize_with = "deserialize_secret")]
    pub proxy_uri: Option<SecretString>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            validate_content_type: true,
            max_retries: 1,
            timeout_ms: 3000,
            retry_delay_ms: 250,
            // Sitemap protocol limit for an uncompressed file
            max_body_bytes: 50 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy_uri: None,
        }
    }
}

/// SEC-015: Mask proxy credentials in Debug output.
impl std::fmt::Debug for FetchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchConfig")
            .field("validate_content_type", &self.validate_content_type)
            .field("max_retries", &self.max_retries)
            .field("timeout_ms", &self.timeout_ms)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("user_agent", &self.user_agent)
            .field("proxy_uri", &self.proxy_uri.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl FetchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("max_retries", u64::from(self.max_retries), MIN_LIMIT, MAX_LIMIT)
    }

    /// Proxy URI in plain text, for building the HTTP client.
    pub(crate) fn proxy(&self) -> Option<&str> {
        self.proxy_uri.as_ref().map(|p| p.expose_secret())
    }
}

/// Settings for a recursive sitemap run.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Index levels that may be expanded below the root (1..=10).
    pub max_depth: usize,

    /// Maximum in-flight child fetches per index level.
    pub concurrency: usize,

    /// When non-zero, children are fetched in batches of `concurrency`
    /// with this pause between batches.
    pub batch_pause_ms: u64,

    pub fetch: FetchConfig,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            concurrency: 10,
            batch_pause_ms: 0,
            fetch: FetchConfig {
                max_retries: 3,
                ..FetchConfig::default()
            },
        }
    }
}

impl ParserConfig {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("max_depth", self.max_depth as u64, MIN_LIMIT, MAX_LIMIT)?;
        check_range("concurrency", self.concurrency as u64, 1, u64::MAX)?;
        self.fetch.validate()
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(ParserConfig::default())`
    /// - Empty file → `Ok(ParserConfig::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Out-of-range values → `Err(ConfigError::OutOfRange)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        let raw = content.parse::<toml::Table>().ok();
        if let Some(raw) = &raw {
            warn_unknown_keys(raw);
        }

        let mut config: ParserConfig = toml::from_str(&content)?;
        // A `[fetch]` table without `max_retries` falls back to FetchConfig's
        // single retry; keep the parser-level default instead.
        if !raw.as_ref().is_some_and(fetch_sets_retries) {
            config.fetch.max_retries = ParserConfig::default().fetch.max_retries;
        }
        config.validate()?;

        tracing::info!(
            path = %path.display(),
            max_depth = config.max_depth,
            max_retries = config.fetch.max_retries,
            "Loaded configuration"
        );
        Ok(config)
    }
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    const TOP_LEVEL: [&str; 4] = ["max_depth", "concurrency", "batch_pause_ms", "fetch"];
    const FETCH: [&str; 7] = [
        "validate_content_type",
        "max_retries",
        "timeout_ms",
        "retry_delay_ms",
        "max_body_bytes",
        "user_agent",
        "proxy_uri",
    ];

    for key in raw.keys() {
        if !TOP_LEVEL.contains(&key.as_str()) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
        }
    }
    if let Some(fetch) = raw.get("fetch").and_then(toml::Value::as_table) {
        for key in fetch.keys() {
            if !FETCH.contains(&key.as_str()) {
                tracing::warn!(key = %format!("fetch.{key}"), "Unknown key in config file, ignoring");
            }
        }
    }
}

fn fetch_sets_retries(raw: &toml::Table) -> bool {
    raw.get("fetch")
        .and_then(toml::Value::as_table)
        .is_some_and(|fetch| fetch.contains_key("max_retries"))
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()).map(SecretString::from))
}

// ============================================================================
// Tests
// ============================================================================
