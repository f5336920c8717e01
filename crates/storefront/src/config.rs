//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `APOTHECA_BACKEND_URL` - Base URL of the hosted backend project
//! - `APOTHECA_ANON_KEY` - Public (anon) API key sent with every request
//!
//! ## Optional
//! - `APOTHECA_EMAIL_REDIRECT_URL` - Where sign-up confirmation emails land
//! - `APOTHECA_SESSION_FILE` - JSON file used to persist the session
//! - `APOTHECA_AUTO_REFRESH` - Renew access tokens ahead of expiry (default: true)
//! - `APOTHECA_REQUEST_TIMEOUT_SECS` - Per-request HTTP timeout (default: 10)
//! - `APOTHECA_LOADING_TIMEOUT_MS` - Safety timeout for the loading flag (default: 2000)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment tag

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const MIN_ANON_KEY_LENGTH: usize = 20;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Default bound on how long consumers wait for the initial session check.
pub const DEFAULT_LOADING_TIMEOUT: Duration = Duration::from_secs(2);

/// Default per-request timeout for the hosted backend.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "your_",
    "changeme",
    "replace",
    "placeholder",
    "anon-key",
    "anon_key",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "put-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront session-core configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// Hosted backend connection settings
    pub backend: BackendConfig,
    /// Session store behavior
    pub session: SessionConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment tag (e.g. "production")
    pub sentry_environment: Option<String>,
}

/// Hosted backend connection settings.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct BackendConfig {
    /// Project base URL, always ending in `/`
    pub url: Url,
    /// Public API key
    pub anon_key: SecretString,
    /// Redirect target embedded in confirmation emails
    pub email_redirect_to: Option<Url>,
    /// File the session is persisted to between runs
    pub session_file: Option<PathBuf>,
    /// Renew the access token before it expires
    pub auto_refresh: bool,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url.as_str())
            .field("anon_key", &"[REDACTED]")
            .field("email_redirect_to", &self.email_redirect_to.as_ref().map(Url::as_str))
            .field("session_file", &self.session_file)
            .field("auto_refresh", &self.auto_refresh)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Session store behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound on how long `loading` stays true after `initialize()`
    pub loading_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            loading_timeout: DEFAULT_LOADING_TIMEOUT,
        }
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the API key fails validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let backend = BackendConfig::from_env()?;
        let session = SessionConfig {
            loading_timeout: Duration::from_millis(parse_env_or_default(
                "APOTHECA_LOADING_TIMEOUT_MS",
                2000_u64,
            )?),
        };

        Ok(Self {
            backend,
            session,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }
}

impl BackendConfig {
    /// Build a configuration with defaults for everything but the URL and key.
    ///
    /// The key is not strength-checked here; `from_env` does that for
    /// deployed configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if `url` is not an absolute
    /// http(s) URL.
    pub fn new(url: &str, anon_key: SecretString) -> Result<Self, ConfigError> {
        Ok(Self {
            url: parse_base_url("APOTHECA_BACKEND_URL", url)?,
            anon_key,
            email_redirect_to: None,
            session_file: None,
            auto_refresh: true,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    fn from_env() -> Result<Self, ConfigError> {
        let url = get_required_env("APOTHECA_BACKEND_URL")?;
        let anon_key = get_validated_secret("APOTHECA_ANON_KEY")?;

        let mut config = Self::new(&url, anon_key)?;
        config.email_redirect_to = get_optional_env("APOTHECA_EMAIL_REDIRECT_URL")
            .map(|raw| {
                Url::parse(&raw).map_err(|e| {
                    ConfigError::InvalidEnvVar(
                        "APOTHECA_EMAIL_REDIRECT_URL".to_string(),
                        e.to_string(),
                    )
                })
            })
            .transpose()?;
        config.session_file = get_optional_env("APOTHECA_SESSION_FILE").map(PathBuf::from);
        config.auto_refresh = parse_env_or_default("APOTHECA_AUTO_REFRESH", true)?;
        config.request_timeout = Duration::from_secs(parse_env_or_default(
            "APOTHECA_REQUEST_TIMEOUT_SECS",
            10_u64,
        )?);
        Ok(config)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable, treating empty values as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an optional environment variable, falling back to `default`.
fn parse_env_or_default<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_optional_env(key).map_or(Ok(default), |raw| {
        raw.trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

/// Parse a base URL, requiring http(s) and normalizing to a trailing slash so
/// relative endpoint paths join underneath it.
fn parse_base_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("unsupported scheme {:?}", url.scheme()),
        ));
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a key is long enough, not a placeholder, and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    if secret.len() < MIN_ANON_KEY_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {MIN_ANON_KEY_LENGTH} characters (got {})",
                secret.len()
            ),
        ));
    }

    let lower = secret.to_lowercase();
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Copy the key from the project settings."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(value.trim(), key)?;
    Ok(SecretString::from(value.trim().to_owned()))
}
