use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Request body size limit in bytes
    /// Env: REQUEST_BODY_LIMIT (default: 65536 = 64KB)
    pub request_body_limit: usize,

    /// Request timeout in seconds
    /// Env: REQUEST_TIMEOUT_SECS (default: 30)
    pub request_timeout: Duration,

    /// Server port
    /// Env: PORT (default: 3000)
    pub port: u16,

    /// Lifetime of a sign-in session
    /// Env: SESSION_TTL_SECS (default: 43200 = 12h)
    pub session_ttl: Duration,

    /// Database file path
    /// Env: DATABASE_PATH (default: "arcade.db")
    pub database_path: String,

    /// Emails allowed to manage arcades, comma separated.
    /// Env: ADMIN_EMAILS (default: empty, every signed-in user is an admin)
    pub admin_emails: Vec<String>,

    /// Shared key a trusted federation proxy presents on /auth/federated.
    /// Env: FEDERATION_KEY (optional, federated sign-in is disabled without it)
    pub federation_key: Option<String>,

    /// Whether rate limiting is applied at all
    /// Env: RATE_LIMIT_ENABLED (default: true)
    pub rate_limit_enabled: bool,

    /// Rate limit for sign-in and check-in endpoints (requests per minute)
    /// Env: RATE_LIMIT_AUTH_PER_MIN (default: 30)
    pub rate_limit_auth_per_min: u64,

    /// Burst size for sign-in and check-in endpoints
    /// Env: RATE_LIMIT_AUTH_BURST (default: 10)
    pub rate_limit_auth_burst: u32,

    /// Rate limit for general endpoints (requests per second)
    /// Env: RATE_LIMIT_GENERAL_PER_SEC (default: 10)
    pub rate_limit_general_per_sec: u64,

    /// Burst size for general endpoints
    /// Env: RATE_LIMIT_GENERAL_BURST (default: 20)
    pub rate_limit_general_burst: u32,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv(); //for debugging mostly
        Self {
            request_body_limit: env_or_default("REQUEST_BODY_LIMIT", 64 * 1024),
            request_timeout: Duration::from_secs(env_or_default("REQUEST_TIMEOUT_SECS", 30)),
            port: env_or_default("PORT", 3000),
            session_ttl: Duration::from_secs(env_or_default("SESSION_TTL_SECS", 12 * 60 * 60)),
            database_path: env_or_default_string("DATABASE_PATH", "arcade.db"),
            admin_emails: parse_email_list(&env_or_default_string("ADMIN_EMAILS", "")),
            federation_key: var("FEDERATION_KEY").ok().filter(|key| !key.is_empty()),
            rate_limit_enabled: env_or_default("RATE_LIMIT_ENABLED", true),
            rate_limit_auth_per_min: env_or_default("RATE_LIMIT_AUTH_PER_MIN", 30),
            rate_limit_auth_burst: env_or_default("RATE_LIMIT_AUTH_BURST", 10),
            rate_limit_general_per_sec: env_or_default("RATE_LIMIT_GENERAL_PER_SEC", 10),
            rate_limit_general_burst: env_or_default("RATE_LIMIT_GENERAL_BURST", 20),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_body_limit: 64 * 1024, // 64 KB
            request_timeout: Duration::from_secs(30),
            port: 3000,
            session_ttl: Duration::from_secs(12 * 60 * 60),
            database_path: "arcade.db".to_string(),
            admin_emails: Vec::new(),
            federation_key: None,
            rate_limit_enabled: true,
            rate_limit_auth_per_min: 30,
            rate_limit_auth_burst: 10,
            rate_limit_general_per_sec: 10,
            rate_limit_general_burst: 20,
        }
    }
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}

/// Split a comma separated list of emails, normalized to lowercase.
fn parse_email_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|email| email.trim().to_lowercase())
        .filter(|email| !email.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.request_body_limit, 64 * 1024);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.port, 3000);
        assert_eq!(config.session_ttl, Duration::from_secs(43200));
        assert_eq!(config.database_path, "arcade.db");
        assert!(config.admin_emails.is_empty());
        assert!(config.federation_key.is_none());
        assert!(config.rate_limit_enabled);
        assert_eq!(config.rate_limit_auth_per_min, 30);
        assert_eq!(config.rate_limit_auth_burst, 10);
        assert_eq!(config.rate_limit_general_per_sec, 10);
        assert_eq!(config.rate_limit_general_burst, 20);
    }

    #[test]
    fn test_parse_email_list() {
        assert_eq!(
            parse_email_list(" Admin@Example.com, ops@example.com ,,"),
            vec!["admin@example.com", "ops@example.com"]
        );
        assert!(parse_email_list("").is_empty());
    }
}
