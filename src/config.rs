//! Environment-driven service configuration.

use std::env;

/// Runtime configuration, loaded once at startup from the environment
/// (`.env` supported via dotenv in `main`).
#[derive(Debug, Clone)]
pub struct Config {
    /// Shared secret checked against the request's `api_key`.
    pub api_key: String,
    pub host: String,
    pub port: u16,

    /// Pagination bound for one search session.
    pub max_pages: u32,
    /// Stop paging once this many unique ads have accumulated.
    pub ad_target: usize,

    /// CDP websocket of a remote controllable browser. When unset, a local
    /// headless Chrome is launched instead.
    pub browser_ws_url: Option<String>,

    /// Advertiser-transparency lookup endpoint. When unset, the transparency
    /// enrichment pass is skipped.
    pub transparency_api_url: Option<String>,
    pub transparency_api_key: Option<String>,

    /// Substrings that identify a rate-limit/captcha response. The browsing
    /// collaborator's error wording changes between versions, so this is a
    /// configurable pattern set rather than inlined literals.
    pub rate_limit_patterns: Vec<String>,
    /// Substrings that identify retryable navigation failures.
    pub transient_patterns: Vec<String>,

    /// CORS allow-list for the HTTP surface.
    pub allowed_origins: Vec<String>,
}

const DEFAULT_RATE_LIMIT_PATTERNS: &[&str] = &[
    "unusual traffic",
    "captcha-form",
    "systems have detected",
    "too many requests",
];

const DEFAULT_TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "net::",
    "navigation failed",
];

const DEFAULT_ORIGINS: &[&str] = &[
    "https://magimanager.com",
    "https://www.magimanager.com",
    "https://kadabra.magimanager.com",
    "http://localhost:3000",
    "http://localhost:3001",
];

impl Config {
    pub fn from_env() -> Self {
        Self {
            api_key: env::var("ADSPY_API_KEY").unwrap_or_else(|_| "adspy-dev-key".to_string()),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("PORT", 8080),
            max_pages: env_parse("ADSPY_MAX_PAGES", 3),
            ad_target: env_parse("ADSPY_AD_TARGET", 10),
            browser_ws_url: env::var("BROWSER_WS_URL").ok().filter(|s| !s.is_empty()),
            transparency_api_url: env::var("TRANSPARENCY_API_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            transparency_api_key: env::var("TRANSPARENCY_API_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            rate_limit_patterns: env_patterns("RATE_LIMIT_PATTERNS", DEFAULT_RATE_LIMIT_PATTERNS),
            transient_patterns: env_patterns("TRANSIENT_ERROR_PATTERNS", DEFAULT_TRANSIENT_PATTERNS),
            allowed_origins: env_patterns("ALLOWED_ORIGINS", DEFAULT_ORIGINS),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Comma-separated env override, falling back to the built-in defaults.
fn env_patterns(key: &str, defaults: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(raw) => parse_patterns(&raw),
        Err(_) => defaults.iter().map(|s| s.to_string()).collect(),
    }
}

fn parse_patterns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// True when any configured pattern appears in the haystack (case-insensitive).
pub fn matches_any(haystack: &str, patterns: &[String]) -> bool {
    let lowered = haystack.to_lowercase();
    patterns.iter().any(|p| lowered.contains(&p.to_lowercase()))
}
