use std::time::Duration;

use url::Url;

pub const MASTER_KEY_PLACEHOLDER: &str = "CHANGE_ME_32_BYTE_HEX_KEY";

pub struct Config {
    pub port: u16,
    /// Unset means the in-memory store.
    pub database_url: Option<String>,
    pub master_key: String,
    /// Base URL of the hosted identity provider (GoTrue-compatible).
    pub auth_url: String,
    pub auth_anon_key: String,
    /// Enables local HS256 validation of access tokens.
    pub auth_jwt_secret: Option<String>,
    pub auth_cache_ttl: Duration,
    pub inference_api_url: String,
    pub openai_api_base: String,
    pub dashboard_origin: Option<String>,
    pub env: Option<String>,
    pub verify: VerifyConfig,
}

#[derive(Debug, Clone)]
pub struct VerifyConfig {
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub pending_grace: Duration,
    pub pending_timeout: Duration,
    pub sweep_interval: Duration,
}

impl VerifyConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sweep_interval.is_zero() {
            anyhow::bail!("VERIFY_SWEEP_INTERVAL_SECS must be at least 1");
        }
        if self.pending_timeout <= self.pending_grace {
            anyhow::bail!(
                "VERIFY_PENDING_TIMEOUT_SECS must be greater than VERIFY_PENDING_GRACE_SECS"
            );
        }
        Ok(())
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_attempts: 3,
            pending_grace: Duration::from_secs(60),
            pending_timeout: Duration::from_secs(900),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            master_key: MASTER_KEY_PLACEHOLDER.to_string(),
            auth_url: "http://localhost:9999".to_string(),
            auth_anon_key: String::new(),
            auth_jwt_secret: None,
            auth_cache_ttl: Duration::from_secs(60),
            inference_api_url: "http://localhost:8000".to_string(),
            openai_api_base: "https://api.openai.com".to_string(),
            dashboard_origin: None,
            env: None,
            verify: VerifyConfig::default(),
        }
    }
}

impl Config {
    pub fn is_production(&self) -> bool {
        self.env.as_deref() == Some("production")
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let env = std::env::var("ATERGES_ENV").ok();
    let master_key =
        std::env::var("ATERGES_MASTER_KEY").unwrap_or_else(|_| MASTER_KEY_PLACEHOLDER.into());

    if master_key == MASTER_KEY_PLACEHOLDER {
        if env.as_deref() == Some("production") {
            anyhow::bail!(
                "ATERGES_MASTER_KEY is still the insecure placeholder. \
                 Set a proper 64-char hex key before running in production."
            );
        }
        tracing::warn!(
            "ATERGES_MASTER_KEY is not set; stored credentials will not survive a restart"
        );
    }

    let auth_url = required_url("AUTH_URL")?;
    let auth_anon_key = std::env::var("AUTH_ANON_KEY")
        .map_err(|_| anyhow::anyhow!("AUTH_ANON_KEY must be set"))?;

    let defaults = VerifyConfig::default();
    let verify = VerifyConfig {
        queue_capacity: parse_or("VERIFY_QUEUE_CAPACITY", defaults.queue_capacity),
        max_attempts: parse_or("VERIFY_MAX_ATTEMPTS", defaults.max_attempts).max(1),
        pending_grace: secs_or("VERIFY_PENDING_GRACE_SECS", defaults.pending_grace),
        pending_timeout: secs_or("VERIFY_PENDING_TIMEOUT_SECS", defaults.pending_timeout),
        sweep_interval: secs_or("VERIFY_SWEEP_INTERVAL_SECS", defaults.sweep_interval),
    };
    verify.validate()?;

    Ok(Config {
        port: parse_or("ATERGES_PORT", 8080),
        database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
        master_key,
        auth_url,
        auth_anon_key,
        auth_jwt_secret: std::env::var("AUTH_JWT_SECRET").ok().filter(|s| !s.is_empty()),
        auth_cache_ttl: secs_or("AUTH_CACHE_TTL_SECS", Duration::from_secs(60)),
        inference_api_url: url_or("INFERENCE_API_URL", "http://localhost:8000")?,
        openai_api_base: url_or("OPENAI_API_BASE", "https://api.openai.com")?,
        dashboard_origin: std::env::var("DASHBOARD_ORIGIN").ok().filter(|s| !s.is_empty()),
        env,
        verify,
    })
}

fn parse_or<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn secs_or(var: &str, default: Duration) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn required_url(var: &str) -> anyhow::Result<String> {
    let raw = std::env::var(var).map_err(|_| anyhow::anyhow!("{} must be set", var))?;
    normalize_url(var, &raw)
}

fn url_or(var: &str, default: &str) -> anyhow::Result<String> {
    let raw = std::env::var(var).unwrap_or_else(|_| default.to_string());
    normalize_url(var, &raw)
}

/// Parses `raw` as an http(s) URL and drops any trailing slash.
fn normalize_url(var: &str, raw: &str) -> anyhow::Result<String> {
    let parsed = Url::parse(raw).map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", var, e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("{} must use http or https, got {}", var, parsed.scheme());
    }
    Ok(raw.trim_end_matches('/').to_string())
}
