use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub sources_path: PathBuf,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub http_request_timeout_secs: u64,
    pub http_user_agent: String,
    pub http_max_retries: u32,
    pub http_retry_backoff_base_ms: u64,
    pub instagram_access_token: Option<String>,
    pub instagram_business_account_id: Option<String>,
    pub youtube_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub extract_confidence_threshold: f64,
    pub extract_default_confidence: f64,
    pub extract_max_attempts: u32,
    pub extract_backoff_base_ms: u64,
    pub extract_requests_per_minute: u32,
    pub extract_concurrency: usize,
    pub geocoder_base_url: String,
    pub geocoder_country_codes: Option<String>,
    pub geocode_concurrency: usize,
    pub geocode_max_attempts: u32,
    pub buzz_half_life_hours: f64,
    pub max_post_refs: usize,
    pub freshness_days: u32,
    pub schedule_crons: Vec<String>,
    pub query_default_radius_km: f64,
    pub query_max_radius_km: f64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[redacted]");
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("sources_path", &self.sources_path)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("http_request_timeout_secs", &self.http_request_timeout_secs)
            .field("http_user_agent", &self.http_user_agent)
            .field("http_max_retries", &self.http_max_retries)
            .field(
                "http_retry_backoff_base_ms",
                &self.http_retry_backoff_base_ms,
            )
            .field("instagram_access_token", &redact(&self.instagram_access_token))
            .field(
                "instagram_business_account_id",
                &self.instagram_business_account_id,
            )
            .field("youtube_api_key", &redact(&self.youtube_api_key))
            .field("gemini_api_key", &redact(&self.gemini_api_key))
            .field("gemini_model", &self.gemini_model)
            .field(
                "extract_confidence_threshold",
                &self.extract_confidence_threshold,
            )
            .field(
                "extract_default_confidence",
                &self.extract_default_confidence,
            )
            .field("extract_max_attempts", &self.extract_max_attempts)
            .field("extract_backoff_base_ms", &self.extract_backoff_base_ms)
            .field(
                "extract_requests_per_minute",
                &self.extract_requests_per_minute,
            )
            .field("extract_concurrency", &self.extract_concurrency)
            .field("geocoder_base_url", &self.geocoder_base_url)
            .field("geocoder_country_codes", &self.geocoder_country_codes)
            .field("geocode_concurrency", &self.geocode_concurrency)
            .field("geocode_max_attempts", &self.geocode_max_attempts)
            .field("buzz_half_life_hours", &self.buzz_half_life_hours)
            .field("max_post_refs", &self.max_post_refs)
            .field("freshness_days", &self.freshness_days)
            .field("schedule_crons", &self.schedule_crons)
            .field("query_default_radius_km", &self.query_default_radius_km)
            .field("query_max_radius_km", &self.query_max_radius_km)
            .finish()
    }
}
