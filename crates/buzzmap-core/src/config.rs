use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Default cadence: three runs a day at 08:00, 13:00 and 19:00 UTC.
pub const DEFAULT_SCHEDULE_CRON: &str = "0 0 8,13,19 * * *";

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the process environment so tests can drive it with a
/// `HashMap` lookup.
#[allow(clippy::too_many_lines)]
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let optional = |var: &str| -> Option<String> {
        lookup(var).ok().filter(|v| !v.trim().is_empty())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_addr = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        or_default(var, default)
            .parse::<SocketAddr>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        or_default(var, default)
            .parse::<usize>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_positive_f64 = |var: &str, default: &str| -> Result<f64, ConfigError> {
        let value = or_default(var, default)
            .parse::<f64>()
            .map_err(|e| invalid(var, e.to_string()))?;
        if !value.is_finite() || value <= 0.0 {
            return Err(invalid(var, format!("must be a positive number, got {value}")));
        }
        Ok(value)
    };

    let parse_unit_f64 = |var: &str, default: &str| -> Result<f64, ConfigError> {
        let value = or_default(var, default)
            .parse::<f64>()
            .map_err(|e| invalid(var, e.to_string()))?;
        if !(0.0..=1.0).contains(&value) {
            return Err(invalid(var, format!("must be within [0, 1], got {value}")));
        }
        Ok(value)
    };

    let database_url = require("DATABASE_URL")?;
    let env = parse_environment(&or_default("BUZZMAP_ENV", "development"))?;
    let bind_addr = parse_addr("BUZZMAP_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("BUZZMAP_LOG_LEVEL", "info");
    let sources_path = PathBuf::from(or_default(
        "BUZZMAP_SOURCES_PATH",
        "./config/sources.yaml",
    ));

    let db_max_connections = parse_u32("BUZZMAP_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("BUZZMAP_DB_MIN_CONNECTIONS", "1")?;
    if db_min_connections > db_max_connections {
        return Err(invalid(
            "BUZZMAP_DB_MIN_CONNECTIONS",
            format!(
                "min connections ({db_min_connections}) exceeds max connections ({db_max_connections})"
            ),
        ));
    }
    let db_acquire_timeout_secs = parse_u64("BUZZMAP_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let http_request_timeout_secs = parse_u64("BUZZMAP_HTTP_REQUEST_TIMEOUT_SECS", "30")?;
    let http_user_agent = or_default("BUZZMAP_HTTP_USER_AGENT", "buzzmap/0.1 (trend-map)");
    let http_max_retries = parse_u32("BUZZMAP_HTTP_MAX_RETRIES", "3")?;
    let http_retry_backoff_base_ms = parse_u64("BUZZMAP_HTTP_RETRY_BACKOFF_BASE_MS", "1000")?;

    let instagram_access_token = optional("INSTAGRAM_ACCESS_TOKEN");
    let instagram_business_account_id = optional("INSTAGRAM_BUSINESS_ACCOUNT_ID");
    let youtube_api_key = optional("YOUTUBE_API_KEY");

    let gemini_api_key = optional("GEMINI_API_KEY");
    let gemini_model = or_default("BUZZMAP_GEMINI_MODEL", "gemini-2.5-flash");
    let extract_confidence_threshold =
        parse_unit_f64("BUZZMAP_EXTRACT_CONFIDENCE_THRESHOLD", "0.5")?;
    let extract_default_confidence = parse_unit_f64("BUZZMAP_EXTRACT_DEFAULT_CONFIDENCE", "0.8")?;
    let extract_max_attempts = parse_u32("BUZZMAP_EXTRACT_MAX_ATTEMPTS", "5")?;
    let extract_backoff_base_ms = parse_u64("BUZZMAP_EXTRACT_BACKOFF_BASE_MS", "2000")?;
    let extract_requests_per_minute = parse_u32("BUZZMAP_EXTRACT_REQUESTS_PER_MINUTE", "60")?;
    if extract_requests_per_minute == 0 {
        return Err(invalid(
            "BUZZMAP_EXTRACT_REQUESTS_PER_MINUTE",
            "must be greater than zero".to_string(),
        ));
    }
    let extract_concurrency = parse_usize("BUZZMAP_EXTRACT_CONCURRENCY", "4")?.max(1);

    let geocoder_base_url = or_default(
        "BUZZMAP_GEOCODER_BASE_URL",
        "https://nominatim.openstreetmap.org",
    );
    let geocoder_country_codes = Some(or_default("BUZZMAP_GEOCODER_COUNTRY_CODES", "jp"))
        .filter(|v| !v.trim().is_empty());
    let geocode_concurrency = parse_usize("BUZZMAP_GEOCODE_CONCURRENCY", "4")?.max(1);
    let geocode_max_attempts = parse_u32("BUZZMAP_GEOCODE_MAX_ATTEMPTS", "3")?.max(1);

    let buzz_half_life_hours = parse_positive_f64("BUZZMAP_BUZZ_HALF_LIFE_HOURS", "24")?;
    let max_post_refs = parse_usize("BUZZMAP_MAX_POST_REFS", "20")?;
    if max_post_refs == 0 {
        return Err(invalid(
            "BUZZMAP_MAX_POST_REFS",
            "must be greater than zero".to_string(),
        ));
    }
    let freshness_days = parse_u32("BUZZMAP_FRESHNESS_DAYS", "30")?;

    let schedule_crons = parse_cron_list(&or_default("BUZZMAP_SCHEDULE_CRON", DEFAULT_SCHEDULE_CRON));
    if schedule_crons.is_empty() {
        return Err(invalid(
            "BUZZMAP_SCHEDULE_CRON",
            "at least one cron expression is required".to_string(),
        ));
    }

    let query_default_radius_km = parse_positive_f64("BUZZMAP_QUERY_DEFAULT_RADIUS_KM", "3")?;
    let query_max_radius_km = parse_positive_f64("BUZZMAP_QUERY_MAX_RADIUS_KM", "50")?;
    if query_default_radius_km > query_max_radius_km {
        return Err(invalid(
            "BUZZMAP_QUERY_DEFAULT_RADIUS_KM",
            format!(
                "default radius ({query_default_radius_km}) exceeds max radius ({query_max_radius_km})"
            ),
        ));
    }

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        sources_path,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        http_request_timeout_secs,
        http_user_agent,
        http_max_retries,
        http_retry_backoff_base_ms,
        instagram_access_token,
        instagram_business_account_id,
        youtube_api_key,
        gemini_api_key,
        gemini_model,
        extract_confidence_threshold,
        extract_default_confidence,
        extract_max_attempts,
        extract_backoff_base_ms,
        extract_requests_per_minute,
        extract_concurrency,
        geocoder_base_url,
        geocoder_country_codes,
        geocode_concurrency,
        geocode_max_attempts,
        buzz_half_life_hours,
        max_post_refs,
        freshness_days,
        schedule_crons,
        query_default_radius_km,
        query_max_radius_km,
    })
}

/// Parse a string into an `Environment` variant.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "BUZZMAP_ENV".to_string(),
            reason: format!("expected development, test, or production; got {other:?}"),
        }),
    }
}

/// Split a `;`-separated list of cron expressions, dropping blanks.
fn parse_cron_list(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
