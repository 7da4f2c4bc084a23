use crate::config::types::{Config, DomainOverride, FetchSettings, PolicySettings};
use crate::ConfigError;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_fetch_settings(&config.fetch)?;
    validate_policy_settings(&config.policy)?;
    validate_domain_overrides(&config.domains)?;

    if config.storage.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.user_agent.pool.iter().any(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user-agent pool entries cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_fetch_settings(settings: &FetchSettings) -> Result<(), ConfigError> {
    validate_rate("requests-per-second", settings.requests_per_second)?;

    if settings.burst < 1 {
        return Err(ConfigError::Validation(format!(
            "burst must be >= 1, got {}",
            settings.burst
        )));
    }

    if settings.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout-secs must be > 0".to_string(),
        ));
    }

    if settings.max_response_bytes == 0 {
        return Err(ConfigError::Validation(
            "max-response-bytes must be > 0".to_string(),
        ));
    }

    if !(settings.overload_penalty >= 1.0) {
        return Err(ConfigError::Validation(format!(
            "overload-penalty must be >= 1.0, got {}",
            settings.overload_penalty
        )));
    }

    if !(0.0..=1.0).contains(&settings.jitter_probability) {
        return Err(ConfigError::Validation(format!(
            "jitter-probability must be between 0 and 1, got {}",
            settings.jitter_probability
        )));
    }

    for pattern in &settings.allowed_domains {
        validate_domain_pattern(pattern)?;
    }

    Ok(())
}

fn validate_policy_settings(settings: &PolicySettings) -> Result<(), ConfigError> {
    let agent = settings.agent.trim();
    if agent.is_empty() || agent.contains(char::is_whitespace) {
        return Err(ConfigError::Validation(format!(
            "policy agent must be a single non-empty token, got '{}'",
            settings.agent
        )));
    }

    if settings.cache_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "cache-ttl-secs must be > 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_domain_overrides(overrides: &[DomainOverride]) -> Result<(), ConfigError> {
    for entry in overrides {
        validate_domain_pattern(&entry.domain)?;
        validate_rate(
            &format!("requests-per-second for '{}'", entry.domain),
            entry.requests_per_second,
        )?;
    }
    Ok(())
}

fn validate_rate(name: &str, rate: f64) -> Result<(), ConfigError> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "{} must be a positive number, got {}",
            name, rate
        )));
    }
    Ok(())
}

/// Validates a domain pattern (supports a leading `*.` wildcard)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    let domain = pattern.strip_prefix("*.").unwrap_or(pattern);

    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain pattern '{}' is empty",
            pattern
        )));
    }

    if !domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with(['.', '-']) || domain.ends_with(['.', '-']) || domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' is malformed",
            domain
        )));
    }

    if domain != domain.to_lowercase() {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must be lowercase",
            domain
        )));
    }

    Ok(())
}
