use std::{collections::HashSet, net::SocketAddr, sync::LazyLock};

use regex::Regex;

use crate::config::models::{GatewayConfig, RateLimitStore, ServiceConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Service conflict detected: {message}")]
    ServiceConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

static SERVICE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]{0,63}$").expect("invalid service name regex")
});

/// Gateway configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire gateway configuration, reporting every problem at once
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.server.listen_addr()) {
            errors.push(e);
        }

        if config.jwt.secret.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "jwt.secret".to_string(),
            });
        }
        if config.jwt.expiry_duration().is_err() {
            errors.push(ValidationError::InvalidField {
                field: "jwt.expiry".to_string(),
                message: format!("'{}' is not a duration like '24h'", config.jwt.expiry),
            });
        }

        errors.extend(Self::validate_rate_limit(config));
        errors.extend(Self::validate_positive_limits(config));

        for svc in &config.services {
            if let Err(mut service_errors) = Self::validate_service(svc) {
                errors.append(&mut service_errors);
            }
        }

        if let Err(conflicts) = Self::check_service_conflicts(&config.services) {
            errors.extend(conflicts);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "server.host must be an IP address (e.g. '127.0.0.1' or '0.0.0.0')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_rate_limit(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let rate_limit = &config.rate_limit;

        if rate_limit.requests == 0 {
            errors.push(ValidationError::InvalidField {
                field: "rate_limit.requests".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }
        if rate_limit.window_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "rate_limit.window_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }
        if rate_limit.store_timeout_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: "rate_limit.store_timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if rate_limit.store == RateLimitStore::Redis {
            match &config.redis {
                None => errors.push(ValidationError::MissingField {
                    field: "redis.url".to_string(),
                }),
                Some(redis) => {
                    let ok = url::Url::parse(&redis.url)
                        .map(|u| matches!(u.scheme(), "redis" | "rediss"))
                        .unwrap_or(false);
                    if !ok {
                        errors.push(ValidationError::InvalidField {
                            field: "redis.url".to_string(),
                            message: format!("'{}' is not a redis:// URL", redis.url),
                        });
                    }
                }
            }
        }

        errors
    }

    fn validate_positive_limits(config: &GatewayConfig) -> Vec<ValidationError> {
        [
            (
                "circuit_breaker.failure_threshold",
                u64::from(config.circuit_breaker.failure_threshold),
            ),
            (
                "circuit_breaker.timeout_secs",
                config.circuit_breaker.timeout_secs,
            ),
            (
                "circuit_breaker.half_open_max_requests",
                u64::from(config.circuit_breaker.half_open_max_requests),
            ),
            ("timeouts.write_secs", config.timeouts.write_secs),
        ]
        .into_iter()
        .filter(|(_, value)| *value == 0)
        .map(|(field, _)| ValidationError::InvalidField {
            field: field.to_string(),
            message: "Must be greater than 0".to_string(),
        })
        .collect()
    }

    /// Validate a single statically configured service
    fn validate_service(svc: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if !SERVICE_NAME.is_match(&svc.name) {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{}' name", svc.name),
                message: "Must be 1-64 characters of letters, digits, '-', '_' or '.'"
                    .to_string(),
            });
        }

        if svc.urls.is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("service '{}' urls", svc.name),
            });
        }
        for (i, url) in svc.urls.iter().enumerate() {
            if let Err(e) = Self::validate_url(url, &format!("service '{}' urls[{i}]", svc.name)) {
                errors.push(e);
            }
        }

        if !svc.health_path.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{}' health_path", svc.name),
                message: "Must start with '/'".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    /// Service names are registry keys and must be unique
    fn check_service_conflicts(services: &[ServiceConfig]) -> Result<(), Vec<ValidationError>> {
        let mut seen = HashSet::new();
        let errors: Vec<_> = services
            .iter()
            .filter(|svc| !seen.insert(svc.name.as_str()))
            .map(|svc| ValidationError::ServiceConflict {
                message: format!("Duplicate service name '{}'", svc.name),
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
