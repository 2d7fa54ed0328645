//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate address shapes, value ranges and the auth token length
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::auth::MAX_TOKEN_LINE;
use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} is empty")]
    Empty { field: &'static str },

    #[error("{field} {value:?} is not host:port")]
    BadAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} is longer than {max} bytes")]
    TooLong { field: &'static str, max: usize },
}

/// Check a configuration, collecting every error.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address("listener.bind_address", &config.listener.bind_address, &mut errors);
    check_address("backend.address", &config.backend.address, &mut errors);

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero { field: "listener.max_connections" });
    }
    if config.backend.connect_timeout_ms == 0 {
        errors.push(ValidationError::Zero { field: "backend.connect_timeout_ms" });
    }
    if config.dump.tee_buffer_bytes == 0 {
        errors.push(ValidationError::Zero { field: "dump.tee_buffer_bytes" });
    }
    if config.auth.token.len() > MAX_TOKEN_LINE {
        errors.push(ValidationError::TooLong {
            field: "auth.token",
            max: MAX_TOKEN_LINE,
        });
    }
    if config.decoder.name.is_empty() {
        errors.push(ValidationError::Empty { field: "decoder.name" });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(field: &'static str, value: &str, errors: &mut Vec<ValidationError>) {
    if value.is_empty() {
        errors.push(ValidationError::Empty { field });
        return;
    }
    let valid = value
        .rsplit_once(':')
        .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
        .unwrap_or(false);
    if !valid {
        errors.push(ValidationError::BadAddress {
            field,
            value: value.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.backend.address = "10.10.1.8:80".to_string();
        config
    }

    #[test]
    fn default_with_backend_is_valid() {
        assert_eq!(validate_config(&valid()), Ok(()));
    }

    #[test]
    fn hostnames_and_ipv6_accepted() {
        let mut config = valid();
        config.backend.address = "backend.internal:8443".to_string();
        config.listener.bind_address = "[::1]:8080".to_string();
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn missing_backend_reported() {
        let errors = validate_config(&ProxyConfig::default()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::Empty { field: "backend.address" }]);
    }

    #[test]
    fn reports_every_error() {
        let mut config = valid();
        config.listener.bind_address = "8080".to_string();
        config.backend.address = "host:http".to_string();
        config.backend.connect_timeout_ms = 0;
        config.dump.tee_buffer_bytes = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::Zero { field: "dump.tee_buffer_bytes" }));
    }

    #[test]
    fn token_longer_than_handshake_line_rejected() {
        let mut config = valid();
        config.auth.token = "t".repeat(MAX_TOKEN_LINE);
        assert_eq!(validate_config(&config), Ok(()));

        config.auth.token.push('t');
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::TooLong {
                field: "auth.token",
                max: MAX_TOKEN_LINE
            }]
        );
    }
}
