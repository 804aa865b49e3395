//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and value ranges (timeouts > 0, backlog > 0)
//! - Detect conflicting client trust settings
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TransportConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::{ClientSection, ServerSection, TransportConfig};

/// One semantic problem in a config file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a parsed config, collecting every problem found.
pub fn validate_config(config: &TransportConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Some(server) = &config.server {
        validate_server(server, &mut errors);
    }
    validate_client(&config.client, &mut errors);

    let backoff = &config.accept_backoff;
    if backoff.base_delay_ms == 0 {
        errors.push(ValidationError::new("accept_backoff.base_delay_ms", "must be greater than 0"));
    }
    if backoff.max_delay_ms < backoff.base_delay_ms {
        errors.push(ValidationError::new(
            "accept_backoff.max_delay_ms",
            "must not be smaller than base_delay_ms",
        ));
    }

    if config.observability.metrics_enabled {
        if let Err(e) = config.observability.metrics_addr() {
            errors.push(e);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_server(server: &ServerSection, errors: &mut Vec<ValidationError>) {
    if let Err(e) = server.bind_addr() {
        errors.push(e);
    }
    if server.cert_path.is_empty() {
        errors.push(ValidationError::new("server.cert_path", "is required"));
    }
    if server.key_path.is_empty() {
        errors.push(ValidationError::new("server.key_path", "is required"));
    }
    if server.backlog == 0 {
        errors.push(ValidationError::new("server.backlog", "must be greater than 0"));
    }

    check_secs("server.timeout_secs", server.timeout_secs, errors);
    check_secs("server.handshake_timeout_secs", server.handshake_timeout_secs, errors);
    check_secs("server.drain_timeout_secs", server.drain_timeout_secs, errors);
}

fn validate_client(client: &ClientSection, errors: &mut Vec<ValidationError>) {
    if let Err(e) = client.source_addr() {
        errors.push(e);
    }
    if client.insecure && client.ca_path.is_some() {
        errors.push(ValidationError::new(
            "client.insecure",
            "cannot be combined with client.ca_path",
        ));
    }
    check_secs("client.connect_timeout_secs", client.connect_timeout_secs, errors);
}

fn check_secs(field: &'static str, value: Option<u64>, errors: &mut Vec<ValidationError>) {
    if value == Some(0) {
        errors.push(ValidationError::new(field, "must be greater than 0 (omit to disable)"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_server() -> ServerSection {
        ServerSection {
            cert_path: "cert.pem".to_string(),
            key_path: "key.pem".to_string(),
            ..ServerSection::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&TransportConfig::default()).is_ok());
    }

    #[test]
    fn complete_server_is_valid() {
        let config = TransportConfig {
            server: Some(valid_server()),
            ..TransportConfig::default()
        };
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = TransportConfig {
            server: Some(ServerSection {
                bind_address: "not an address".to_string(),
                backlog: 0,
                timeout_secs: Some(0),
                ..ServerSection::default()
            }),
            ..TransportConfig::default()
        };
        config.accept_backoff.max_delay_ms = 1;
        config.accept_backoff.base_delay_ms = 10;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "server.bind_address",
                "server.cert_path",
                "server.key_path",
                "server.backlog",
                "server.timeout_secs",
                "accept_backoff.max_delay_ms",
            ]
        );
    }

    #[test]
    fn insecure_with_ca_conflicts() {
        let mut config = TransportConfig::default();
        config.client.insecure = true;
        config.client.ca_path = Some("ca.pem".to_string());

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "client.insecure");
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = TransportConfig::default();
        config.observability.metrics_address = "bogus".to_string();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].to_string(), "observability.metrics_address: 'bogus' is not a socket address");
    }
}
