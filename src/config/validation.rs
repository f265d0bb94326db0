use std::collections::HashMap;

use crate::config::models::{DEFAULT_MIME_KEY, LegacyBackendKind, RoutingSettings};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Port conflict detected: {message}")]
    PortConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Routing settings validator
pub struct SettingsValidator;

impl SettingsValidator {
    /// Validate the entire settings record, reporting every problem at once.
    pub fn validate(settings: &RoutingSettings) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(mut mime_errors) = Self::validate_mime_types(&settings.ext_mime_types) {
            errors.append(&mut mime_errors);
        }

        if let Err(mut port_errors) = Self::validate_ports(settings) {
            errors.append(&mut port_errors);
        }

        if settings.legacy_kind() == LegacyBackendKind::ManagedProcess
            && settings.legacy_php_path.trim().is_empty()
        {
            errors.push(ValidationError::MissingField {
                field: "legacyPHPPath".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_mime_types(
        mime_types: &HashMap<String, String>,
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if !mime_types.contains_key(DEFAULT_MIME_KEY) {
            errors.push(ValidationError::MissingField {
                field: format!("extMimeTypes.{DEFAULT_MIME_KEY}"),
            });
        }

        let mut keys: Vec<&String> = mime_types.keys().collect();
        keys.sort();
        for ext in keys {
            if ext.starts_with('.') {
                errors.push(ValidationError::InvalidField {
                    field: format!("extMimeTypes.{ext}"),
                    message: "Extensions must not carry a leading '.'".to_string(),
                });
            } else if ext.chars().any(char::is_uppercase) {
                errors.push(ValidationError::InvalidField {
                    field: format!("extMimeTypes.{ext}"),
                    message: "Extensions must be lowercase".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_ports(settings: &RoutingSettings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let listeners = [
            ("proxyPort", settings.proxy_port),
            ("serverHTTPPort", settings.server_http_port),
            ("serverHTTPSPort", settings.server_https_port),
            ("legacy port", settings.legacy_port()),
        ];

        for (name, port) in &listeners {
            if *port == 0 {
                errors.push(ValidationError::InvalidField {
                    field: (*name).to_string(),
                    message: "Port must be non-zero".to_string(),
                });
            }
        }

        for (i, (name_a, port_a)) in listeners.iter().enumerate() {
            for (name_b, port_b) in &listeners[i + 1..] {
                if *port_a != 0 && port_a == port_b {
                    errors.push(ValidationError::PortConflict {
                        message: format!("{name_a} and {name_b} both use port {port_a}"),
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
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
