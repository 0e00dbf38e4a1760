//! Configuration validation logic.

use std::collections::HashSet;

use crate::config::schema::Config;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error: {}", self.0)
    }
}

const VALID_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH"];

/// Validate a Config for semantic correctness.
pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError(format!(
            "server.bind_address '{}' is not a valid socket address",
            config.server.bind_address
        )));
    }

    match config.storage.backend.as_str() {
        "postgres" | "memory" => {}
        other => errors.push(ValidationError(format!(
            "storage.type '{}' is not supported (expected 'postgres' or 'memory')",
            other
        ))),
    }

    if config.logging.enabled {
        if config.logging.buffer_size == 0 {
            errors.push(ValidationError("logging.buffer_size must be > 0".to_string()));
        }
        if config.logging.batch_size == 0 {
            errors.push(ValidationError("logging.batch_size must be > 0".to_string()));
        }
        if config.logging.workers == 0 {
            errors.push(ValidationError("logging.workers must be > 0".to_string()));
        }
    }

    // Endpoint paths must be unique across providers; the route table maps
    // each path to exactly one provider.
    let mut seen_paths: HashSet<&str> = HashSet::new();
    for provider in &config.providers {
        if provider.base_url.is_empty() {
            errors.push(ValidationError(format!(
                "provider '{}' has an empty base_url",
                provider.name
            )));
        }
        for endpoint in &provider.endpoints {
            if !endpoint.path.starts_with('/') {
                errors.push(ValidationError(format!(
                    "endpoint '{}' of provider '{}' must start with '/'",
                    endpoint.path, provider.name
                )));
            }
            if !seen_paths.insert(endpoint.path.as_str()) {
                errors.push(ValidationError(format!(
                    "endpoint '{}' is registered by more than one provider",
                    endpoint.path
                )));
            }
            if endpoint.methods.is_empty() {
                errors.push(ValidationError(format!(
                    "endpoint '{}' of provider '{}' has no methods",
                    endpoint.path, provider.name
                )));
            }
            for method in &endpoint.methods {
                if !VALID_METHODS.contains(&method.to_uppercase().as_str()) {
                    errors.push(ValidationError(format!(
                        "endpoint '{}' of provider '{}' has unsupported method '{}'",
                        endpoint.path, provider.name, method
                    )));
                }
            }
        }
    }

    for guardrail in config
        .guardrails
        .input_guardrails
        .iter()
        .chain(config.guardrails.output_guardrails.iter())
    {
        if guardrail.name.is_empty() {
            errors.push(ValidationError("guardrail with empty name".to_string()));
        }
        if guardrail.kind.is_empty() {
            errors.push(ValidationError(format!(
                "guardrail '{}' has an empty type",
                guardrail.name
            )));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::*;

    fn provider_with(path: &str, methods: &[&str]) -> ProviderConfig {
        ProviderConfig {
            name: "openai".into(),
            base_url: "https://api.openai.com".into(),
            endpoints: vec![EndpointConfig {
                path: path.into(),
                methods: methods.iter().map(|m| m.to_string()).collect(),
                headers: Default::default(),
                timeout: None,
            }],
        }
    }

    #[test]
    fn valid_config_passes() {
        let mut config = Config::default();
        config.providers.push(provider_with("/v1/chat/completions", &["POST"]));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn duplicate_endpoint_paths_rejected() {
        let mut config = Config::default();
        config.providers.push(provider_with("/v1/chat/completions", &["POST"]));
        config.providers.push(ProviderConfig {
            name: "other".into(),
            ..provider_with("/v1/chat/completions", &["POST"])
        });
        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| e.0.contains("more than one provider")));
    }

    #[test]
    fn bad_method_and_path_rejected() {
        let mut config = Config::default();
        config.providers.push(provider_with("v1/bad", &["TRACE"]));
        let errs = validate_config(&config).unwrap_err();
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn bad_bind_address_rejected() {
        let mut config = Config::default();
        config.server.bind_address = "not-an-addr".into();
        let errs = validate_config(&config).unwrap_err();
        assert!(errs[0].0.contains("bind_address"));
    }
}
