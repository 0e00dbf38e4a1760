//! Configuration loading from disk.

use std::path::Path;

use crate::config::schema::Config;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation failed: {}", format_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a YAML file.
///
/// `${VAR}` placeholders anywhere in the file are replaced with the value of
/// the corresponding environment variable before parsing; unset variables
/// substitute to the empty string.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    parse_config(&raw)
}

/// Parse and validate configuration from YAML text.
pub fn parse_config(raw: &str) -> Result<Config, ConfigError> {
    let substituted = substitute_env(raw);
    let config: Config = serde_yaml::from_str(&substituted)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Replace `${VAR}` occurrences with environment variable values.
fn substitute_env(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find('}') {
            Some(end) => {
                let name = &rest[start + 2..start + 2 + end];
                out.push_str(&std::env::var(name).unwrap_or_default());
                rest = &rest[start + 2 + end + 1..];
            }
            None => {
                // Unterminated placeholder, keep literal text.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
server:
  bind_address: "127.0.0.1:9090"
  read_timeout: 15
storage:
  type: memory
logging:
  enabled: true
  buffer_size: 50
  flush_interval: "250ms"
guardrails:
  enabled: true
  timeout: "2s"
  input_guardrails:
    - name: profanity
      type: keyword
      priority: 0
      config:
        keywords: ["bad"]
providers:
  - name: openai
    base_url: "https://api.openai.com"
    endpoints:
      - path: /v1/chat/completions
        methods: [POST]
        timeout: 60
"#;

    #[test]
    fn parses_sample_config() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:9090");
        assert_eq!(config.server.read_timeout, 15);
        // Unset sections keep defaults.
        assert_eq!(config.server.write_timeout, 30);
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.logging.buffer_size, 50);
        assert_eq!(
            config.logging.flush_interval,
            std::time::Duration::from_millis(250)
        );
        assert!(config.guardrails.enabled);
        assert_eq!(config.guardrails.input_guardrails.len(), 1);
        assert_eq!(config.guardrails.input_guardrails[0].kind, "keyword");
        assert_eq!(config.providers[0].endpoints[0].path, "/v1/chat/completions");
    }

    #[test]
    fn substitutes_env_placeholders() {
        std::env::set_var("GW_TEST_SUB", "from-env");
        assert_eq!(substitute_env("a ${GW_TEST_SUB} b"), "a from-env b");
        assert_eq!(substitute_env("${GW_TEST_UNSET_VAR}"), "");
        assert_eq!(substitute_env("no placeholders"), "no placeholders");
        assert_eq!(substitute_env("dangling ${open"), "dangling ${open");
    }

    #[test]
    fn invalid_duration_is_a_parse_error() {
        let raw = "logging:\n  flush_interval: nonsense\n";
        assert!(matches!(parse_config(raw), Err(ConfigError::Parse(_))));
    }
}
