//! Gateway configuration.
//!
//! # Responsibilities
//! - Define the YAML configuration schema with defaults
//! - Load and parse configuration files with `${VAR}` env substitution
//! - Validate semantic correctness before startup

pub mod duration;
pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    Config, EndpointConfig, GuardrailConfig, GuardrailsConfig, LoggingConfig, PostgresConfig,
    ProviderConfig, ServerConfig, StorageConfig,
};
pub use validation::{validate_config, ValidationError};
