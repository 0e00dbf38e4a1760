//! Guardrail type registry.
//!
//! Maps a type name to a factory that materializes a guardrail instance
//! from an opaque config map. Registration is last-writer-wins; lookups on
//! the hot path are read-only.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::GuardrailConfig;
use crate::guardrails::{Guardrail, GuardrailError};

/// Factory signature: (name, priority, config map) → guardrail.
pub type GuardrailFactory = Arc<
    dyn Fn(
            &str,
            i32,
            &HashMap<String, serde_json::Value>,
        ) -> Result<Arc<dyn Guardrail>, GuardrailError>
        + Send
        + Sync,
>;

/// Registry of guardrail factories keyed by type name.
#[derive(Default)]
pub struct Registry {
    factories: RwLock<HashMap<String, GuardrailFactory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in guardrail types.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("keyword", Arc::new(crate::guardrails::builtin::keyword_factory));
        registry.register("length", Arc::new(crate::guardrails::builtin::length_factory));
        registry.register(
            "openai_moderation",
            Arc::new(crate::guardrails::moderation::moderation_factory),
        );
        registry
    }

    /// Register a factory for a type name, replacing any previous one.
    pub fn register(&self, kind: &str, factory: GuardrailFactory) {
        self.factories
            .write()
            .unwrap()
            .insert(kind.to_string(), factory);
    }

    /// True if a factory is registered for the type name.
    pub fn is_registered(&self, kind: &str) -> bool {
        self.factories.read().unwrap().contains_key(kind)
    }

    /// Materialize one guardrail from its configuration.
    pub fn load(&self, config: &GuardrailConfig) -> Result<Arc<dyn Guardrail>, GuardrailError> {
        let factory = {
            let factories = self.factories.read().unwrap();
            factories
                .get(&config.kind)
                .cloned()
                .ok_or_else(|| GuardrailError::UnknownType(config.kind.clone()))?
        };
        factory(&config.name, config.priority, &config.config)
    }

    /// Materialize all enabled guardrails from a config list.
    ///
    /// Disabled entries are skipped. Entries that fail to materialize are
    /// collected as errors while the successfully constructed guardrails are
    /// still returned.
    pub fn load_all(
        &self,
        configs: &[GuardrailConfig],
    ) -> (Vec<Arc<dyn Guardrail>>, Vec<GuardrailError>) {
        let mut loaded = Vec::new();
        let mut errors = Vec::new();
        for config in configs {
            if !config.enabled {
                continue;
            }
            match self.load(config) {
                Ok(guardrail) => loaded.push(guardrail),
                Err(err) => errors.push(GuardrailError::Config(format!(
                    "failed to load guardrail '{}': {}",
                    config.name, err
                ))),
            }
        }
        (loaded, errors)
    }
}
