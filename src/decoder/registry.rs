//! Name → factory table for decoders.
//!
//! Decoders are compiled in and registered at startup. `resolve` runs the
//! factory once against a probe connection so a factory that cannot produce
//! a decoder fails configuration instead of a live session.

use std::collections::HashMap;
use std::sync::Arc;

use super::{DecoderFactory, NopDecoderFactory};
use crate::error::ConfigError;
use crate::net::connection::ConnectionInfo;

#[derive(Clone, Default)]
pub struct DecoderRegistry {
    factories: HashMap<String, Arc<dyn DecoderFactory>>,
}

impl DecoderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in decoders (`nop`).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("nop", NopDecoderFactory);
        registry
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, factory: impl DecoderFactory + 'static) {
        let name = name.into();
        if self.factories.insert(name.clone(), Arc::new(factory)).is_some() {
            tracing::debug!(decoder = %name, "Decoder registration replaced");
        }
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Look up and probe the factory registered as `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn DecoderFactory>, ConfigError> {
        let factory = self
            .factories
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownDecoder(name.to_string()))?;

        factory
            .create(&ConnectionInfo::probe())
            .map_err(|source| ConfigError::DecoderProbe {
                name: name.to_string(),
                source,
            })?;

        tracing::info!(decoder = %name, "Decoder resolved");
        Ok(factory)
    }
}

impl std::fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("factories", &self.names())
            .finish()
    }
}
