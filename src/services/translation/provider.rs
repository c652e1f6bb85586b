use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::core::errors::ProviderResult;
use crate::core::types::EngineType;
use crate::middleware::{CircuitBreaker, CircuitBreakerConfig};

/// Capability contract every translation backend implements.
///
/// Implementations live outside this crate (HTTP clients, local models).
/// The selector only ever talks to this trait.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Engine this provider serves
    fn engine(&self) -> EngineType;

    /// Whether one request can carry the whole ordered list of texts.
    /// Non-batch providers are called once per text.
    fn supports_batch(&self) -> bool {
        true
    }

    /// Timeout used when the configuration sets none for this engine
    fn default_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// Cheap local check (credentials present, model installed, ...)
    async fn is_available(&self) -> bool;

    /// Round-trip check against the backend
    async fn check_connection(&self) -> bool;

    /// Translate `texts`, returning one string per input in the same order
    async fn translate_batch(
        &self,
        texts: &[String],
        source_language: Option<&str>,
        target_language: &str,
        prompt: Option<&str>,
    ) -> ProviderResult<Vec<String>>;
}

/// A registered provider and the breaker guarding it
#[derive(Clone)]
pub struct RegisteredProvider {
    pub provider: Arc<dyn TranslationProvider>,
    pub breaker: CircuitBreaker,
}

/// Lookup table of providers keyed by engine, in registration order
#[derive(Default)]
pub struct ProviderRegistry {
    entries: RwLock<Vec<RegisteredProvider>>,
    breaker_config: CircuitBreakerConfig,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_breaker_config(breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            breaker_config,
        }
    }

    /// Register a provider; an existing one for the same engine is replaced in place
    pub fn register(&self, provider: Arc<dyn TranslationProvider>) {
        let engine = provider.engine();
        let entry = RegisteredProvider {
            breaker: CircuitBreaker::with_config(engine, self.breaker_config.clone()),
            provider,
        };

        let mut entries = self.entries.write();
        if let Some(slot) = entries.iter_mut().find(|e| e.provider.engine() == engine) {
            debug!("Replacing provider for {}", engine);
            *slot = entry;
        } else {
            info!("Registered translation provider {}", engine);
            entries.push(entry);
        }
    }

    pub fn unregister(&self, engine: EngineType) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.provider.engine() != engine);
        entries.len() != before
    }

    pub fn get(&self, engine: EngineType) -> Option<RegisteredProvider> {
        self.entries
            .read()
            .iter()
            .find(|e| e.provider.engine() == engine)
            .cloned()
    }

    pub fn contains(&self, engine: EngineType) -> bool {
        self.get(engine).is_some()
    }

    /// Registered engines in registration order
    pub fn engines(&self) -> Vec<EngineType> {
        self.entries.read().iter().map(|e| e.provider.engine()).collect()
    }

    /// First registered engine that is not the built-in one
    pub fn first_external(&self) -> Option<EngineType> {
        self.engines().into_iter().find(|e| !e.is_builtin())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Run `check_connection` on every provider concurrently
    pub async fn check_connections(&self) -> Vec<(EngineType, bool)> {
        let providers: Vec<Arc<dyn TranslationProvider>> = self
            .entries
            .read()
            .iter()
            .map(|e| Arc::clone(&e.provider))
            .collect();

        join_all(providers.into_iter().map(|p| async move {
            let reachable = p.check_connection().await;
            (p.engine(), reachable)
        }))
        .await
    }
}
