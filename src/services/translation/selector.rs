use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::core::config::Config;
use crate::core::errors::{AlignmentError, ProviderError, ProviderResult, TranslationError};
use crate::core::types::{
    EngineResult, EngineType, NormalizedRect, ResultBundle, Scene, SceneBinding, SelectionMode,
    TextSegment,
};
use crate::services::alignment::SegmentAligner;
use crate::services::translation::cache::{CacheKey, TranslationCache};
use crate::services::translation::prompt::{render_prompt, resolve_template};
use crate::services::translation::provider::{ProviderRegistry, RegisteredProvider};
use crate::utils::Metrics;

/// One translation request as the flow hands it to the selector
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    /// Segments each engine's output is aligned onto, in analysis order
    pub segments: Vec<TextSegment>,
    /// Their texts, in the same order
    pub texts: Vec<String>,
    pub source_language: Option<String>,
    pub target_language: String,
    pub scene: Option<Scene>,
    pub mode: SelectionMode,
}

/// Resolved engines for the primary-with-fallback algorithm
#[derive(Debug, Clone)]
struct FallbackPlan {
    primary: EngineType,
    fallback: Option<EngineType>,
    binding_prompt: Option<String>,
}

/// Dispatches translation requests across registered providers.
///
/// A single provider's failure never escapes: it is captured into that
/// engine's `EngineResult`. `select` only errors when no bundle can be
/// formed at all. A bundle in which every result failed is still returned
/// as `Ok`; `ResultBundle::failure` turns it into `AllEnginesFailed`.
pub struct EngineSelector {
    registry: Arc<ProviderRegistry>,
    config: Arc<Config>,
    cache: Option<TranslationCache>,
    metrics: Metrics,
}

impl EngineSelector {
    pub fn new(config: Arc<Config>, registry: Arc<ProviderRegistry>, metrics: Metrics) -> Self {
        let cache = config
            .cache
            .enabled
            .then(|| TranslationCache::in_memory(config.cache.capacity, Some(metrics.clone())));
        Self {
            registry,
            config,
            cache,
            metrics,
        }
    }

    /// Replace the cache, e.g. with one opened from `CACHE_DIR`
    pub fn with_cache(mut self, cache: Option<TranslationCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn cache(&self) -> Option<&TranslationCache> {
        self.cache.as_ref()
    }

    /// Request for analyzed segments, with configured languages, mode and scene
    pub fn request_for_segments(&self, segments: &[TextSegment]) -> TranslationRequest {
        let translation = &self.config.translation;
        TranslationRequest {
            segments: segments.to_vec(),
            texts: segments.iter().map(|s| s.text.clone()).collect(),
            source_language: translation.source_language.clone(),
            target_language: translation.target_language.clone(),
            scene: self.config.scenes.active_scene,
            mode: translation.selection_mode,
        }
    }

    /// Request for plain texts without geometry (text selection, translate-and-insert).
    /// Each text gets a whole-frame box.
    pub fn request_for(&self, texts: Vec<String>) -> TranslationRequest {
        let segments: Vec<TextSegment> = texts
            .into_iter()
            .map(|text| TextSegment::new(text, NormalizedRect::new(0.0, 0.0, 1.0, 1.0), 1.0))
            .collect();
        self.request_for_segments(&segments)
    }

    #[instrument(skip(self, request), fields(mode = ?request.mode, texts = request.texts.len()))]
    pub async fn select(&self, request: &TranslationRequest) -> Result<ResultBundle, TranslationError> {
        if request.texts.is_empty() {
            return Err(TranslationError::NoResults);
        }
        if self.registry.is_empty() {
            return Err(TranslationError::NoEnginesConfigured);
        }

        let bundle = match request.mode {
            SelectionMode::Parallel => self.select_parallel(request).await?,
            SelectionMode::PrimaryWithFallback | SelectionMode::QuickSwitch => {
                let translation = &self.config.translation;
                let plan = FallbackPlan {
                    primary: translation.primary_engine,
                    fallback: translation
                        .fallback_engine
                        .filter(|_| translation.fallback_enabled),
                    binding_prompt: None,
                };
                self.select_with_fallback(request, plan).await?
            }
            SelectionMode::SceneBinding => {
                let binding = self.binding_for(request.scene);
                debug!(
                    "Scene {} bound to {} (fallback {:?}, enabled {})",
                    binding.scene, binding.primary_engine, binding.fallback_engine, binding.fallback_enabled
                );
                let plan = FallbackPlan {
                    primary: binding.primary_engine,
                    fallback: binding.fallback_engine.filter(|_| binding.fallback_enabled),
                    binding_prompt: binding.custom_prompt,
                };
                self.select_with_fallback(request, plan).await?
            }
        };

        info!(
            "Selection finished: {}/{} engines succeeded",
            bundle.successful_count(),
            bundle.results.len()
        );
        Ok(bundle)
    }

    /// Fetch one specific engine's translation for an existing request.
    ///
    /// Used for quick-switching between engines after a run; repeated
    /// fetches hit the translation cache.
    #[instrument(skip(self, request), fields(engine = %engine))]
    pub async fn fetch_engine(&self, request: &TranslationRequest, engine: EngineType) -> EngineResult {
        let binding_prompt = request
            .scene
            .and_then(|scene| self.config.binding_for(scene))
            .and_then(|b| b.custom_prompt.clone());
        self.call_engine(request, engine, binding_prompt.as_deref()).await
    }

    /// Configured binding for a scene, or the documented default
    fn binding_for(&self, scene: Option<Scene>) -> SceneBinding {
        let scene = scene
            .or(self.config.scenes.active_scene)
            .unwrap_or_default();
        self.config
            .binding_for(scene)
            .cloned()
            .unwrap_or_else(|| SceneBinding::default_for(scene, self.registry.first_external()))
    }

    async fn select_with_fallback(
        &self,
        request: &TranslationRequest,
        plan: FallbackPlan,
    ) -> Result<ResultBundle, TranslationError> {
        let fallback = plan.fallback.filter(|f| *f != plan.primary);
        let fallback_registered = fallback.map(|f| self.registry.contains(f)).unwrap_or(false);
        if !self.registry.contains(plan.primary) && !fallback_registered {
            return Err(TranslationError::PrimaryNotAvailable(plan.primary));
        }

        let mut bundle = ResultBundle::new(plan.primary, request.mode, request.scene);
        let prompt = plan.binding_prompt.as_deref();

        let primary = self.call_engine(request, plan.primary, prompt).await;
        let primary_ok = primary.is_success();
        bundle.push(primary);

        if !primary_ok {
            if let Some(fallback) = fallback {
                warn!("Primary engine {} failed, falling back to {}", plan.primary, fallback);
                bundle.push(self.call_engine(request, fallback, prompt).await);
            }
        }

        Ok(bundle)
    }

    async fn select_parallel(&self, request: &TranslationRequest) -> Result<ResultBundle, TranslationError> {
        let mut engines: Vec<EngineType> = Vec::new();
        for engine in &self.config.translation.parallel_engines {
            if !engines.contains(engine) {
                engines.push(*engine);
            }
        }
        if engines.is_empty() {
            return Err(TranslationError::NoEnginesConfigured);
        }

        // Each call owns its slot; merged only after all have settled
        let results = join_all(
            engines
                .iter()
                .map(|&engine| self.call_engine(request, engine, None)),
        )
        .await;

        let mut bundle = ResultBundle::new(
            self.config.translation.primary_engine,
            request.mode,
            request.scene,
        );
        for result in results {
            bundle.push(result);
        }
        Ok(bundle)
    }

    /// One provider attempt, aligned onto the request's segments and always
    /// folded into an `EngineResult`
    async fn call_engine(
        &self,
        request: &TranslationRequest,
        engine: EngineType,
        binding_prompt: Option<&str>,
    ) -> EngineResult {
        let started = Instant::now();
        let aligner = SegmentAligner::new(
            request.source_language.clone(),
            request.target_language.clone(),
        );
        let outcome = self
            .attempt(request, engine, binding_prompt)
            .await
            .and_then(|translations| {
                aligner.align(&request.segments, &translations).map_err(
                    |AlignmentError::CountMismatch { expected, actual }| {
                        ProviderError::LengthMismatch { expected, actual }
                    },
                )
            });

        match outcome {
            Ok(segments) => EngineResult::success(engine, segments, started.elapsed()),
            Err(error) => {
                warn!("Engine {} failed: {}", engine, error);
                EngineResult::failure(engine, error, started.elapsed())
            }
        }
    }

    async fn attempt(
        &self,
        request: &TranslationRequest,
        engine: EngineType,
        binding_prompt: Option<&str>,
    ) -> ProviderResult<Vec<String>> {
        let entry = self
            .registry
            .get(engine)
            .ok_or(ProviderError::NotRegistered(engine))?;

        if !entry.breaker.allow_request() {
            return Err(ProviderError::CircuitOpen(engine));
        }

        let source = request.source_language.as_deref();
        let target = request.target_language.as_str();
        let prompt = resolve_template(&self.config.prompts, engine, request.scene, binding_prompt)
            .map(|template| render_prompt(template, source, target, &request.texts));
        let key = CacheKey {
            engine,
            source_language: source,
            target_language: target,
            prompt: prompt.as_deref(),
            texts: &request.texts,
        };

        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            debug!("Cache hit for {} ({} texts)", engine, cached.len());
            return Ok(cached);
        }

        // The pre-flight check shares the call's timeout
        let timeout = self
            .config
            .timeout_for(engine, entry.provider.default_timeout());
        let started = Instant::now();
        let call = async {
            if !entry.provider.is_available().await {
                return Err(ProviderError::Unavailable(engine));
            }
            Self::invoke(&entry, &request.texts, source, target, prompt.as_deref()).await
        };
        let outcome = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                engine,
                after: timeout,
            }),
        };
        if let Err(ProviderError::Unavailable(_)) = outcome {
            return outcome;
        }

        let outcome = outcome.and_then(|translations| {
            if translations.len() == request.texts.len() {
                Ok(translations)
            } else {
                Err(ProviderError::LengthMismatch {
                    expected: request.texts.len(),
                    actual: translations.len(),
                })
            }
        });

        self.metrics
            .record_engine_call(engine, outcome.is_ok(), started.elapsed());
        match &outcome {
            Ok(translations) => {
                entry.breaker.record_success();
                if let Some(cache) = &self.cache {
                    cache.put(&key, translations);
                }
            }
            Err(_) => {
                if entry.breaker.record_failure() {
                    self.metrics.record_circuit_breaker_trip();
                }
            }
        }
        outcome
    }

    /// Batch providers get one request; the rest are called once per text, in order
    async fn invoke(
        entry: &RegisteredProvider,
        texts: &[String],
        source: Option<&str>,
        target: &str,
        prompt: Option<&str>,
    ) -> ProviderResult<Vec<String>> {
        let provider = &entry.provider;
        if provider.supports_batch() {
            return provider.translate_batch(texts, source, target, prompt).await;
        }

        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let mut single = provider
                .translate_batch(std::slice::from_ref(text), source, target, prompt)
                .await?;
            if single.len() != 1 {
                return Err(ProviderError::LengthMismatch {
                    expected: 1,
                    actual: single.len(),
                });
            }
            out.append(&mut single);
        }
        Ok(out)
    }
}
