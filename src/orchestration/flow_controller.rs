// Flow Controller: one capture → analyze → translate → render run at a time
//
// Observable state (phase, last error, last result) has a single writer:
// the current run. Every run gets a generation number; a run whose
// generation is stale (superseded by start/reset) never writes state.

use image::RgbaImage;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::core::config::Config;
use crate::core::errors::{FlowError, ProviderError, TranslationError};
use crate::core::types::{
    EngineType, FlowPhase, FlowResult, ResultBundle, Scene, SelectionMode, TextSegment,
};
use crate::orchestration::cancellation::CancellationToken;
use crate::phases::{AnalysisPipeline, RenderPipeline, TranslationPipeline};
use crate::services::analysis::TextAnalyzer;
use crate::services::rendering::OverlayRenderer;
use crate::services::translation::{
    EngineSelector, ProviderRegistry, TranslationCache, TranslationRequest,
};
use crate::utils::Metrics;

/// Host-side hooks. All methods default to no-ops.
pub trait FlowObserver: Send + Sync {
    /// A run started; carries the captured bitmap for a loading view
    fn on_loading(&self, _image: &Arc<RgbaImage>) {}

    fn on_phase(&self, _phase: &FlowPhase) {}

    fn on_completed(&self, _result: &Arc<FlowResult>) {}

    /// A run failed. Never called for cancellation.
    fn on_failed(&self, _error: &FlowError, _bundle: Option<&ResultBundle>) {}
}

/// Per-run overrides of the configured request parameters
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub scene: Option<Scene>,
    pub mode: Option<SelectionMode>,
    pub source_language: Option<String>,
    pub target_language: Option<String>,
}

impl RunOptions {
    fn apply(&self, request: &mut TranslationRequest) {
        if let Some(scene) = self.scene {
            request.scene = Some(scene);
        }
        if let Some(mode) = self.mode {
            request.mode = mode;
        }
        if let Some(source) = &self.source_language {
            request.source_language = Some(source.clone());
        }
        if let Some(target) = &self.target_language {
            request.target_language = target.clone();
        }
    }
}

/// What a completed run translated, kept for engine switching
#[derive(Debug, Clone)]
struct RunContext {
    request: TranslationRequest,
}

struct FlowState {
    generation: u64,
    token: CancellationToken,
    phase: FlowPhase,
    last_error: Option<FlowError>,
    last_result: Option<Arc<FlowResult>>,
    last_bundle: Option<ResultBundle>,
    last_context: Option<RunContext>,
}

struct Shared {
    state: RwLock<FlowState>,
    phase_tx: watch::Sender<FlowPhase>,
    observers: RwLock<Vec<Arc<dyn FlowObserver>>>,
    analysis: AnalysisPipeline,
    translation: TranslationPipeline,
    rendering: RenderPipeline,
    metrics: Metrics,
}

/// Successful pipeline output before it is committed as the last result
struct RunOutput {
    result: FlowResult,
    context: Option<RunContext>,
}

/// Phased state machine driving one run at a time
#[derive(Clone)]
pub struct FlowController {
    shared: Arc<Shared>,
}

impl FlowController {
    pub fn new(
        config: Arc<Config>,
        analyzer: Arc<dyn TextAnalyzer>,
        selector: Arc<EngineSelector>,
        renderer: Arc<OverlayRenderer>,
        metrics: Metrics,
    ) -> Self {
        let (phase_tx, _) = watch::channel(FlowPhase::Idle);
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(FlowState {
                    generation: 0,
                    token: CancellationToken::new(),
                    phase: FlowPhase::Idle,
                    last_error: None,
                    last_result: None,
                    last_bundle: None,
                    last_context: None,
                }),
                phase_tx,
                observers: RwLock::new(Vec::new()),
                analysis: AnalysisPipeline::new(config, analyzer, metrics.clone()),
                translation: TranslationPipeline::new(selector, metrics.clone()),
                rendering: RenderPipeline::new(renderer, metrics.clone()),
                metrics,
            }),
        }
    }

    /// Wire selector, cache and renderer from configuration.
    /// A `cache_dir` that cannot be opened degrades to an in-memory cache.
    pub async fn from_config(
        config: Arc<Config>,
        analyzer: Arc<dyn TextAnalyzer>,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        let metrics = Metrics::new();
        let mut selector = EngineSelector::new(config.clone(), registry, metrics.clone());

        if let (true, Some(dir)) = (config.cache.enabled, config.cache.cache_dir.as_deref()) {
            match TranslationCache::open(dir, config.cache.capacity, Some(metrics.clone())).await {
                Ok(cache) => {
                    info!("Translation cache persisted in {} ({} batches)", dir, cache.len());
                    selector = selector.with_cache(Some(cache));
                }
                Err(e) => warn!("Using in-memory translation cache: {:#}", e),
            }
        }

        let renderer = Arc::new(OverlayRenderer::new(config.rendering.clone()));
        Self::new(config, analyzer, Arc::new(selector), renderer, metrics)
    }

    pub fn add_observer(&self, observer: Arc<dyn FlowObserver>) {
        self.shared.observers.write().push(observer);
    }

    /// Phase change notifications; the receiver starts at the current phase
    pub fn subscribe(&self) -> watch::Receiver<FlowPhase> {
        self.shared.phase_tx.subscribe()
    }

    pub fn phase(&self) -> FlowPhase {
        self.shared.state.read().phase.clone()
    }

    pub fn progress(&self) -> f64 {
        self.shared.state.read().phase.progress()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.read().phase.is_running()
    }

    pub fn last_error(&self) -> Option<FlowError> {
        self.shared.state.read().last_error.clone()
    }

    pub fn last_result(&self) -> Option<Arc<FlowResult>> {
        self.shared.state.read().last_result.clone()
    }

    /// Bundle of the latest run that reached engine selection, including failed ones
    pub fn last_bundle(&self) -> Option<ResultBundle> {
        self.shared.state.read().last_bundle.clone()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.shared.metrics
    }

    pub fn selector(&self) -> &Arc<EngineSelector> {
        self.shared.translation.selector()
    }

    /// Start a run in the background, cancelling any run in flight
    pub fn start(&self, image: RgbaImage) -> JoinHandle<Result<Arc<FlowResult>, FlowError>> {
        self.start_with(image, RunOptions::default())
    }

    pub fn start_with(
        &self,
        image: RgbaImage,
        options: RunOptions,
    ) -> JoinHandle<Result<Arc<FlowResult>, FlowError>> {
        let (generation, token, image) = self.begin(image);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { Shared::execute(shared, generation, token, image, options).await })
    }

    /// Run to completion on the current task, cancelling any run in flight
    pub async fn run(&self, image: RgbaImage) -> Result<Arc<FlowResult>, FlowError> {
        self.run_with(image, RunOptions::default()).await
    }

    pub async fn run_with(
        &self,
        image: RgbaImage,
        options: RunOptions,
    ) -> Result<Arc<FlowResult>, FlowError> {
        let (generation, token, image) = self.begin(image);
        Shared::execute(Arc::clone(&self.shared), generation, token, image, options).await
    }

    /// Request cooperative cancellation of the run in flight.
    /// The run fails with `Cancelled` at its next checkpoint.
    pub fn cancel(&self) {
        let state = self.shared.state.read();
        if !state.phase.is_terminal() && state.phase != FlowPhase::Idle {
            info!("Cancelling run {}", state.generation);
        }
        state.token.cancel();
    }

    /// Cancel any run and return to idle with cleared error and result
    pub fn reset(&self) {
        {
            let mut state = self.shared.state.write();
            state.token.cancel();
            state.generation += 1;
            state.token = CancellationToken::new();
            state.phase = FlowPhase::Idle;
            state.last_error = None;
            state.last_result = None;
            state.last_bundle = None;
            state.last_context = None;
            self.shared.phase_tx.send_replace(FlowPhase::Idle);
        }
        self.shared.notify_phase(&FlowPhase::Idle);
    }

    /// Re-translate the last completed run with `engine`, then re-align and
    /// re-render. Replaces the last result; the phase is left unchanged.
    #[instrument(skip(self), fields(engine = %engine))]
    pub async fn switch_engine(&self, engine: EngineType) -> Result<Arc<FlowResult>, FlowError> {
        let (generation, context, previous) = {
            let state = self.shared.state.read();
            match (&state.last_context, &state.last_result) {
                (Some(context), Some(result)) => {
                    (state.generation, context.clone(), Arc::clone(result))
                }
                _ => {
                    return Err(FlowError::translation(
                        "No completed translation to switch engines for",
                    ))
                }
            }
        };

        let shared = &self.shared;
        let started = Instant::now();
        let result = shared
            .translation
            .selector()
            .fetch_engine(&context.request, engine)
            .await;
        if !result.is_success() {
            let error = result.error.clone().unwrap_or(ProviderError::EmptyResponse);
            return Err(TranslationError::AllEnginesFailed(vec![(engine, error)]).into());
        }

        let segments = result.segments.clone();
        let output = shared
            .rendering
            .execute(&previous.original_image, &segments)
            .await?;

        let mut bundle = previous.bundle.clone().unwrap_or_else(|| {
            ResultBundle::new(engine, SelectionMode::QuickSwitch, context.request.scene)
        });
        bundle.push(result);

        let switched = Arc::new(FlowResult {
            original_image: Arc::clone(&previous.original_image),
            rendered_image: Arc::new(output.image),
            segments,
            rendered_boxes: output.boxes,
            bundle: Some(bundle.clone()),
            engine: Some(engine),
            processing_time: started.elapsed(),
        });

        {
            let mut state = shared.state.write();
            if state.generation != generation {
                debug!("Discarding engine switch, a newer run started");
                return Err(FlowError::Cancelled);
            }
            state.last_result = Some(Arc::clone(&switched));
            state.last_bundle = Some(bundle);
        }
        shared.notify_completed(&switched);
        Ok(switched)
    }

    /// Supersede the current run and reset observable state
    fn begin(&self, image: RgbaImage) -> (u64, CancellationToken, Arc<RgbaImage>) {
        let image = Arc::new(image);
        let (generation, token) = {
            let mut state = self.shared.state.write();
            state.token.cancel();
            state.generation += 1;
            state.token = CancellationToken::new();
            state.phase = FlowPhase::Idle;
            state.last_error = None;
            state.last_result = None;
            state.last_bundle = None;
            state.last_context = None;
            self.shared.phase_tx.send_replace(FlowPhase::Idle);
            (state.generation, state.token.clone())
        };

        info!("Starting run {} ({}x{})", generation, image.width(), image.height());
        self.shared.metrics.record_run_started();
        for observer in self.shared.observers() {
            observer.on_loading(&image);
        }
        (generation, token, image)
    }
}

impl Shared {
    fn observers(&self) -> Vec<Arc<dyn FlowObserver>> {
        self.observers.read().clone()
    }

    fn notify_phase(&self, phase: &FlowPhase) {
        for observer in self.observers() {
            observer.on_phase(phase);
        }
    }

    fn notify_completed(&self, result: &Arc<FlowResult>) {
        for observer in self.observers() {
            observer.on_completed(result);
        }
    }

    /// Move the run forward. Returns false when the run has been superseded.
    fn set_phase(&self, generation: u64, phase: FlowPhase) -> bool {
        {
            let mut state = self.state.write();
            if state.generation != generation {
                return false;
            }
            if phase.rank() < state.phase.rank() {
                warn!("Ignoring backward transition {} -> {}", state.phase, phase);
                return false;
            }
            debug!("Phase {} -> {}", state.phase, phase);
            state.phase = phase.clone();
            self.phase_tx.send_replace(phase.clone());
        }
        self.notify_phase(&phase);
        true
    }

    fn store_bundle(&self, generation: u64, bundle: &ResultBundle) {
        let mut state = self.state.write();
        if state.generation == generation {
            state.last_bundle = Some(bundle.clone());
        }
    }

    #[instrument(skip_all, fields(run = generation))]
    async fn execute(
        shared: Arc<Shared>,
        generation: u64,
        token: CancellationToken,
        image: Arc<RgbaImage>,
        options: RunOptions,
    ) -> Result<Arc<FlowResult>, FlowError> {
        let started = Instant::now();
        let outcome = shared
            .pipeline(generation, &token, &image, &options, started)
            .await;

        match outcome {
            Ok(output) => {
                let result = shared.complete(generation, &token, output);
                if result.is_ok() {
                    shared.persist_cache().await;
                }
                result
            }
            Err(error) => {
                // Cancellation wins over whatever the step reported
                let error = if token.is_cancelled() {
                    FlowError::Cancelled
                } else {
                    error
                };
                shared.fail(generation, error.clone());
                Err(error)
            }
        }
    }

    async fn pipeline(
        &self,
        generation: u64,
        token: &CancellationToken,
        image: &Arc<RgbaImage>,
        options: &RunOptions,
        started: Instant,
    ) -> Result<RunOutput, FlowError> {
        token.checkpoint()?;
        self.advance(generation, FlowPhase::Analyzing)?;
        let segments = self.analysis.execute(image).await?;

        token.checkpoint()?;
        self.advance(generation, FlowPhase::Translating)?;

        let (aligned, bundle, engine, context) = if segments.is_empty() {
            debug!("No segments above the confidence threshold, rendering empty overlay");
            (Vec::new(), None, None, None)
        } else {
            let mut request = self.translation.request_for(&segments);
            options.apply(&mut request);

            let bundle = self.translation.translate(&request).await?;
            token.checkpoint()?;
            self.store_bundle(generation, &bundle);

            let result = self.translation.effective(&bundle)?;
            let aligned = result.segments.clone();
            let engine = result.engine;
            (aligned, Some(bundle), Some(engine), Some(RunContext { request }))
        };

        token.checkpoint()?;
        self.advance(generation, FlowPhase::Rendering)?;
        let output = self.rendering.execute(image, &aligned).await?;

        Ok(RunOutput {
            result: FlowResult {
                original_image: Arc::clone(image),
                rendered_image: Arc::new(output.image),
                segments: aligned,
                rendered_boxes: output.boxes,
                bundle,
                engine,
                processing_time: started.elapsed(),
            },
            context,
        })
    }

    async fn persist_cache(&self) {
        if let Some(cache) = self.translation.selector().cache() {
            if let Err(e) = cache.save().await {
                warn!("Failed to persist translation cache: {:#}", e);
            }
        }
    }

    /// A superseded run stops at its next phase boundary
    fn advance(&self, generation: u64, phase: FlowPhase) -> Result<(), FlowError> {
        if self.set_phase(generation, phase) {
            Ok(())
        } else {
            Err(FlowError::Cancelled)
        }
    }

    fn complete(
        &self,
        generation: u64,
        token: &CancellationToken,
        output: RunOutput,
    ) -> Result<Arc<FlowResult>, FlowError> {
        if token.is_cancelled() {
            self.fail(generation, FlowError::Cancelled);
            return Err(FlowError::Cancelled);
        }

        let result = Arc::new(output.result);
        {
            let mut state = self.state.write();
            if state.generation != generation {
                return Err(FlowError::Cancelled);
            }
            state.phase = FlowPhase::Completed;
            state.last_error = None;
            state.last_result = Some(Arc::clone(&result));
            state.last_context = output.context;
            self.phase_tx.send_replace(FlowPhase::Completed);
        }

        info!(
            "Run {} completed: {} segments in {:.2}s",
            generation,
            result.segments.len(),
            result.processing_time.as_secs_f64()
        );
        self.metrics.record_run_completed();
        self.notify_phase(&FlowPhase::Completed);
        self.notify_completed(&result);
        Ok(result)
    }

    fn fail(&self, generation: u64, error: FlowError) {
        self.metrics.record_run_failed(&error);

        let bundle = {
            let mut state = self.state.write();
            if state.generation != generation {
                debug!("Superseded run {} ended: {}", generation, error);
                return;
            }
            let phase = FlowPhase::Failed(error.clone());
            state.phase = phase.clone();
            state.last_error = Some(error.clone());
            state.last_result = None;
            if matches!(error, FlowError::Cancelled) {
                state.last_bundle = None;
            }
            self.phase_tx.send_replace(phase);
            state.last_bundle.clone()
        };

        if error.is_silent() {
            info!("Run {} cancelled", generation);
        } else {
            error!("Run {} failed: {}", generation, error);
        }

        self.notify_phase(&FlowPhase::Failed(error.clone()));
        if !error.is_silent() {
            for observer in self.observers() {
                observer.on_failed(&error, bundle.as_ref());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::{AnalysisError, AnalysisResult, ProviderResult};
    use crate::core::types::NormalizedRect;
    use crate::services::rendering::CosmicTextRenderer;
    use crate::services::translation::TranslationProvider;
    use async_trait::async_trait;
    use image::Rgba;

    struct FixedAnalyzer(AnalysisResult<Vec<TextSegment>>);

    #[async_trait]
    impl TextAnalyzer for FixedAnalyzer {
        fn description(&self) -> String {
            "fixed analyzer".to_string()
        }

        async fn analyze(&self, _image: &RgbaImage) -> AnalysisResult<Vec<TextSegment>> {
            self.0.clone()
        }
    }

    struct Upper;

    #[async_trait]
    impl TranslationProvider for Upper {
        fn engine(&self) -> EngineType {
            EngineType::BuiltIn
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn check_connection(&self) -> bool {
            true
        }

        async fn translate_batch(
            &self,
            texts: &[String],
            _source_language: Option<&str>,
            _target_language: &str,
            _prompt: Option<&str>,
        ) -> ProviderResult<Vec<String>> {
            Ok(texts.iter().map(|t| t.to_uppercase()).collect())
        }
    }

    fn controller(analysis: AnalysisResult<Vec<TextSegment>>, min_confidence: f32) -> FlowController {
        let mut config = Config::default();
        config.analysis.min_confidence = min_confidence;
        config.rendering.load_system_fonts = false;
        let config = Arc::new(config);

        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(Upper));
        let metrics = Metrics::new();
        let selector = Arc::new(EngineSelector::new(config.clone(), registry, metrics.clone()));
        let renderer = Arc::new(OverlayRenderer::with_text_renderer(
            config.rendering.clone(),
            Arc::new(CosmicTextRenderer::without_fonts()),
        ));
        FlowController::new(
            config,
            Arc::new(FixedAnalyzer(analysis)),
            selector,
            renderer,
            metrics,
        )
    }

    fn image() -> RgbaImage {
        RgbaImage::from_pixel(64, 32, Rgba([255, 255, 255, 255]))
    }

    #[tokio::test]
    async fn test_analysis_error_names_the_analyzer() {
        let flow = controller(Err(AnalysisError::Transport("connection refused".into())), 0.0);

        let err = flow.run(image()).await.unwrap_err();

        match &err {
            FlowError::AnalysisFailure(message) => {
                assert!(message.contains("connection refused"));
                assert!(message.contains("fixed analyzer"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(flow.phase(), FlowPhase::Failed(err.clone()));
        assert_eq!(flow.last_error(), Some(err));
        assert!(flow.last_bundle().is_none());
    }

    #[tokio::test]
    async fn test_low_confidence_segments_complete_with_empty_overlay() {
        let segments = vec![TextSegment::new("faint", NormalizedRect::new(0.1, 0.1, 0.2, 0.2), 0.2)];
        let flow = controller(Ok(segments), 0.5);

        let result = flow.run(image()).await.unwrap();

        assert!(result.segments.is_empty());
        assert!(result.bundle.is_none());
        assert_eq!(*result.rendered_image, image());
        assert_eq!(flow.phase(), FlowPhase::Completed);
        assert_eq!(flow.progress(), 1.0);
    }

    #[tokio::test]
    async fn test_switch_engine_requires_completed_run() {
        let flow = controller(Ok(Vec::new()), 0.0);
        assert!(matches!(
            flow.switch_engine(EngineType::DeepL).await,
            Err(FlowError::TranslationFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_reset_returns_to_idle() {
        let segments = vec![TextSegment::new("hi", NormalizedRect::new(0.1, 0.1, 0.5, 0.5), 0.9)];
        let flow = controller(Ok(segments), 0.0);

        let result = flow.run(image()).await.unwrap();
        assert_eq!(result.segments[0].translated_text, "HI");
        assert_eq!(result.engine, Some(EngineType::BuiltIn));

        flow.reset();
        assert_eq!(flow.phase(), FlowPhase::Idle);
        assert!(flow.last_result().is_none());
        assert!(flow.last_error().is_none());
        assert_eq!(*flow.subscribe().borrow(), FlowPhase::Idle);
    }
}
