// Shared stubs for the end-to-end flow tests
#![allow(dead_code)]

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use screen_translate::{
    core::errors::{AnalysisError, AnalysisResult, ProviderError, ProviderResult},
    services::rendering::OverlayRenderer,
    Config, EngineSelector, EngineType, FlowController, FlowError, FlowObserver, FlowPhase,
    FlowResult, Metrics, NormalizedRect, ProviderRegistry, ResultBundle, TextAnalyzer,
    TextSegment, TranslationProvider,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Analyzer returning a fixed list of segments
pub struct StubAnalyzer {
    pub segments: Vec<TextSegment>,
    pub error: Option<AnalysisError>,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl StubAnalyzer {
    pub fn returning(segments: Vec<TextSegment>) -> Self {
        Self {
            segments,
            error: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextAnalyzer for StubAnalyzer {
    fn description(&self) -> String {
        "stub analyzer".to_string()
    }

    async fn analyze(&self, _image: &RgbaImage) -> AnalysisResult<Vec<TextSegment>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(self.segments.clone()),
        }
    }
}

pub enum Reply {
    /// Look each text up in the table, unknown texts come back unchanged
    Table(HashMap<String, String>),
    Fail(String),
    Sleep(Duration),
}

/// Provider with a scripted reply and a call counter
pub struct StubProvider {
    pub engine: EngineType,
    pub reply: Reply,
    pub calls: AtomicUsize,
    /// When set, the call signals `entered` and waits for `release`
    pub gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl StubProvider {
    pub fn translating(engine: EngineType, pairs: &[(&str, &str)]) -> Arc<Self> {
        let table = pairs
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();
        Arc::new(Self::new(engine, Reply::Table(table)))
    }

    pub fn failing(engine: EngineType, message: &str) -> Arc<Self> {
        Arc::new(Self::new(engine, Reply::Fail(message.to_string())))
    }

    pub fn sleeping(engine: EngineType, delay: Duration) -> Arc<Self> {
        Arc::new(Self::new(engine, Reply::Sleep(delay)))
    }

    pub fn new(engine: EngineType, reply: Reply) -> Self {
        Self {
            engine,
            reply,
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranslationProvider for StubProvider {
    fn engine(&self) -> EngineType {
        self.engine
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
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }

        match &self.reply {
            Reply::Table(table) => Ok(texts
                .iter()
                .map(|t| table.get(t).cloned().unwrap_or_else(|| t.clone()))
                .collect()),
            Reply::Fail(message) => Err(ProviderError::Request(message.clone())),
            Reply::Sleep(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(texts.to_vec())
            }
        }
    }
}

/// Observer recording every notification
#[derive(Default)]
pub struct RecordingObserver {
    pub loading: AtomicUsize,
    pub phases: Mutex<Vec<FlowPhase>>,
    pub completed: Mutex<Vec<Arc<FlowResult>>>,
    pub failures: Mutex<Vec<(FlowError, Option<ResultBundle>)>>,
}

impl RecordingObserver {
    pub fn phases(&self) -> Vec<FlowPhase> {
        self.phases.lock().clone()
    }

    pub fn failures(&self) -> Vec<(FlowError, Option<ResultBundle>)> {
        self.failures.lock().clone()
    }
}

impl FlowObserver for RecordingObserver {
    fn on_loading(&self, _image: &Arc<RgbaImage>) {
        self.loading.fetch_add(1, Ordering::SeqCst);
    }

    fn on_phase(&self, phase: &FlowPhase) {
        self.phases.lock().push(phase.clone());
    }

    fn on_completed(&self, result: &Arc<FlowResult>) {
        self.completed.lock().push(Arc::clone(result));
    }

    fn on_failed(&self, error: &FlowError, bundle: Option<&ResultBundle>) {
        self.failures.lock().push((error.clone(), bundle.cloned()));
    }
}

/// Defaults with font loading and caching off
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.rendering.load_system_fonts = false;
    config.rendering.font_dir = None;
    config.cache.enabled = false;
    config
}

/// Controller over `analyzer` and `providers`, registered in order
pub fn flow(
    config: Config,
    analyzer: Arc<StubAnalyzer>,
    providers: Vec<Arc<StubProvider>>,
) -> (FlowController, Arc<RecordingObserver>) {
    let config = Arc::new(config);
    let registry = Arc::new(ProviderRegistry::new());
    for provider in providers {
        registry.register(provider);
    }

    let metrics = Metrics::new();
    let selector = Arc::new(EngineSelector::new(config.clone(), registry, metrics.clone()));
    let renderer = Arc::new(OverlayRenderer::new(config.rendering.clone()));
    let controller = FlowController::new(config, analyzer, selector, renderer, metrics);

    let observer = Arc::new(RecordingObserver::default());
    controller.add_observer(observer.clone());
    (controller, observer)
}

/// "Hello" and "World" on two lines of a 200x100 capture
pub fn hello_world() -> Vec<TextSegment> {
    vec![
        TextSegment::new("Hello", NormalizedRect::new(0.1, 0.1, 0.3, 0.2), 0.95),
        TextSegment::new("World", NormalizedRect::new(0.1, 0.5, 0.3, 0.2), 0.90),
    ]
}

pub fn capture() -> RgbaImage {
    RgbaImage::from_pixel(200, 100, Rgba([20, 20, 20, 255]))
}
