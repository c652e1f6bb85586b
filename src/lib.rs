// Library exports for the capture → analyze → translate → render workflow
//
// Capture, text recognition and provider network calls live outside the
// crate; they plug in through `TextAnalyzer` and `TranslationProvider`.

// Core modules
pub mod core;
pub mod middleware;
pub mod orchestration;
pub mod phases;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use core::{
    config::Config,
    errors::{
        AlignmentError, AnalysisError, ConfigError, FlowError, ProviderError, RenderingError,
        TranslationError,
    },
    types::{
        BilingualSegment, EngineResult, EngineType, FlowPhase, FlowResult, NormalizedRect,
        PixelRect, ResultBundle, Scene, SceneBinding, SelectionMode, TextSegment,
    },
};

pub use middleware::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

pub use orchestration::{CancellationToken, FlowController, FlowObserver, RunOptions};

pub use services::{
    CosmicTextRenderer, EngineSelector, OverlayRenderer, ProviderRegistry, SegmentAligner,
    TextAnalyzer, TranslationCache, TranslationProvider, TranslationRequest,
};

pub use utils::{Metrics, MetricsSnapshot};
