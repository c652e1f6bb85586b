pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{
    AlignmentError, AnalysisError, ConfigError, FlowError, ProviderError, RenderingError,
    TranslationError,
};
pub use types::{
    BilingualSegment, EngineResult, EngineType, FlowPhase, FlowResult, NormalizedRect, PixelRect,
    ResultBundle, Scene, SceneBinding, SelectionMode, TextSegment,
};
