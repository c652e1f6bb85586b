pub mod alignment;
pub mod analysis;
pub mod rendering;
pub mod translation;

// Re-export commonly used services
pub use alignment::SegmentAligner;
pub use analysis::TextAnalyzer;
pub use rendering::{CosmicTextRenderer, OverlayRenderer, RenderOutput};
pub use translation::{
    EngineSelector, ProviderRegistry, TranslationCache, TranslationProvider, TranslationRequest,
};
