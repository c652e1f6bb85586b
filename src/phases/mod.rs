// One pipeline object per flow phase
//
// Each pipeline maps its step's own errors into `FlowError`.

pub mod analysis;
pub mod rendering;
pub mod translation;

pub use analysis::AnalysisPipeline;
pub use rendering::RenderPipeline;
pub use translation::TranslationPipeline;
