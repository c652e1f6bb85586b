// Text analysis contract
//
// OCR / vision-language engines live outside this crate. They implement
// `TextAnalyzer` and hand back ordered segments with normalized boxes.

use async_trait::async_trait;
use image::RgbaImage;

use crate::core::errors::AnalysisResult;
use crate::core::types::TextSegment;

#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    /// Provider/model description appended to analysis failure messages
    fn description(&self) -> String;

    /// Detect text in `image`, in reading order. An empty list means no text.
    async fn analyze(&self, image: &RgbaImage) -> AnalysisResult<Vec<TextSegment>>;
}
