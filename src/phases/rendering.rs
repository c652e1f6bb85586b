// Rendering phase: composite the bilingual overlay

use image::RgbaImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

use crate::core::errors::{FlowError, RenderingError};
use crate::core::types::BilingualSegment;
use crate::services::rendering::{OverlayRenderer, RenderOutput};
use crate::utils::{Metrics, Step};

pub struct RenderPipeline {
    renderer: Arc<OverlayRenderer>,
    metrics: Metrics,
}

impl RenderPipeline {
    pub fn new(renderer: Arc<OverlayRenderer>, metrics: Metrics) -> Self {
        Self { renderer, metrics }
    }

    pub fn renderer(&self) -> &Arc<OverlayRenderer> {
        &self.renderer
    }

    #[instrument(skip(self, image, segments), fields(segments = segments.len()))]
    pub async fn execute(
        &self,
        image: &RgbaImage,
        segments: &[BilingualSegment],
    ) -> Result<RenderOutput, FlowError> {
        let started = Instant::now();
        let output = self.renderer.render(image, segments).await;
        self.metrics
            .record_step_duration(Step::Rendering, started.elapsed());

        let output = output?;
        if output.image.dimensions() != image.dimensions() {
            return Err(RenderingError::EmptyOutput.into());
        }

        self.metrics.record_overlay_rendered();
        Ok(output)
    }
}
