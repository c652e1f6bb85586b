// Analysis phase: run the external analyzer and filter its output

use image::RgbaImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

use crate::core::config::Config;
use crate::core::errors::FlowError;
use crate::core::types::TextSegment;
use crate::services::analysis::TextAnalyzer;
use crate::utils::{Metrics, Step};

pub struct AnalysisPipeline {
    config: Arc<Config>,
    analyzer: Arc<dyn TextAnalyzer>,
    metrics: Metrics,
}

impl AnalysisPipeline {
    pub fn new(config: Arc<Config>, analyzer: Arc<dyn TextAnalyzer>, metrics: Metrics) -> Self {
        Self {
            config,
            analyzer,
            metrics,
        }
    }

    /// Detect text segments.
    ///
    /// An analyzer error becomes `AnalysisFailure` with the analyzer's
    /// description appended. An empty result is `NoTextFound`. Segments
    /// under the confidence threshold are dropped afterwards, so a run can
    /// legitimately continue with zero segments.
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub async fn execute(&self, image: &RgbaImage) -> Result<Vec<TextSegment>, FlowError> {
        let started = Instant::now();
        let result = self.analyzer.analyze(image).await;
        self.metrics
            .record_step_duration(Step::Analysis, started.elapsed());

        let segments = result.map_err(|e| {
            FlowError::AnalysisFailure(format!("{} [{}]", e, self.analyzer.description()))
        })?;

        if segments.is_empty() {
            return Err(FlowError::NoTextFound);
        }

        let detected = segments.len();
        let threshold = self.config.analysis.min_confidence;
        let kept: Vec<TextSegment> = segments
            .into_iter()
            .filter(|s| s.confidence >= threshold)
            .collect();

        if kept.len() < detected {
            debug!(
                "Dropped {} of {} segments below confidence {:.2}",
                detected - kept.len(),
                detected,
                threshold
            );
        }
        Ok(kept)
    }
}
