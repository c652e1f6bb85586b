// Translation phase: engine selection

use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

use crate::core::errors::FlowError;
use crate::core::types::{EngineResult, ResultBundle, TextSegment};
use crate::services::translation::{EngineSelector, TranslationRequest};
use crate::utils::{Metrics, Step};

pub struct TranslationPipeline {
    selector: Arc<EngineSelector>,
    metrics: Metrics,
}

impl TranslationPipeline {
    pub fn new(selector: Arc<EngineSelector>, metrics: Metrics) -> Self {
        Self { selector, metrics }
    }

    pub fn selector(&self) -> &Arc<EngineSelector> {
        &self.selector
    }

    /// Request carrying the segments in analysis order
    pub fn request_for(&self, segments: &[TextSegment]) -> TranslationRequest {
        self.selector.request_for_segments(segments)
    }

    /// Run the selector. A bundle whose engines all failed is still returned;
    /// see [`Self::effective`].
    #[instrument(skip(self, request), fields(texts = request.texts.len()))]
    pub async fn translate(&self, request: &TranslationRequest) -> Result<ResultBundle, FlowError> {
        let started = Instant::now();
        let bundle = self.selector.select(request).await;
        self.metrics
            .record_step_duration(Step::Translation, started.elapsed());
        Ok(bundle?)
    }

    /// The result to render: the primary's if it succeeded, else the first success
    pub fn effective<'a>(&self, bundle: &'a ResultBundle) -> Result<&'a EngineResult, FlowError> {
        let result = bundle
            .effective_result()
            .ok_or_else(|| FlowError::from(bundle.failure()))?;
        if result.engine != bundle.primary_engine {
            info!(
                "Using {} result, primary {} did not succeed",
                result.engine, bundle.primary_engine
            );
        }
        Ok(result)
    }
}
