use tracing::debug;

use crate::core::errors::AlignmentError;
use crate::core::types::{BilingualSegment, TextSegment};

/// Pairs analysis segments with one engine's translations, index for index
#[derive(Debug, Clone)]
pub struct SegmentAligner {
    source_language: Option<String>,
    target_language: String,
}

impl SegmentAligner {
    pub fn new(source_language: Option<String>, target_language: impl Into<String>) -> Self {
        Self {
            source_language,
            target_language: target_language.into(),
        }
    }

    /// Positional pairing. A count mismatch is a provider contract violation
    /// and yields no partial result.
    pub fn align(
        &self,
        segments: &[TextSegment],
        translations: &[String],
    ) -> Result<Vec<BilingualSegment>, AlignmentError> {
        if segments.len() != translations.len() {
            return Err(AlignmentError::CountMismatch {
                expected: segments.len(),
                actual: translations.len(),
            });
        }

        let aligned: Vec<BilingualSegment> = segments
            .iter()
            .zip(translations)
            .map(|(segment, translated)| BilingualSegment {
                id: segment.id,
                original: segment.clone(),
                translated_text: translated.clone(),
                source_language: self.source_language.clone(),
                target_language: self.target_language.clone(),
            })
            .collect();

        debug!("Aligned {} segments", aligned.len());
        Ok(aligned)
    }
}
