// Error taxonomy for the capture → render flow
//
// Errors are layered:
// - ProviderError: one provider call (always captured into an EngineResult)
// - TranslationError: the engine selector could not form a usable bundle
// - AnalysisError / AlignmentError / RenderingError: one step's own failure
// - FlowError: the five-case classification surfaced to callers

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::core::types::EngineType;

/// Analyzer contract errors
#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    #[error("Analyzer transport failed: {0}")]
    Transport(String),

    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidImageSize { width: u32, height: u32 },

    #[error("Malformed analyzer output: {0}")]
    MalformedOutput(String),
}

/// Failure of a single provider call
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProviderError {
    #[error("{engine} timed out after {}ms", .after.as_millis())]
    Timeout { engine: EngineType, after: Duration },

    #[error("Provider returned {actual} translations for {expected} texts")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("{0} is not available")]
    Unavailable(EngineType),

    #[error("{0} is not registered")]
    NotRegistered(EngineType),

    #[error("{0} circuit is open after repeated failures")]
    CircuitOpen(EngineType),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Provider returned no translations")]
    EmptyResponse,
}

/// Engine selector errors: no usable bundle could be formed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranslationError {
    #[error("All translation engines failed: {}", describe_failures(.0))]
    AllEnginesFailed(Vec<(EngineType, ProviderError)>),

    #[error("No translation engines configured")]
    NoEnginesConfigured,

    #[error("Primary engine {0} is not available and no fallback is configured")]
    PrimaryNotAvailable(EngineType),

    #[error("Translation produced no results")]
    NoResults,
}

/// First entry is reported as the primary error, the rest as secondary detail
fn describe_failures(failures: &[(EngineType, ProviderError)]) -> String {
    let mut iter = failures.iter();
    let Some((engine, error)) = iter.next() else {
        return "no engines attempted".to_string();
    };
    let mut message = format!("{}: {}", engine, error);
    let rest: Vec<String> = iter.map(|(e, err)| format!("{}: {}", e, err)).collect();
    if !rest.is_empty() {
        message.push_str(&format!(" (also tried {})", rest.join("; ")));
    }
    message
}

/// Segment alignment errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlignmentError {
    #[error("Expected {expected} translations but received {actual}")]
    CountMismatch { expected: usize, actual: usize },
}

/// Overlay rendering errors
#[derive(Debug, Error)]
pub enum RenderingError {
    #[error("Font loading failed: {0}")]
    FontLoadError(String),

    #[error("Image processing failed: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Invalid bitmap dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Renderer produced no output")]
    EmptyOutput,

    #[error("Render task failed: {0}")]
    TaskFailed(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid translation config: {0}")]
    InvalidTranslationConfig(String),

    #[error("Invalid rendering config: {0}")]
    InvalidRenderingConfig(String),

    #[error("Confidence threshold must be in [0.0, 1.0], got {0}")]
    InvalidConfidenceThreshold(f32),

    #[error("Duplicate binding for scene {0}")]
    DuplicateSceneBinding(String),

    #[error("Failed to read scene config {path}: {source}")]
    SceneFileRead {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse scene config: {0}")]
    SceneFileParse(#[from] serde_json::Error),

    #[error("Environment variable parsing failed: {0}")]
    EnvVarError(String),
}

/// Outcome classification surfaced by the flow controller
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowError {
    #[error("Text analysis failed: {0}")]
    AnalysisFailure(String),

    #[error("Translation failed: {message}")]
    TranslationFailure {
        message: String,
        detail: Option<TranslationError>,
    },

    #[error("Rendering failed: {0}")]
    RenderingFailure(String),

    #[error("Translation cancelled")]
    Cancelled,

    #[error("No text found in the captured region")]
    NoTextFound,
}

impl FlowError {
    pub fn translation(message: impl Into<String>) -> Self {
        FlowError::TranslationFailure {
            message: message.into(),
            detail: None,
        }
    }

    /// Optional hint shown under the error message
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            FlowError::AnalysisFailure(_) => {
                Some("Check the configured analysis endpoint and model, then try again.")
            }
            FlowError::TranslationFailure { detail, .. } => match detail {
                Some(TranslationError::NoEnginesConfigured) => {
                    Some("Configure at least one translation engine.")
                }
                Some(TranslationError::PrimaryNotAvailable(_)) => {
                    Some("Enable the primary engine or configure a fallback engine.")
                }
                _ => Some("Check your configured translation endpoints and credentials."),
            },
            FlowError::RenderingFailure(_) => Some("Try capturing a smaller region."),
            FlowError::NoTextFound => Some("Select a region that contains readable text."),
            FlowError::Cancelled => None,
        }
    }

    /// Cancellation is a silent terminal state: no alert is shown for it
    pub fn is_silent(&self) -> bool {
        matches!(self, FlowError::Cancelled)
    }
}

impl From<TranslationError> for FlowError {
    fn from(error: TranslationError) -> Self {
        FlowError::TranslationFailure {
            message: error.to_string(),
            detail: Some(error),
        }
    }
}

impl From<AlignmentError> for FlowError {
    fn from(error: AlignmentError) -> Self {
        FlowError::translation(error.to_string())
    }
}

impl From<RenderingError> for FlowError {
    fn from(error: RenderingError) -> Self {
        FlowError::RenderingFailure(error.to_string())
    }
}

// Convenience type aliases for Results
pub type AnalysisResult<T> = Result<T, AnalysisError>;
pub type ProviderResult<T> = Result<T, ProviderError>;
pub type RenderingResult<T> = Result<T, RenderingError>;
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_engines_failed_reports_primary_first() {
        let error = TranslationError::AllEnginesFailed(vec![
            (EngineType::BuiltIn, ProviderError::Request("offline".into())),
            (
                EngineType::DeepL,
                ProviderError::Timeout {
                    engine: EngineType::DeepL,
                    after: Duration::from_secs(2),
                },
            ),
        ]);
        let message = error.to_string();

        assert!(message.starts_with("All translation engines failed: builtin: Request failed: offline"));
        assert!(message.contains("also tried deepl: deepl timed out after 2000ms"));
    }

    #[test]
    fn test_selector_errors_wrap_into_translation_failure() {
        let flow: FlowError = TranslationError::NoEnginesConfigured.into();
        match &flow {
            FlowError::TranslationFailure { detail, .. } => {
                assert_eq!(detail, &Some(TranslationError::NoEnginesConfigured));
            }
            other => panic!("unexpected classification: {:?}", other),
        }
        assert_eq!(
            flow.recovery_suggestion(),
            Some("Configure at least one translation engine.")
        );
    }

    #[test]
    fn test_alignment_mismatch_names_counts() {
        let flow: FlowError = AlignmentError::CountMismatch { expected: 3, actual: 2 }.into();
        assert_eq!(
            flow.to_string(),
            "Translation failed: Expected 3 translations but received 2"
        );
    }

    #[test]
    fn test_cancelled_is_silent() {
        assert!(FlowError::Cancelled.is_silent());
        assert!(FlowError::Cancelled.recovery_suggestion().is_none());
        assert!(!FlowError::NoTextFound.is_silent());
    }
}
