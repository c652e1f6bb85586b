// Shared data model for the capture → analyze → translate → render flow

use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::core::errors::{FlowError, ProviderError, TranslationError};

/// Rectangle in normalized image space (0..1 on each axis, origin top-left)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Convert to pixel coordinates of a bitmap (`box * bitmapSize` componentwise)
    pub fn to_pixels(&self, image_width: u32, image_height: u32) -> PixelRect {
        let w = image_width as f64;
        let h = image_height as f64;
        PixelRect {
            x: self.x * w,
            y: self.y * h,
            width: self.width * w,
            height: self.height * h,
        }
    }
}

/// Rectangle in pixel space of a concrete bitmap
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn max_x(&self) -> f64 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Inverse of [`NormalizedRect::to_pixels`]
    pub fn to_normalized(&self, image_width: u32, image_height: u32) -> NormalizedRect {
        let w = (image_width as f64).max(1.0);
        let h = (image_height as f64).max(1.0);
        NormalizedRect {
            x: self.x / w,
            y: self.y / h,
            width: self.width / w,
            height: self.height / h,
        }
    }

    /// Grow the rectangle by `margin` pixels on every side
    pub fn expanded(&self, margin: f64) -> PixelRect {
        PixelRect {
            x: self.x - margin,
            y: self.y - margin,
            width: self.width + margin * 2.0,
            height: self.height + margin * 2.0,
        }
    }

    /// Clip to `[0, width) x [0, height)`
    pub fn clamped(&self, image_width: u32, image_height: u32) -> PixelRect {
        let x1 = self.x.clamp(0.0, image_width as f64);
        let y1 = self.y.clamp(0.0, image_height as f64);
        let x2 = self.max_x().clamp(0.0, image_width as f64);
        let y2 = self.max_y().clamp(0.0, image_height as f64);
        PixelRect {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0.0),
            height: (y2 - y1).max(0.0),
        }
    }

    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.x && px <= self.max_x() && py >= self.y && py <= self.max_y()
    }
}

/// One detected piece of text with its position in the captured bitmap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSegment {
    pub id: Uuid,
    pub text: String,
    pub bounding_box: NormalizedRect,
    pub confidence: f32,
}

impl TextSegment {
    pub fn new(text: impl Into<String>, bounding_box: NormalizedRect, confidence: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            bounding_box,
            confidence,
        }
    }
}

/// A text segment paired with its translation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BilingualSegment {
    pub id: Uuid,
    pub original: TextSegment,
    pub translated_text: String,
    pub source_language: Option<String>,
    pub target_language: String,
}

/// Translation backend identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    /// Locally-available built-in provider
    BuiltIn,
    Ollama,
    OpenAi,
    Claude,
    Gemini,
    Google,
    DeepL,
    Baidu,
    Custom,
}

impl EngineType {
    pub const ALL: [EngineType; 9] = [
        EngineType::BuiltIn,
        EngineType::Ollama,
        EngineType::OpenAi,
        EngineType::Claude,
        EngineType::Gemini,
        EngineType::Google,
        EngineType::DeepL,
        EngineType::Baidu,
        EngineType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineType::BuiltIn => "builtin",
            EngineType::Ollama => "ollama",
            EngineType::OpenAi => "openai",
            EngineType::Claude => "claude",
            EngineType::Gemini => "gemini",
            EngineType::Google => "google",
            EngineType::DeepL => "deepl",
            EngineType::Baidu => "baidu",
            EngineType::Custom => "custom",
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, EngineType::BuiltIn)
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        EngineType::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == needle)
            .ok_or_else(|| format!("unknown engine '{}'", s))
    }
}

/// Engine dispatch policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    #[default]
    PrimaryWithFallback,
    Parallel,
    QuickSwitch,
    SceneBinding,
}

impl FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "primary_with_fallback" | "fallback" => Ok(SelectionMode::PrimaryWithFallback),
            "parallel" => Ok(SelectionMode::Parallel),
            "quick_switch" => Ok(SelectionMode::QuickSwitch),
            "scene_binding" | "scene" => Ok(SelectionMode::SceneBinding),
            other => Err(format!("unknown selection mode '{}'", other)),
        }
    }
}

/// Named usage context used to pick engine bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scene {
    #[default]
    Screenshot,
    TextSelection,
    TranslateAndInsert,
}

impl Scene {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scene::Screenshot => "screenshot",
            Scene::TextSelection => "text_selection",
            Scene::TranslateAndInsert => "translate_and_insert",
        }
    }
}

impl fmt::Display for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scene {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "screenshot" => Ok(Scene::Screenshot),
            "text_selection" => Ok(Scene::TextSelection),
            "translate_and_insert" => Ok(Scene::TranslateAndInsert),
            other => Err(format!("unknown scene '{}'", other)),
        }
    }
}

/// Engine choice for one scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneBinding {
    pub scene: Scene,
    pub primary_engine: EngineType,
    #[serde(default)]
    pub fallback_engine: Option<EngineType>,
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
    #[serde(default)]
    pub custom_prompt: Option<String>,
}

fn default_true() -> bool {
    true
}

impl SceneBinding {
    /// Binding used when a scene has none configured: built-in primary,
    /// first external provider as fallback, fallback enabled
    pub fn default_for(scene: Scene, first_external: Option<EngineType>) -> Self {
        Self {
            scene,
            primary_engine: EngineType::BuiltIn,
            fallback_engine: first_external,
            fallback_enabled: true,
            custom_prompt: None,
        }
    }
}

/// Outcome of one provider attempt within a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineResult {
    pub engine: EngineType,
    /// This engine's translations aligned onto the request's segments, in order
    pub segments: Vec<BilingualSegment>,
    pub latency: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderError>,
}

impl EngineResult {
    pub fn success(engine: EngineType, segments: Vec<BilingualSegment>, latency: Duration) -> Self {
        Self {
            engine,
            segments,
            latency,
            error: None,
        }
    }

    pub fn failure(engine: EngineType, error: ProviderError, latency: Duration) -> Self {
        Self {
            engine,
            segments: Vec::new(),
            latency,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.segments.is_empty()
    }

    /// Translated strings in segment order
    pub fn translations(&self) -> Vec<&str> {
        self.segments
            .iter()
            .map(|s| s.translated_text.as_str())
            .collect()
    }
}

/// Aggregated outcome of one translation request across engines
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultBundle {
    pub results: Vec<EngineResult>,
    pub primary_engine: EngineType,
    pub selection_mode: SelectionMode,
    pub scene: Option<Scene>,
    pub timestamp: DateTime<Utc>,
}

impl ResultBundle {
    pub fn new(
        primary_engine: EngineType,
        selection_mode: SelectionMode,
        scene: Option<Scene>,
    ) -> Self {
        Self {
            results: Vec::new(),
            primary_engine,
            selection_mode,
            scene,
            timestamp: Utc::now(),
        }
    }

    /// Record one engine attempt; a second attempt for the same engine replaces the first
    pub fn push(&mut self, result: EngineResult) {
        if let Some(existing) = self.results.iter_mut().find(|r| r.engine == result.engine) {
            *existing = result;
        } else {
            self.results.push(result);
        }
    }

    /// Bilingual segments of the primary engine, empty if it failed or was not attempted
    pub fn primary_result(&self) -> &[BilingualSegment] {
        self.results
            .iter()
            .find(|r| r.engine == self.primary_engine && r.is_success())
            .map(|r| r.segments.as_slice())
            .unwrap_or(&[])
    }

    /// The result a caller should present: the primary's if it succeeded,
    /// otherwise the first successful one
    pub fn effective_result(&self) -> Option<&EngineResult> {
        self.results
            .iter()
            .find(|r| r.engine == self.primary_engine && r.is_success())
            .or_else(|| self.results.iter().find(|r| r.is_success()))
    }

    pub fn result_for(&self, engine: EngineType) -> Option<&EngineResult> {
        self.results.iter().find(|r| r.engine == engine)
    }

    pub fn successful_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Structured failure for a bundle with no usable result
    pub fn failure(&self) -> TranslationError {
        if self.results.is_empty() {
            return TranslationError::NoResults;
        }
        TranslationError::AllEnginesFailed(
            self.results
                .iter()
                .map(|r| {
                    (
                        r.engine,
                        r.error.clone().unwrap_or(ProviderError::EmptyResponse),
                    )
                })
                .collect(),
        )
    }
}

/// Stage of the capture-to-render pipeline
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FlowPhase {
    #[default]
    Idle,
    Analyzing,
    Translating,
    Rendering,
    Completed,
    Failed(FlowError),
}

impl FlowPhase {
    pub fn progress(&self) -> f64 {
        match self {
            FlowPhase::Idle => 0.0,
            FlowPhase::Analyzing => 0.25,
            FlowPhase::Translating => 0.50,
            FlowPhase::Rendering => 0.75,
            FlowPhase::Completed => 1.0,
            FlowPhase::Failed(_) => 0.0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowPhase::Completed | FlowPhase::Failed(_))
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self,
            FlowPhase::Analyzing | FlowPhase::Translating | FlowPhase::Rendering
        )
    }

    /// Position in the forward order; terminal phases share the last rank
    pub(crate) fn rank(&self) -> u8 {
        match self {
            FlowPhase::Idle => 0,
            FlowPhase::Analyzing => 1,
            FlowPhase::Translating => 2,
            FlowPhase::Rendering => 3,
            FlowPhase::Completed | FlowPhase::Failed(_) => 4,
        }
    }
}

impl fmt::Display for FlowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowPhase::Idle => f.write_str("idle"),
            FlowPhase::Analyzing => f.write_str("analyzing"),
            FlowPhase::Translating => f.write_str("translating"),
            FlowPhase::Rendering => f.write_str("rendering"),
            FlowPhase::Completed => f.write_str("completed"),
            FlowPhase::Failed(e) => write!(f, "failed({})", e),
        }
    }
}

/// Output of a completed run
#[derive(Debug, Clone)]
pub struct FlowResult {
    pub original_image: Arc<RgbaImage>,
    pub rendered_image: Arc<RgbaImage>,
    pub segments: Vec<BilingualSegment>,
    /// Pixel-space boxes actually filled by the renderer, for hit testing
    pub rendered_boxes: Vec<PixelRect>,
    /// Absent when no text survived analysis filtering and no engine was called
    pub bundle: Option<ResultBundle>,
    pub engine: Option<EngineType>,
    pub processing_time: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_round_trip() {
        let normalized = NormalizedRect::new(0.1, 0.2, 0.3, 0.1);
        let px = normalized.to_pixels(1000, 500);

        assert!((px.x - 100.0).abs() < 1e-6);
        assert!((px.y - 100.0).abs() < 1e-6);
        assert!((px.width - 300.0).abs() < 1e-6);
        assert!((px.height - 50.0).abs() < 1e-6);

        let back = px.to_normalized(1000, 500);
        assert!((back.x - 0.1).abs() < 1e-6);
        assert!((back.y - 0.2).abs() < 1e-6);
        assert!((back.width - 0.3).abs() < 1e-6);
        assert!((back.height - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_phase_progress_is_monotonic() {
        let phases = [
            FlowPhase::Idle,
            FlowPhase::Analyzing,
            FlowPhase::Translating,
            FlowPhase::Rendering,
            FlowPhase::Completed,
        ];
        for pair in phases.windows(2) {
            assert!(pair[0].progress() <= pair[1].progress());
        }
        assert_eq!(FlowPhase::Failed(FlowError::Cancelled).progress(), 0.0);
        assert!(FlowPhase::Failed(FlowError::NoTextFound).is_terminal());
        assert!(!FlowPhase::Rendering.is_terminal());
    }

    fn bilingual(translated: &str) -> BilingualSegment {
        let original = TextSegment::new("src", NormalizedRect::new(0.0, 0.0, 0.5, 0.5), 0.9);
        BilingualSegment {
            id: original.id,
            original,
            translated_text: translated.to_string(),
            source_language: None,
            target_language: "de".to_string(),
        }
    }

    #[test]
    fn test_engine_result_success_requires_segments() {
        let ok = EngineResult::success(EngineType::BuiltIn, vec![bilingual("a")], Duration::ZERO);
        let empty = EngineResult::success(EngineType::BuiltIn, Vec::new(), Duration::ZERO);
        let failed = EngineResult::failure(
            EngineType::OpenAi,
            ProviderError::Request("boom".into()),
            Duration::ZERO,
        );

        assert!(ok.is_success());
        assert!(!empty.is_success());
        assert!(!failed.is_success());
    }

    #[test]
    fn test_bundle_primary_and_effective_result() {
        let mut bundle = ResultBundle::new(EngineType::BuiltIn, SelectionMode::PrimaryWithFallback, None);
        bundle.push(EngineResult::failure(
            EngineType::BuiltIn,
            ProviderError::Request("down".into()),
            Duration::ZERO,
        ));
        bundle.push(EngineResult::success(
            EngineType::DeepL,
            vec![bilingual("hallo")],
            Duration::from_millis(12),
        ));

        assert!(bundle.primary_result().is_empty());
        assert_eq!(bundle.effective_result().map(|r| r.engine), Some(EngineType::DeepL));
        assert_eq!(bundle.successful_count(), 1);
    }

    #[test]
    fn test_bundle_keeps_one_entry_per_engine() {
        let mut bundle = ResultBundle::new(EngineType::BuiltIn, SelectionMode::QuickSwitch, None);
        bundle.push(EngineResult::failure(
            EngineType::BuiltIn,
            ProviderError::EmptyResponse,
            Duration::ZERO,
        ));
        bundle.push(EngineResult::success(EngineType::BuiltIn, vec![bilingual("x")], Duration::ZERO));

        assert_eq!(bundle.results.len(), 1);
        assert_eq!(bundle.primary_result().len(), 1);
        assert_eq!(bundle.results[0].translations(), ["x"]);
    }

    #[test]
    fn test_bundle_failure_lists_every_engine() {
        let empty = ResultBundle::new(EngineType::BuiltIn, SelectionMode::Parallel, None);
        assert_eq!(empty.failure(), TranslationError::NoResults);

        let mut bundle = ResultBundle::new(EngineType::BuiltIn, SelectionMode::Parallel, None);
        bundle.push(EngineResult::failure(
            EngineType::BuiltIn,
            ProviderError::EmptyResponse,
            Duration::ZERO,
        ));
        bundle.push(EngineResult::failure(
            EngineType::Gemini,
            ProviderError::Unavailable(EngineType::Gemini),
            Duration::ZERO,
        ));
        match bundle.failure() {
            TranslationError::AllEnginesFailed(errors) => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].0, EngineType::BuiltIn);
            }
            other => panic!("unexpected failure kind: {:?}", other),
        }
    }

    #[test]
    fn test_engine_and_mode_parsing() {
        assert_eq!("DeepL".parse::<EngineType>(), Ok(EngineType::DeepL));
        assert_eq!("builtin".parse::<EngineType>(), Ok(EngineType::BuiltIn));
        assert!("babelfish".parse::<EngineType>().is_err());
        assert_eq!("quick-switch".parse::<SelectionMode>(), Ok(SelectionMode::QuickSwitch));
        assert_eq!("translate_and_insert".parse::<Scene>(), Ok(Scene::TranslateAndInsert));
    }

    #[test]
    fn test_default_scene_binding() {
        let binding = SceneBinding::default_for(Scene::Screenshot, Some(EngineType::OpenAi));
        assert_eq!(binding.primary_engine, EngineType::BuiltIn);
        assert_eq!(binding.fallback_engine, Some(EngineType::OpenAi));
        assert!(binding.fallback_enabled);
        assert!(binding.custom_prompt.is_none());
    }

    #[test]
    fn test_pixel_rect_hit_and_clamp() {
        let rect = PixelRect::new(10.0, 10.0, 20.0, 10.0);
        assert!(rect.contains(15.0, 15.0));
        assert!(!rect.contains(5.0, 15.0));
        assert!(rect.expanded(6.0).contains(5.0, 15.0));

        let clamped = PixelRect::new(-5.0, 90.0, 30.0, 30.0).clamped(100, 100);
        assert_eq!(clamped.x, 0.0);
        assert_eq!(clamped.width, 25.0);
        assert_eq!(clamped.height, 10.0);
    }
}
