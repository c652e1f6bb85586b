use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::{warn, Level};

use crate::core::errors::ConfigError;
use crate::core::types::{EngineType, Scene, SceneBinding, SelectionMode};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_level: Level,
}

/// Engine selection configuration
#[derive(Debug, Clone)]
pub struct TranslationConfig {
    pub selection_mode: SelectionMode,
    pub target_language: String,
    /// None means the provider auto-detects
    pub source_language: Option<String>,
    pub primary_engine: EngineType,
    pub fallback_engine: Option<EngineType>,
    pub fallback_enabled: bool,
    pub parallel_engines: Vec<EngineType>,
    /// Global override for every provider's own default timeout
    pub timeout_override: Option<Duration>,
    pub engine_timeouts: HashMap<EngineType, Duration>,
}

/// Scene bindings
#[derive(Debug, Clone, Default)]
pub struct SceneConfig {
    pub active_scene: Option<Scene>,
    pub bindings: Vec<SceneBinding>,
}

/// Prompt templates, resolved by substring substitution
#[derive(Debug, Clone, Default)]
pub struct PromptConfig {
    pub engine_templates: HashMap<EngineType, String>,
    pub scene_templates: HashMap<Scene, String>,
}

/// Analysis output filtering
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub min_confidence: f32,
}

/// Overlay rendering configuration
#[derive(Debug, Clone)]
pub struct RenderingConfig {
    pub min_font_size: f32,
    pub max_font_size: f32,
    /// Font size as a fraction of the original box height
    pub font_scale: f32,
    /// Padding added around measured text, per side
    pub text_padding: f32,
    /// Distance of the background sample points from the box edges
    pub sample_offset: f64,
    /// Caller-provided wrapping width; never narrower than the original box
    pub max_text_width: Option<f32>,
    /// Margin around rendered boxes used for hit testing
    pub hit_margin: f64,
    pub font_dir: Option<String>,
    pub load_system_fonts: bool,
}

/// Translation cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
    /// Directory for JSON persistence; in-memory only when absent
    pub cache_dir: Option<String>,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub translation: TranslationConfig,
    pub scenes: SceneConfig,
    pub prompts: PromptConfig,
    pub analysis: AnalysisConfig,
    pub rendering: RenderingConfig,
    pub cache: CacheConfig,
}

/// On-disk layout of `SCENE_CONFIG_PATH`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SceneFile {
    bindings: Vec<SceneBinding>,
    engine_prompts: HashMap<String, String>,
    scene_prompts: HashMap<String, String>,
    engine_timeouts_ms: HashMap<String, u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                log_level: Level::INFO,
            },
            translation: TranslationConfig {
                selection_mode: SelectionMode::PrimaryWithFallback,
                target_language: "en".to_string(),
                source_language: None,
                primary_engine: EngineType::BuiltIn,
                fallback_engine: None,
                fallback_enabled: true,
                parallel_engines: Vec::new(),
                timeout_override: None,
                engine_timeouts: HashMap::new(),
            },
            scenes: SceneConfig::default(),
            prompts: PromptConfig::default(),
            analysis: AnalysisConfig {
                min_confidence: 0.0,
            },
            rendering: RenderingConfig {
                min_font_size: 10.0,
                max_font_size: 32.0,
                font_scale: 0.7,
                text_padding: 6.0,
                sample_offset: 2.0,
                max_text_width: None,
                hit_margin: 4.0,
                font_dir: None,
                load_system_fonts: true,
            },
            cache: CacheConfig {
                enabled: true,
                capacity: 512,
                cache_dir: None,
            },
        }
    }
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let mut config = Self::load_from_env()?;
        if let Ok(path) = env::var("SCENE_CONFIG_PATH") {
            config.apply_scene_file(&path)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let selection_mode = match env::var("SELECTION_MODE") {
            Ok(s) => s.parse().map_err(ConfigError::EnvVarError)?,
            Err(_) => defaults.translation.selection_mode,
        };

        let primary_engine = match env::var("PRIMARY_ENGINE") {
            Ok(s) => s.parse().map_err(ConfigError::EnvVarError)?,
            Err(_) => defaults.translation.primary_engine,
        };

        let fallback_engine = match env::var("FALLBACK_ENGINE") {
            Ok(s) if !s.trim().is_empty() => Some(s.parse().map_err(ConfigError::EnvVarError)?),
            _ => None,
        };

        let parallel_engines = env::var("PARALLEL_ENGINES")
            .ok()
            .map(|list| {
                list.split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.parse::<EngineType>())
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()
            .map_err(ConfigError::EnvVarError)?
            .unwrap_or_default();

        let active_scene = match env::var("ACTIVE_SCENE") {
            Ok(s) if !s.trim().is_empty() => Some(s.parse().map_err(ConfigError::EnvVarError)?),
            _ => None,
        };

        Ok(Self {
            logging: LoggingConfig { log_level },
            translation: TranslationConfig {
                selection_mode,
                target_language: env::var("TARGET_LANGUAGE")
                    .unwrap_or(defaults.translation.target_language),
                source_language: env::var("SOURCE_LANGUAGE")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty() && s != "auto"),
                primary_engine,
                fallback_engine,
                fallback_enabled: env::var("FALLBACK_ENABLED")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.translation.fallback_enabled),
                parallel_engines,
                timeout_override: env::var("ENGINE_TIMEOUT_SECONDS")
                    .ok()
                    .and_then(|s| s.parse::<f64>().ok())
                    .map(Duration::from_secs_f64),
                engine_timeouts: HashMap::new(),
            },
            scenes: SceneConfig {
                active_scene,
                bindings: Vec::new(),
            },
            prompts: PromptConfig::default(),
            analysis: AnalysisConfig {
                min_confidence: env::var("MIN_CONFIDENCE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.analysis.min_confidence),
            },
            rendering: RenderingConfig {
                min_font_size: env::var("MIN_FONT_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.rendering.min_font_size),
                max_font_size: env::var("MAX_FONT_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.rendering.max_font_size),
                text_padding: env::var("TEXT_PADDING")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.rendering.text_padding),
                max_text_width: env::var("MAX_TEXT_WIDTH")
                    .ok()
                    .and_then(|s| s.parse().ok()),
                font_dir: env::var("FONT_DIR").ok().filter(|s| !s.is_empty()),
                load_system_fonts: env::var("LOAD_SYSTEM_FONTS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.rendering.load_system_fonts),
                ..defaults.rendering
            },
            cache: CacheConfig {
                enabled: env::var("TRANSLATION_CACHE_ENABLED")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.cache.enabled),
                capacity: env::var("TRANSLATION_CACHE_CAPACITY")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.cache.capacity),
                cache_dir: env::var("CACHE_DIR").ok().filter(|s| !s.is_empty()),
            },
        })
    }

    /// Merge scene bindings, prompt templates and per-engine timeouts from a JSON file
    pub fn apply_scene_file(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::SceneFileRead {
            path: path.display().to_string(),
            source,
        })?;
        let file: SceneFile = serde_json::from_str(&data)?;

        self.scenes.bindings.extend(file.bindings);

        for (key, template) in file.engine_prompts {
            match key.parse::<EngineType>() {
                Ok(engine) => {
                    self.prompts.engine_templates.insert(engine, template);
                }
                Err(e) => warn!("Ignoring engine prompt: {}", e),
            }
        }
        for (key, template) in file.scene_prompts {
            match key.parse::<Scene>() {
                Ok(scene) => {
                    self.prompts.scene_templates.insert(scene, template);
                }
                Err(e) => warn!("Ignoring scene prompt: {}", e),
            }
        }
        for (key, millis) in file.engine_timeouts_ms {
            let engine = key.parse::<EngineType>().map_err(ConfigError::InvalidTranslationConfig)?;
            self.translation
                .engine_timeouts
                .insert(engine, Duration::from_millis(millis));
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.translation.target_language.trim().is_empty() {
            return Err(ConfigError::InvalidTranslationConfig(
                "target_language must not be empty".to_string(),
            ));
        }

        if let Some(timeout) = self.translation.timeout_override {
            if timeout.is_zero() {
                return Err(ConfigError::InvalidTranslationConfig(
                    "engine timeout must be > 0".to_string(),
                ));
            }
        }
        if let Some((engine, _)) = self
            .translation
            .engine_timeouts
            .iter()
            .find(|(_, t)| t.is_zero())
        {
            return Err(ConfigError::InvalidTranslationConfig(format!(
                "timeout for {} must be > 0",
                engine
            )));
        }

        if !(0.0..=1.0).contains(&self.analysis.min_confidence) {
            return Err(ConfigError::InvalidConfidenceThreshold(
                self.analysis.min_confidence,
            ));
        }

        let rendering = &self.rendering;
        if rendering.min_font_size <= 0.0 || rendering.min_font_size > rendering.max_font_size {
            return Err(ConfigError::InvalidRenderingConfig(format!(
                "font size range must satisfy 0 < min <= max, got {}..{}",
                rendering.min_font_size, rendering.max_font_size
            )));
        }
        if rendering.text_padding < 0.0 {
            return Err(ConfigError::InvalidRenderingConfig(format!(
                "text_padding must be >= 0, got {}",
                rendering.text_padding
            )));
        }

        if self.cache.capacity == 0 {
            return Err(ConfigError::InvalidTranslationConfig(
                "translation cache capacity must be > 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for binding in &self.scenes.bindings {
            if !seen.insert(binding.scene) {
                return Err(ConfigError::DuplicateSceneBinding(binding.scene.to_string()));
            }
        }

        Ok(())
    }

    pub fn log_level(&self) -> Level {
        self.logging.log_level
    }

    pub fn binding_for(&self, scene: Scene) -> Option<&SceneBinding> {
        self.scenes.bindings.iter().find(|b| b.scene == scene)
    }

    /// Timeout for one engine: per-engine setting, then global override, then provider default
    pub fn timeout_for(&self, engine: EngineType, provider_default: Duration) -> Duration {
        self.translation
            .engine_timeouts
            .get(&engine)
            .copied()
            .or(self.translation.timeout_override)
            .unwrap_or(provider_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rendering.min_font_size, 10.0);
        assert_eq!(config.rendering.max_font_size, 32.0);
    }

    #[test]
    fn test_validate_rejects_inverted_font_range() {
        let mut config = Config::default();
        config.rendering.min_font_size = 40.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRenderingConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_scene_binding() {
        let mut config = Config::default();
        let binding = SceneBinding::default_for(Scene::Screenshot, None);
        config.scenes.bindings = vec![binding.clone(), binding];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateSceneBinding(_))
        ));
    }

    #[test]
    fn test_scene_file_merges_bindings_and_prompts() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "bindings": [
                    {{"scene": "translate_and_insert", "primary_engine": "deepl",
                      "fallback_engine": "openai", "custom_prompt": "Rewrite in {{{{target_language}}}}"}}
                ],
                "engine_prompts": {{"openai": "Translate to {{{{target_language}}}}", "nope": "x"}},
                "scene_prompts": {{"screenshot": "UI text: {{{{text}}}}"}},
                "engine_timeouts_ms": {{"deepl": 1500}}
            }}"#
        )
        .unwrap();

        let mut config = Config::default();
        config.apply_scene_file(file.path()).unwrap();

        let binding = config.binding_for(Scene::TranslateAndInsert).unwrap();
        assert_eq!(binding.primary_engine, EngineType::DeepL);
        assert_eq!(binding.fallback_engine, Some(EngineType::OpenAi));
        assert!(binding.fallback_enabled);
        assert_eq!(
            binding.custom_prompt.as_deref(),
            Some("Rewrite in {{target_language}}")
        );
        assert_eq!(
            config.prompts.engine_templates.get(&EngineType::OpenAi).map(String::as_str),
            Some("Translate to {{target_language}}")
        );
        assert!(config.prompts.scene_templates.contains_key(&Scene::Screenshot));
        assert_eq!(
            config.timeout_for(EngineType::DeepL, Duration::from_secs(30)),
            Duration::from_millis(1500)
        );
        assert_eq!(
            config.timeout_for(EngineType::Google, Duration::from_secs(30)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_engine_timeout_takes_precedence_over_global_override() {
        let mut config = Config::default();
        config.translation.timeout_override = Some(Duration::from_secs(10));
        config
            .translation
            .engine_timeouts
            .insert(EngineType::Ollama, Duration::from_millis(50));

        assert_eq!(
            config.timeout_for(EngineType::Ollama, Duration::from_secs(30)),
            Duration::from_millis(50)
        );
        assert_eq!(
            config.timeout_for(EngineType::DeepL, Duration::from_secs(30)),
            Duration::from_secs(10)
        );
    }
}
