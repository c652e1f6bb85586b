// Prompt templates for LLM-backed engines
//
// Templates are plain strings with `{{source_language}}`, `{{target_language}}`
// and `{{text}}` placeholders. Unknown placeholders are left untouched.

use crate::core::config::PromptConfig;
use crate::core::types::{EngineType, Scene};

const SOURCE_PLACEHOLDER: &str = "{{source_language}}";
const TARGET_PLACEHOLDER: &str = "{{target_language}}";
const TEXT_PLACEHOLDER: &str = "{{text}}";

/// Fill a template. `source_language` of None renders as "auto".
pub fn render_prompt(
    template: &str,
    source_language: Option<&str>,
    target_language: &str,
    texts: &[String],
) -> String {
    template
        .replace(SOURCE_PLACEHOLDER, source_language.unwrap_or("auto"))
        .replace(TARGET_PLACEHOLDER, target_language)
        .replace(TEXT_PLACEHOLDER, &texts.join("\n"))
}

/// Pick the template for one call: binding prompt, then scene template, then engine template
pub fn resolve_template<'a>(
    prompts: &'a PromptConfig,
    engine: EngineType,
    scene: Option<Scene>,
    binding_prompt: Option<&'a str>,
) -> Option<&'a str> {
    binding_prompt
        .or_else(|| scene.and_then(|s| prompts.scene_templates.get(&s).map(String::as_str)))
        .or_else(|| prompts.engine_templates.get(&engine).map(String::as_str))
}
