pub mod cache;
pub mod prompt;
pub mod provider;
pub mod selector;

pub use cache::{CacheKey, TranslationCache};
pub use prompt::{render_prompt, resolve_template};
pub use provider::{ProviderRegistry, RegisteredProvider, TranslationProvider};
pub use selector::{EngineSelector, TranslationRequest};
