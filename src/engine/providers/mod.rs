//! Provider construction.

pub mod dummy;
pub mod openai_compatible;

use crate::config::EngineConfig;
use crate::graph::EntityCatalog;

use super::{AnswerEngine, ProviderError};

/// Build the provider named in `config.provider`.
///
/// `api_key` comes from the `ENGINE_API_KEY` env var — never TOML. The
/// catalog is handed to the dummy provider, which resolves entities itself;
/// HTTP providers are expected to name ids directly.
pub fn build(
    config: &EngineConfig,
    catalog: EntityCatalog,
    api_key: Option<String>,
) -> Result<AnswerEngine, ProviderError> {
    match config.provider.as_str() {
        "dummy" => Ok(AnswerEngine::Dummy(dummy::DummyProvider::new(catalog))),
        "openai" => Ok(AnswerEngine::OpenAiCompatible(
            openai_compatible::OpenAiCompatibleProvider::new(
                config.openai.api_base_url.clone(),
                config.openai.model.clone(),
                config.openai.temperature,
                config.openai.timeout_seconds,
                api_key,
            )?,
        )),
        other => Err(ProviderError::UnknownProvider(other.to_string())),
    }
}
