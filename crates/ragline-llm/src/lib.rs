//! Language model clients.
use std::sync::Arc;

use tracing::info;

use ragline_core::config::LlmSettings;
use ragline_core::{Error, LanguageModel, Result};

pub mod echo;
pub mod openai;
pub mod wire;

pub use echo::EchoModel;
pub use openai::OpenAiClient;

pub fn get_default_model(settings: &LlmSettings) -> Result<Arc<dyn LanguageModel>> {
    let model: Arc<dyn LanguageModel> = match settings.provider.as_str() {
        "openai" => Arc::new(OpenAiClient::from_settings(settings)?),
        "echo" => Arc::new(EchoModel::new()),
        other => return Err(Error::InvalidConfig(format!("unknown llm provider '{other}'"))),
    };
    info!(provider = %settings.provider, model = %settings.model_name, "language model ready");
    Ok(model)
}
