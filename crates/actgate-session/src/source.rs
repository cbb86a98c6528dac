use std::sync::Arc;

use actgate_core::config::{ModelConfig, ModelProvider};
use model_stream::{CommandSource, OllamaSource, TokenSource};

use crate::error::Result;

/// Build the token source a `model:` config block describes.
pub fn source_from_config(cfg: &ModelConfig) -> Result<Arc<dyn TokenSource>> {
    let source: Arc<dyn TokenSource> = match cfg.provider {
        ModelProvider::Ollama => Arc::new(OllamaSource::new(&cfg.endpoint, &cfg.model)),
        ModelProvider::Command => Arc::new(CommandSource::new(cfg.command.clone())?),
    };
    Ok(source)
}
