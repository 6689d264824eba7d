//! [`LanguageModel`] adapter over the `edgequake-llm` multi-provider client.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent. Exponential
//! backoff (`retry_backoff_ms * 2^attempt`) avoids hammering the provider:
//! with 500 ms base and 3 retries the wait sequence is 500 ms → 1 s → 2 s.
//!
//! ## Runtime
//!
//! The client is async; the notes pipeline is not. Each adapter holds a shared
//! current-thread Tokio runtime and blocks on every call, so the adapter must
//! not be used from inside another Tokio runtime.

use super::{EncodedImage, LanguageModel, ModelReply, ModelRequest};
use crate::config::NotesConfig;
use crate::error::{ModelError, NotesError};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tracing::{debug, warn};

/// A resolved provider plus the sampling defaults applied to every request.
pub struct EdgequakeModel {
    provider: Arc<dyn LLMProvider>,
    model: String,
    runtime: Arc<Runtime>,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl std::fmt::Debug for EdgequakeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgequakeModel")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl EdgequakeModel {
    /// Runtime shared by the text and vision adapters of one run.
    pub fn runtime() -> Result<Arc<Runtime>, NotesError> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map(Arc::new)
            .map_err(|e| NotesError::Internal(format!("Failed to start async runtime: {e}")))
    }

    /// Wrap an already-built provider.
    pub fn from_provider(
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
        config: &NotesConfig,
        runtime: Arc<Runtime>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            runtime,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }

    /// Resolve a provider for `model`, from most-specific to least-specific.
    ///
    /// 1. **Named provider** (`provider_name`): e.g. `"openai"`, `"ollama"`;
    ///    the factory reads the matching API key from the environment.
    /// 2. **Environment** (`EDGEQUAKE_LLM_PROVIDER`): the provider chosen at
    ///    the execution environment level (Makefile, shell script, CI).
    /// 3. **OpenAI key** (`OPENAI_API_KEY`): preferred when several keys
    ///    are present.
    /// 4. **Full auto-detection** (`ProviderFactory::from_env`).
    pub fn resolve(
        provider_name: Option<&str>,
        model: &str,
        config: &NotesConfig,
        runtime: Arc<Runtime>,
    ) -> Result<Self, NotesError> {
        let provider = resolve_provider(provider_name, model)?;
        Ok(Self::from_provider(provider, model, config, runtime))
    }

    /// Text model of `config`.
    pub fn text_from_config(config: &NotesConfig, runtime: Arc<Runtime>) -> Result<Self, NotesError> {
        Self::resolve(config.provider_name.as_deref(), &config.text_model, config, runtime)
    }

    /// Vision model of `config`.
    pub fn vision_from_config(config: &NotesConfig, runtime: Arc<Runtime>) -> Result<Self, NotesError> {
        let provider = config
            .vision_provider_name
            .as_deref()
            .or(config.provider_name.as_deref());
        Self::resolve(provider, &config.vision_model, config, runtime)
    }

    fn build_messages(request: &ModelRequest) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage::system(system.as_str()));
        }
        if request.images.is_empty() {
            messages.push(ChatMessage::user(request.prompt.as_str()));
        } else {
            let images = request.images.iter().map(to_image_data).collect();
            messages.push(ChatMessage::user_with_images(request.prompt.as_str(), images));
        }
        messages
    }

    fn build_options(&self, request: &ModelRequest) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(request.temperature.unwrap_or(self.temperature)),
            max_tokens: Some(request.max_tokens.unwrap_or(self.max_tokens)),
            ..Default::default()
        }
    }
}

impl LanguageModel for EdgequakeModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        let messages = Self::build_messages(request);
        let options = self.build_options(request);
        let start = Instant::now();

        self.runtime.block_on(async {
            let mut last_err: Option<String> = None;

            for attempt in 0..=self.max_retries {
                if attempt > 0 {
                    let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                    warn!(
                        "{}: retry {}/{} after {}ms",
                        self.model, attempt, self.max_retries, backoff
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }

                match self.provider.chat(&messages, Some(&options)).await {
                    Ok(response) => {
                        debug!(
                            "{}: {} input tokens, {} output tokens, {:?}",
                            self.model,
                            response.prompt_tokens,
                            response.completion_tokens,
                            start.elapsed()
                        );
                        return Ok(ModelReply::Text(response.content));
                    }
                    Err(e) => {
                        let err_msg = format!("{e}");
                        warn!("{}: attempt {} failed: {}", self.model, attempt + 1, err_msg);
                        last_err = Some(err_msg);
                    }
                }
            }

            Err(ModelError::Transport {
                model: self.model.clone(),
                retries: self.max_retries,
                detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
            })
        })
    }
}

fn to_image_data(image: &EncodedImage) -> ImageData {
    ImageData::new(image.base64.clone(), image.mime_type.clone()).with_detail("high")
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, NotesError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        NotesError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn resolve_provider(provider_name: Option<&str>, model: &str) -> Result<Arc<dyn LLMProvider>, NotesError> {
    if let Some(name) = provider_name {
        return create_provider(name, model);
    }

    if let Ok(prov) = std::env::var("EDGEQUAKE_LLM_PROVIDER") {
        if !prov.is_empty() {
            return create_provider(&prov, model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| NotesError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {e}"
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_without_images_are_plain_text() {
        let req = ModelRequest::new("summarise").system("be brief");
        let messages = EdgequakeModel::build_messages(&req);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn messages_with_images_attach_them() {
        let req = ModelRequest::new("describe").image(EncodedImage {
            base64: "AAAA".into(),
            mime_type: "image/png".into(),
        });
        let messages = EdgequakeModel::build_messages(&req);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn image_data_uses_high_detail() {
        let data = to_image_data(&EncodedImage {
            base64: "AAAA".into(),
            mime_type: "image/jpeg".into(),
        });
        assert_eq!(data.mime_type, "image/jpeg");
        assert_eq!(data.data, "AAAA");
    }
}
