//! Language-model seam.
//!
//! The pipeline talks to models only through [`LanguageModel`], a synchronous
//! request/response trait. The production adapter, [`EdgequakeModel`], drives
//! the async `edgequake-llm` client on a private runtime; tests plug in mocks
//! that count calls or fail on demand.
//!
//! ## Why a tagged reply?
//!
//! Some providers answer with plain text, others with a JSON document (tool
//! output, structured mode). [`ModelReply`] keeps that distinction explicit,
//! and [`complete_text`] is the single place where a reply is turned into the
//! text the pipeline stores.

pub mod edgequake;

pub use edgequake::EdgequakeModel;

use crate::error::ModelError;
use serde_json::Value;

/// A base64-encoded image attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub base64: String,
    pub mime_type: String,
}

/// One completion request.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub images: Vec<EncodedImage>,
    /// Overrides the adapter's default when set.
    pub max_tokens: Option<usize>,
    /// Overrides the adapter's default when set.
    pub temperature: Option<f32>,
}

impl ModelRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn image(mut self, image: EncodedImage) -> Self {
        self.images.push(image);
        self
    }

    pub fn images(mut self, images: impl IntoIterator<Item = EncodedImage>) -> Self {
        self.images.extend(images);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = Some(n);
        self
    }
}

/// What a model answered.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Text(String),
    Structured(Value),
}

impl ModelReply {
    /// Text form of the reply.
    ///
    /// Structured replies are unwrapped when they are a bare string or carry a
    /// `content` / `text` string field; anything else is rendered as JSON.
    pub fn into_text(self) -> String {
        match self {
            ModelReply::Text(s) => s,
            ModelReply::Structured(Value::String(s)) => s,
            ModelReply::Structured(value) => {
                let field = ["content", "text"]
                    .iter()
                    .find_map(|k| value.get(*k).and_then(Value::as_str).map(str::to_string));
                field.unwrap_or_else(|| value.to_string())
            }
        }
    }
}

/// Synchronous completion client.
pub trait LanguageModel: Send + Sync {
    /// Identifier recorded in cache keys.
    fn model_name(&self) -> &str;

    /// Perform one request. Retries, if any, happen inside.
    fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError>;
}

/// Run a request and resolve the reply to trimmed, non-empty text.
pub fn complete_text(model: &dyn LanguageModel, request: &ModelRequest) -> Result<String, ModelError> {
    let text = model.complete(request)?.into_text();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ModelError::EmptyResponse {
            model: model.model_name().to_string(),
        });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(ModelReply);

    impl LanguageModel for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }

        fn complete(&self, _request: &ModelRequest) -> Result<ModelReply, ModelError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn structured_reply_unwraps_content_field() {
        let reply = ModelReply::Structured(json!({"content": "hello", "usage": 3}));
        assert_eq!(reply.into_text(), "hello");
        assert_eq!(ModelReply::Structured(json!("bare")).into_text(), "bare");
        assert_eq!(ModelReply::Structured(json!([1, 2])).into_text(), "[1,2]");
    }

    #[test]
    fn complete_text_trims() {
        let model = Fixed(ModelReply::Text("  notes \n".into()));
        assert_eq!(complete_text(&model, &ModelRequest::new("x")).unwrap(), "notes");
    }

    #[test]
    fn blank_reply_is_empty_response() {
        let model = Fixed(ModelReply::Text(" \n ".into()));
        let err = complete_text(&model, &ModelRequest::new("x")).unwrap_err();
        assert!(matches!(err, ModelError::EmptyResponse { .. }));
    }

    #[test]
    fn request_builder_collects_images() {
        let img = EncodedImage {
            base64: "AAAA".into(),
            mime_type: "image/png".into(),
        };
        let req = ModelRequest::new("p").system("s").image(img.clone()).max_tokens(10);
        assert_eq!(req.system.as_deref(), Some("s"));
        assert_eq!(req.images, vec![img]);
        assert_eq!(req.max_tokens, Some(10));
    }
}
