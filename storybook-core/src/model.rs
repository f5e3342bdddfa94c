//! The generative model seam.
//!
//! The pipeline only needs two capabilities: "generate text from a prompt"
//! and "generate an illustration from a prompt". [`GeminiModel`] provides
//! both over the Gemini API; [`crate::testing::MockModel`] provides scripted
//! ones for tests.

use crate::config::StoryConfig;
use crate::story::Illustration;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use gemini::{Gemini, Modality, Request};
use thiserror::Error;

/// Errors from a model call.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Gemini API error: {0}")]
    Gemini(#[from] gemini::Error),

    #[error("Model returned no text")]
    EmptyResponse,

    #[error("{0}")]
    Other(String),
}

/// One piece of an illustration response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IllustrationChunk {
    Image(Illustration),
    Text(String),
}

/// A stream of illustration response pieces.
pub type IllustrationStream = BoxStream<'static, Result<IllustrationChunk, ModelError>>;

/// Text and image generation capabilities used by the pipeline.
#[async_trait]
pub trait StoryModel: Send + Sync {
    /// Generate the story outline text.
    async fn generate_text(&self, prompt: &str) -> Result<String, ModelError>;

    /// Request an illustration (image and commentary) for a prompt.
    async fn generate_illustration(&self, prompt: &str) -> Result<IllustrationStream, ModelError>;
}

/// [`StoryModel`] backed by the Gemini API.
#[derive(Clone)]
pub struct GeminiModel {
    client: Gemini,
    text_model: Option<String>,
    image_model: Option<String>,
    temperature: Option<f32>,
    max_output_tokens: Option<usize>,
}

impl GeminiModel {
    /// Wrap a client, taking model names and sampling settings from `config`.
    pub fn new(client: Gemini, config: &StoryConfig) -> Self {
        Self {
            client,
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        }
    }

    /// Create a model from the GEMINI_API_KEY environment variable.
    pub fn from_env(config: &StoryConfig) -> Result<Self, ModelError> {
        Ok(Self::new(Gemini::from_env()?, config))
    }

    fn request(&self, prompt: &str, model: Option<&String>, modalities: Vec<Modality>) -> Request {
        let mut request = Request::prompt(prompt).with_modalities(modalities);
        if let Some(model) = model {
            request = request.with_model(model);
        }
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max) = self.max_output_tokens {
            request = request.with_max_output_tokens(max);
        }
        request
    }
}

#[async_trait]
impl StoryModel for GeminiModel {
    async fn generate_text(&self, prompt: &str) -> Result<String, ModelError> {
        let request = self.request(prompt, self.text_model.as_ref(), vec![Modality::Text]);
        let response = self.client.complete(request).await?;
        let text = response.text();
        if text.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(text)
    }

    async fn generate_illustration(&self, prompt: &str) -> Result<IllustrationStream, ModelError> {
        let request = self.request(
            prompt,
            self.image_model.as_ref(),
            vec![Modality::Image, Modality::Text],
        );
        let stream = self.client.stream(request).await?;

        let chunks = stream
            .map(|result| match result {
                Ok(response) => response
                    .parts()
                    .map(|part| match part {
                        gemini::Part::Text(text) => Ok(IllustrationChunk::Text(text.clone())),
                        gemini::Part::InlineData(inline) => Ok(IllustrationChunk::Image(
                            Illustration::new(inline.data.clone(), inline.mime_type.clone()),
                        )),
                    })
                    .collect::<Vec<_>>(),
                Err(e) => vec![Err(ModelError::from(e))],
            })
            .flat_map(futures::stream::iter)
            .boxed();

        Ok(chunks)
    }
}
