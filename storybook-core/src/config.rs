//! Pipeline configuration.

use crate::parser::DEFAULT_TARGET_PAGES;

/// Upper bound on the requested page count.
pub const MAX_TARGET_PAGES: usize = 32;

/// Configuration for story generation.
#[derive(Debug, Clone)]
pub struct StoryConfig {
    /// Pages requested from the model (and produced by the fallback parser).
    pub target_pages: usize,

    /// Model for outline text (defaults to the client's model).
    pub text_model: Option<String>,

    /// Model for illustrations (defaults to the client's model).
    pub image_model: Option<String>,

    /// Temperature for generation.
    pub temperature: Option<f32>,

    /// Maximum output tokens per call.
    pub max_output_tokens: Option<usize>,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            target_pages: DEFAULT_TARGET_PAGES,
            text_model: None,
            image_model: None,
            temperature: None,
            max_output_tokens: None,
        }
    }
}

impl StoryConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the environment.
    ///
    /// `STORYBOOK_TARGET_PAGES`, `STORYBOOK_TEXT_MODEL`, `STORYBOOK_IMAGE_MODEL`
    /// and `STORYBOOK_TEMPERATURE`; unset or unparsable values keep defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(pages) = env_var("STORYBOOK_TARGET_PAGES").and_then(|v| v.parse().ok()) {
            config = config.with_target_pages(pages);
        }
        if let Some(model) = env_var("STORYBOOK_TEXT_MODEL") {
            config = config.with_text_model(model);
        }
        if let Some(model) = env_var("STORYBOOK_IMAGE_MODEL") {
            config = config.with_image_model(model);
        }
        if let Some(temp) = env_var("STORYBOOK_TEMPERATURE").and_then(|v| v.parse().ok()) {
            config = config.with_temperature(temp);
        }

        config
    }

    /// Set the target page count, clamped to `1..=MAX_TARGET_PAGES`.
    pub fn with_target_pages(mut self, pages: usize) -> Self {
        self.target_pages = pages.clamp(1, MAX_TARGET_PAGES);
        self
    }

    /// Set the outline text model.
    pub fn with_text_model(mut self, model: impl Into<String>) -> Self {
        self.text_model = Some(model.into());
        self
    }

    /// Set the illustration model.
    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = Some(model.into());
        self
    }

    /// Set temperature for generation.
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    /// Set max output tokens per call.
    pub fn with_max_output_tokens(mut self, tokens: usize) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
