//! Per-page illustration.
//!
//! A page's illustration either succeeds or leaves an error marker on that
//! page. Failures never propagate past the page.

use crate::model::{IllustrationChunk, ModelError, StoryModel};
use crate::prompt::build_illustration_prompt;
use crate::request::Character;
use crate::story::Page;
use futures::stream::{self, Stream, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Why one page has no illustration.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("Failed to generate illustration: {0}")]
    Model(#[from] ModelError),

    #[error("Failed to generate illustration: no image returned")]
    NoImage,
}

/// Produces illustrations one page at a time.
#[derive(Clone)]
pub struct Illustrator {
    model: Arc<dyn StoryModel>,
}

impl Illustrator {
    pub fn new(model: Arc<dyn StoryModel>) -> Self {
        Self { model }
    }

    /// Illustrate a page, recording any failure on the returned page.
    pub async fn illustrate(&self, page: &Page, characters: &[Character], theme: &str) -> Page {
        let outcome = self.try_illustrate(page, characters, theme).await;
        merge_outcome(page, outcome)
    }

    /// Illustrate pages strictly one after another.
    ///
    /// Each page is yielded as soon as it is done, so the consumer can
    /// report progress between model calls.
    pub fn illustrate_all<'a>(
        &'a self,
        pages: Vec<Page>,
        characters: &'a [Character],
        theme: &'a str,
    ) -> impl Stream<Item = Page> + Send + 'a {
        stream::iter(pages).then(move |page| async move {
            self.illustrate(&page, characters, theme).await
        })
    }

    /// Illustrate a page, returning the failure instead of recording it.
    ///
    /// The first image in the response wins; text parts are concatenated
    /// into the page's image description.
    pub async fn try_illustrate(
        &self,
        page: &Page,
        characters: &[Character],
        theme: &str,
    ) -> Result<Page, PageError> {
        let prompt = build_illustration_prompt(page, characters, theme);
        debug!(page_number = page.page_number, prompt_len = prompt.len(), "requesting illustration");

        let mut stream = self.model.generate_illustration(&prompt).await?;
        let mut image = None;
        let mut commentary = String::new();

        while let Some(chunk) = stream.next().await {
            match chunk? {
                IllustrationChunk::Image(illustration) => {
                    if image.is_none() {
                        image = Some(illustration);
                    }
                }
                IllustrationChunk::Text(text) => commentary.push_str(&text),
            }
        }

        let illustration = image.ok_or(PageError::NoImage)?;
        let commentary = commentary.trim();

        Ok(Page {
            illustration: Some(illustration),
            image_description: (!commentary.is_empty()).then(|| commentary.to_string()),
            error: None,
            ..page.clone()
        })
    }
}

/// Fold one page's illustration result back into the page.
pub fn merge_outcome(page: &Page, outcome: Result<Page, PageError>) -> Page {
    match outcome {
        Ok(illustrated) => illustrated,
        Err(e) => {
            warn!(page_number = page.page_number, error = %e, "illustration failed");
            Page {
                illustration: None,
                image_description: None,
                error: Some(e.to_string()),
                ..page.clone()
            }
        }
    }
}
