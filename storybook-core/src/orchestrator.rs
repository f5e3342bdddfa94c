//! The generation pipeline.
//!
//! A run moves through a fixed sequence of states:
//!
//! ```text
//! Idle -> OutlineRequested -> Parsing -> IllustratingPages(0/N) -> ... -> IllustratingPages(N/N) -> Published
//! ```
//!
//! Any non-terminal state may move to `Failed`. Only validation and outline
//! generation can fail a run; a page whose illustration fails is still a
//! finished page.

use crate::config::StoryConfig;
use crate::delivery::{DeliveryChannel, DeliveryError, EventSink};
use crate::export::{DocumentRenderer, ExportError, PdfRenderer};
use crate::illustrate::Illustrator;
use crate::model::{ModelError, StoryModel};
use crate::parser::{normalize_pages, parse_outline};
use crate::prompt::build_outline_prompt;
use crate::request::{StoryRequest, ValidationError};
use crate::store::{StoreError, StoryStore};
use crate::story::{Page, Story, StoryId, StoryMetadata};
use chrono::Utc;
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

pub const STATUS_STARTING: &str = "Starting story generation...";
pub const STATUS_OUTLINE: &str = "Creating story outline...";

/// Where a generation run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    OutlineRequested,
    Parsing,
    IllustratingPages { done: usize, total: usize },
    Published,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Published | PipelineState::Failed)
    }

    /// Whether `next` may follow this state.
    pub fn can_transition_to(&self, next: &PipelineState) -> bool {
        use PipelineState::*;

        match (self, next) {
            (Published | Failed, _) => false,
            (_, Failed) => true,
            (Idle, OutlineRequested) => true,
            (OutlineRequested, Parsing) => true,
            (Parsing, IllustratingPages { done: 0, .. }) => true,
            (
                IllustratingPages { done, total },
                IllustratingPages {
                    done: next_done,
                    total: next_total,
                },
            ) => total == next_total && done < total && *next_done == done + 1,
            (IllustratingPages { done, total }, Published) => done == total,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::OutlineRequested => write!(f, "outline requested"),
            PipelineState::Parsing => write!(f, "parsing"),
            PipelineState::IllustratingPages { done, total } => {
                write!(f, "illustrating pages ({done}/{total})")
            }
            PipelineState::Published => write!(f, "published"),
            PipelineState::Failed => write!(f, "failed"),
        }
    }
}

/// Errors from the story operations.
#[derive(Debug, Error)]
pub enum StoryError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to generate story: {0}")]
    Generation(ModelError),

    #[error("Story not found")]
    StoryNotFound(StoryId),

    #[error("Page not found")]
    PageNotFound { story_id: StoryId, page_number: u32 },

    #[error("Invalid story id: {0}")]
    InvalidStoryId(String),

    #[error("Failed to export story: {0}")]
    Export(#[from] ExportError),

    #[error("Export task failed: {0}")]
    ExportTask(#[from] tokio::task::JoinError),

    #[error("Invalid pipeline transition from {from} to {to}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },

    #[error("Delivery protocol violation: {0}")]
    Delivery(#[from] DeliveryError),
}

impl StoryError {
    /// Whether this error means the addressed story or page does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoryError::StoryNotFound(_)
                | StoryError::PageNotFound { .. }
                | StoryError::InvalidStoryId(_)
        )
    }
}

impl From<StoreError> for StoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::StoryNotFound(id) => StoryError::StoryNotFound(id),
            StoreError::PageNotFound {
                story_id,
                page_number,
            } => StoryError::PageNotFound {
                story_id,
                page_number,
            },
        }
    }
}

/// Parse a caller-supplied story id.
pub fn parse_story_id(raw: &str) -> Result<StoryId, StoryError> {
    raw.parse()
        .map_err(|_| StoryError::InvalidStoryId(raw.to_string()))
}

/// One run's state plus its delivery channel.
struct Run<'a> {
    state: PipelineState,
    delivery: DeliveryChannel<'a>,
}

impl<'a> Run<'a> {
    fn new(sink: &'a mut dyn EventSink) -> Self {
        let mut delivery = DeliveryChannel::new(sink);
        delivery.observe(&PipelineState::Idle);
        Self {
            state: PipelineState::Idle,
            delivery,
        }
    }

    fn advance(&mut self, next: PipelineState) -> Result<(), StoryError> {
        if !self.state.can_transition_to(&next) {
            return Err(StoryError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(from = %self.state, to = %next, "pipeline transition");
        self.state = next;
        self.delivery.observe(&next);
        Ok(())
    }

    /// Move to `Failed`, emit the terminal error event, and hand the error back.
    async fn fail(&mut self, err: StoryError) -> StoryError {
        if let Err(e) = self.advance(PipelineState::Failed) {
            return e;
        }
        if let Err(e) = self.delivery.fail(err.to_string()).await {
            return e.into();
        }
        err
    }
}

/// Runs generation, regeneration, and export against a shared store.
#[derive(Clone)]
pub struct StoryOrchestrator {
    model: Arc<dyn StoryModel>,
    illustrator: Illustrator,
    store: Arc<StoryStore>,
    renderer: Arc<dyn DocumentRenderer>,
    config: StoryConfig,
}

impl StoryOrchestrator {
    pub fn new(model: Arc<dyn StoryModel>, store: Arc<StoryStore>, config: StoryConfig) -> Self {
        Self {
            illustrator: Illustrator::new(model.clone()),
            model,
            store,
            renderer: Arc::new(PdfRenderer::new()),
            config,
        }
    }

    /// Replace the document renderer used by [`export_pdf`](Self::export_pdf).
    pub fn with_renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Media type of exported documents.
    pub fn document_media_type(&self) -> &'static str {
        self.renderer.media_type()
    }

    pub fn store(&self) -> &Arc<StoryStore> {
        &self.store
    }

    pub fn config(&self) -> &StoryConfig {
        &self.config
    }

    /// Generate, illustrate, and publish a story, reporting progress to `sink`.
    ///
    /// Pages are delivered as they are illustrated. The story is in the
    /// store before the `complete` event is sent.
    pub async fn generate(
        &self,
        request: StoryRequest,
        sink: &mut dyn EventSink,
    ) -> Result<StoryId, StoryError> {
        let mut run = Run::new(sink);

        if let Err(e) = request.validate() {
            info!(error = %e, "rejected story request");
            return Err(run.fail(e.into()).await);
        }

        run.advance(PipelineState::OutlineRequested)?;
        info!(theme = %request.theme, age_group = %request.age_group, "starting story generation");
        run.delivery.status(STATUS_STARTING).await?;

        let target_pages = self.config.target_pages;
        let prompt = build_outline_prompt(&request, request.age(), target_pages);
        debug!(prompt_len = prompt.len(), target_pages, "requesting outline");
        run.delivery.status(STATUS_OUTLINE).await?;

        let outline = match self.model.generate_text(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "outline generation failed");
                return Err(run.fail(StoryError::Generation(e)).await);
            }
        };

        run.advance(PipelineState::Parsing)?;
        let parsed = parse_outline(&outline, target_pages);
        debug!(mode = ?parsed.mode, pages = parsed.pages.len(), "parsed outline");
        let pages = normalize_pages(parsed.pages);
        let total = pages.len();

        run.advance(PipelineState::IllustratingPages { done: 0, total })?;

        let mut finished: Vec<Page> = Vec::with_capacity(total);
        {
            let illustrated =
                self.illustrator
                    .illustrate_all(pages, &request.characters, &request.theme);
            let mut illustrated = std::pin::pin!(illustrated);

            while let Some(page) = illustrated.next().await {
                run.delivery.page(&page, total).await?;
                finished.push(page);
                run.advance(PipelineState::IllustratingPages {
                    done: finished.len(),
                    total,
                })?;
            }
        }

        let story = Story {
            id: StoryId::new(),
            pages: finished,
            metadata: StoryMetadata {
                theme: request.theme.trim().to_string(),
                characters: request.characters.clone(),
                moral: request.moral().map(str::to_string),
                age_group: request.age_group.trim().to_string(),
                created_at: Utc::now(),
            },
        };
        let failed = story.failed_illustrations();
        let id = self.store.insert(story).await;

        run.advance(PipelineState::Published)?;
        info!(story_id = %id, pages = total, failed_illustrations = failed, "story published");
        run.delivery.complete(id).await?;

        Ok(id)
    }

    /// Re-illustrate one page of a published story in place.
    ///
    /// Only the addressed page changes. Concurrent regenerations of the same
    /// story are applied one at a time.
    pub async fn regenerate_page(&self, id: StoryId, page_number: u32) -> Result<Page, StoryError> {
        let _lock = self.store.lock_story(id).await?;

        let story = self.store.get(id).await.ok_or(StoryError::StoryNotFound(id))?;
        let page = story.page(page_number).ok_or(StoryError::PageNotFound {
            story_id: id,
            page_number,
        })?;

        info!(story_id = %id, page_number, "regenerating page");
        let regenerated = self
            .illustrator
            .illustrate(page, &story.metadata.characters, &story.metadata.theme)
            .await;

        self.store.replace_page(id, regenerated.clone()).await?;
        Ok(regenerated)
    }

    /// Snapshot of a published story.
    pub async fn get_story(&self, id: StoryId) -> Result<Story, StoryError> {
        self.store.get(id).await.ok_or(StoryError::StoryNotFound(id))
    }

    /// Render a published story to PDF.
    ///
    /// Image decoding and encoding are CPU bound, so rendering runs on the
    /// blocking pool against a snapshot of the story.
    pub async fn export_pdf(&self, id: StoryId) -> Result<Vec<u8>, StoryError> {
        let story = self.get_story(id).await?;
        let renderer = self.renderer.clone();
        let bytes = tokio::task::spawn_blocking(move || renderer.render(&story)).await??;
        debug!(story_id = %id, bytes = bytes.len(), "rendered document");
        Ok(bytes)
    }
}
