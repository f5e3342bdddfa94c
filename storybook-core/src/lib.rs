//! Illustrated children's story generation.
//!
//! This crate provides:
//! - Prompt construction and tolerant parsing of generated outlines
//! - A per-page illustration loop that isolates failures to their page
//! - Progressive delivery of pages under a small event protocol
//! - An in-memory store supporting page regeneration
//! - PDF export
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use storybook_core::{
//!     delivery, GeminiModel, StoryConfig, StoryOrchestrator, StoryRequest, StoryStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StoryConfig::from_env();
//!     let model = Arc::new(GeminiModel::from_env(&config)?);
//!     let orchestrator = StoryOrchestrator::new(model, Arc::new(StoryStore::new()), config);
//!
//!     let request = StoryRequest::new("space", "6-8")
//!         .with_character("Mira", "a curious astronaut");
//!
//!     let (mut sink, mut events) = delivery::channel(16);
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             print!("{}", event.to_ndjson().unwrap());
//!         }
//!     });
//!
//!     let id = orchestrator.generate(request, &mut sink).await?;
//!     std::fs::write("story.pdf", orchestrator.export_pdf(id).await?)?;
//!     Ok(())
//! }
//! ```

pub mod age;
pub mod config;
pub mod delivery;
pub mod export;
pub mod illustrate;
pub mod model;
pub mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod request;
pub mod store;
pub mod story;
pub mod testing;
pub mod themes;

// Primary public API
pub use age::{AgeGroup, AgeProfile};
pub use config::StoryConfig;
pub use delivery::{ChannelSink, DeliveryChannel, DeliveryError, EventSink, StoryEvent};
pub use export::{layout_story, DocumentInfo, DocumentPage, DocumentRenderer, ExportError, PdfRenderer};
pub use illustrate::{Illustrator, PageError};
pub use model::{GeminiModel, IllustrationChunk, ModelError, StoryModel};
pub use orchestrator::{parse_story_id, PipelineState, StoryError, StoryOrchestrator};
pub use parser::{parse_outline, parse_pages, ParseMode, ParsedOutline};
pub use request::{Character, StoryRequest, ValidationError};
pub use store::{StoreError, StoryStore};
pub use story::{Illustration, Page, Story, StoryId, StoryMetadata};
pub use testing::{CollectingSink, MockImage, MockModel, TestHarness};
pub use themes::{find_theme, themes, Theme};
