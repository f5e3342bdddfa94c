//! Testing utilities for the story pipeline.
//!
//! This module provides tools for integration testing:
//! - `MockModel` for deterministic testing without API calls
//! - `CollectingSink` for capturing delivery events and state transitions
//! - `TestHarness` for scripted generation runs
//! - Assertion helpers for verifying the delivery protocol and stored stories

use crate::config::StoryConfig;
use crate::delivery::{EventSink, StoryEvent};
use crate::model::{IllustrationChunk, IllustrationStream, ModelError, StoryModel};
use crate::orchestrator::{PipelineState, StoryError, StoryOrchestrator};
use crate::request::StoryRequest;
use crate::store::StoryStore;
use crate::story::{Illustration, Story, StoryId};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use image::{ImageFormat, Rgb, RgbImage};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

/// A scripted answer to one illustration request.
#[derive(Debug, Clone)]
pub enum MockImage {
    /// A small valid PNG.
    Png,
    /// A PNG preceded by commentary text.
    WithCommentary(String),
    /// Commentary only, no image.
    TextOnly(String),
    /// The call itself fails.
    Fail,
    /// The call starts, then the stream errors before any image.
    BrokenStream,
}

/// A mock model that returns scripted responses.
///
/// Use this for deterministic integration tests without API calls.
pub struct MockModel {
    /// Outline text, or the error message to fail with.
    outline: Result<String, String>,
    /// Scripted illustration answers; `Png` once exhausted.
    images: Mutex<VecDeque<MockImage>>,
    /// Prompts received, in order.
    text_prompts: Mutex<Vec<String>>,
    illustration_prompts: Mutex<Vec<String>>,
}

impl MockModel {
    /// Create a mock that answers outline requests with `outline` and
    /// illustrates every page successfully.
    pub fn new(outline: impl Into<String>) -> Self {
        Self {
            outline: Ok(outline.into()),
            images: Mutex::new(VecDeque::new()),
            text_prompts: Mutex::new(Vec::new()),
            illustration_prompts: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock whose outline request fails.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            outline: Err(message.into()),
            ..Self::new("")
        }
    }

    /// Script the illustration answers, in call order.
    pub fn with_images(self, images: Vec<MockImage>) -> Self {
        *lock(&self.images) = images.into();
        self
    }

    /// Queue another illustration answer.
    pub fn queue_image(&self, image: MockImage) {
        lock(&self.images).push_back(image);
    }

    /// Outline prompts received so far.
    pub fn text_prompts(&self) -> Vec<String> {
        lock(&self.text_prompts).clone()
    }

    /// Illustration prompts received so far.
    pub fn illustration_prompts(&self) -> Vec<String> {
        lock(&self.illustration_prompts).clone()
    }

    /// Total model calls made.
    pub fn call_count(&self) -> usize {
        lock(&self.text_prompts).len() + lock(&self.illustration_prompts).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl StoryModel for MockModel {
    async fn generate_text(&self, prompt: &str) -> Result<String, ModelError> {
        lock(&self.text_prompts).push(prompt.to_string());
        self.outline.clone().map_err(ModelError::Other)
    }

    async fn generate_illustration(&self, prompt: &str) -> Result<IllustrationStream, ModelError> {
        lock(&self.illustration_prompts).push(prompt.to_string());
        let next = lock(&self.images).pop_front().unwrap_or(MockImage::Png);
        let png = || IllustrationChunk::Image(Illustration::new(tiny_png(), None));

        let chunks: Vec<Result<IllustrationChunk, ModelError>> = match next {
            MockImage::Png => vec![Ok(png())],
            MockImage::WithCommentary(text) => vec![Ok(IllustrationChunk::Text(text)), Ok(png())],
            MockImage::TextOnly(text) => vec![Ok(IllustrationChunk::Text(text))],
            MockImage::Fail => return Err(ModelError::Other("image model unavailable".into())),
            MockImage::BrokenStream => vec![
                Ok(IllustrationChunk::Text("Drawing".into())),
                Err(ModelError::Other("stream interrupted".into())),
            ],
        };
        Ok(stream::iter(chunks).boxed())
    }
}

/// An event sink that records everything it receives.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Vec<StoryEvent>,
    states: Vec<PipelineState>,
    /// Stop accepting after this many events, simulating a client that leaves.
    accept_limit: Option<usize>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that disconnects after `limit` events.
    pub fn disconnecting_after(limit: usize) -> Self {
        Self {
            accept_limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn events(&self) -> &[StoryEvent] {
        &self.events
    }

    pub fn states(&self) -> &[PipelineState] {
        &self.states
    }

    /// Page numbers of delivered page events, in delivery order.
    pub fn page_numbers(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|e| match e {
                StoryEvent::Page { page_number, .. } => Some(*page_number),
                _ => None,
            })
            .collect()
    }

    pub fn status_messages(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                StoryEvent::Status { message } => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn terminal_count(&self) -> usize {
        self.events.iter().filter(|e| e.is_terminal()).count()
    }

    /// The story id from the `complete` event, if any.
    pub fn completed_id(&self) -> Option<StoryId> {
        self.events.iter().find_map(|e| match e {
            StoryEvent::Complete { story_id, .. } => Some(*story_id),
            _ => None,
        })
    }

    /// The message of the `error` event, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.events.iter().find_map(|e| match e {
            StoryEvent::Error { message } => Some(message.as_str()),
            _ => None,
        })
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn send(&mut self, event: StoryEvent) -> bool {
        if self.accept_limit.is_some_and(|limit| self.events.len() >= limit) {
            return false;
        }
        self.events.push(event);
        true
    }

    fn on_state(&mut self, state: &PipelineState) {
        self.states.push(*state);
    }
}

/// Test harness for running generation scenarios.
pub struct TestHarness {
    /// The mock model.
    pub model: Arc<MockModel>,
    /// The shared store.
    pub store: Arc<StoryStore>,
    /// The orchestrator under test.
    pub orchestrator: StoryOrchestrator,
}

impl TestHarness {
    /// Harness whose model returns a well-formed outline of `pages` pages.
    pub fn new(pages: usize) -> Self {
        Self::with_model(MockModel::new(well_formed_outline(pages)), pages)
    }

    /// Harness around a custom mock.
    pub fn with_model(model: MockModel, target_pages: usize) -> Self {
        let model = Arc::new(model);
        let store = Arc::new(StoryStore::new());
        let config = StoryConfig::new().with_target_pages(target_pages);
        let orchestrator = StoryOrchestrator::new(model.clone(), store.clone(), config);

        Self {
            model,
            store,
            orchestrator,
        }
    }

    /// Run a generation, collecting everything delivered.
    pub async fn generate(
        &self,
        request: StoryRequest,
    ) -> (Result<StoryId, StoryError>, CollectingSink) {
        let mut sink = CollectingSink::new();
        let result = self.orchestrator.generate(request, &mut sink).await;
        (result, sink)
    }

    /// Run the sample request and return the published story.
    pub async fn publish_sample(&self) -> Story {
        let (result, _) = self.generate(sample_request()).await;
        let id = result.unwrap_or_else(|e| panic!("sample generation failed: {e}"));
        self.orchestrator
            .get_story(id)
            .await
            .unwrap_or_else(|e| panic!("published story missing: {e}"))
    }
}

/// The space / Mira / 6-8 request.
pub fn sample_request() -> StoryRequest {
    StoryRequest::new("space", "6-8").with_character("Mira", "curious astronaut")
}

/// An outline in the expected `[PAGE n]` format.
pub fn well_formed_outline(pages: usize) -> String {
    let mut out = String::new();
    for n in 1..=pages {
        if n == 1 {
            out.push_str("[PAGE 1 - TITLE]\nTitle: Mira and the Moon\n");
            out.push_str("Text: A story about a curious astronaut.\n");
            out.push_str("Illustration: Mira waving from her rocket\n\n");
        } else {
            out.push_str(&format!(
                "[PAGE {n}]\nText: Mira explores part {n} of the sky.\nIllustration: Mira among the stars, scene {n}\n\n"
            ));
        }
    }
    out
}

/// A 4x4 PNG.
pub fn tiny_png() -> Vec<u8> {
    let img = RgbImage::from_pixel(4, 4, Rgb([90, 140, 220]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .unwrap_or_else(|e| panic!("encoding test png: {e}"));
    buf.into_inner()
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the delivery protocol held: statuses first, page numbers strictly
/// increasing, exactly one terminal event and it is last.
#[track_caller]
pub fn assert_protocol(sink: &CollectingSink) {
    let events = sink.events();
    assert_eq!(sink.terminal_count(), 1, "Expected exactly one terminal event");
    assert!(
        events.last().is_some_and(StoryEvent::is_terminal),
        "Expected the terminal event to be last"
    );
    let pages = sink.page_numbers();
    assert!(
        pages.windows(2).all(|w| w[0] < w[1]),
        "Expected strictly increasing page numbers, got {pages:?}"
    );
}

/// Assert a story's pages are numbered exactly `expected`.
#[track_caller]
pub fn assert_page_numbers(story: &Story, expected: &[u32]) {
    let actual: Vec<u32> = story.pages.iter().map(|p| p.page_number).collect();
    assert_eq!(actual, expected, "Unexpected page numbers");
}

/// Assert every page other than `changed` is identical between two snapshots.
#[track_caller]
pub fn assert_only_page_changed(before: &Story, after: &Story, changed: u32) {
    assert_eq!(before.id, after.id, "Story id changed");
    assert_eq!(before.pages.len(), after.pages.len(), "Page count changed");
    for (a, b) in before.pages.iter().zip(&after.pages) {
        if a.page_number != changed {
            assert_eq!(a, b, "Page {} changed unexpectedly", a.page_number);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_model_scripts() {
        let model = MockModel::new("outline").with_images(vec![MockImage::Fail]);
        assert_eq!(model.generate_text("p").await.unwrap(), "outline");
        assert!(model.generate_illustration("a").await.is_err());

        let chunks: Vec<_> = model.generate_illustration("b").await.unwrap().collect().await;
        assert!(matches!(chunks[0], Ok(IllustrationChunk::Image(_))));
        assert_eq!(model.call_count(), 3);
        assert_eq!(model.illustration_prompts(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failing_outline() {
        let model = MockModel::failing("quota exceeded");
        let err = model.generate_text("p").await.unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded");
    }

    #[tokio::test]
    async fn test_collecting_sink_disconnects() {
        let mut sink = CollectingSink::disconnecting_after(1);
        assert!(sink.send(StoryEvent::status("a")).await);
        assert!(!sink.send(StoryEvent::status("b")).await);
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_tiny_png_decodes() {
        let img = image::load_from_memory(&tiny_png()).unwrap();
        assert_eq!((img.width(), img.height()), (4, 4));
    }

    #[test]
    fn test_well_formed_outline_parses() {
        let pages = crate::parser::parse_pages(&well_formed_outline(5), 5);
        assert_eq!(pages.len(), 5);
        assert_eq!(pages[0].title.as_deref(), Some("Mira and the Moon"));
    }
}
