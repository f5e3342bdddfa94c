//! Progressive delivery of a generation run.
//!
//! A run emits status events, one page event per page in increasing page
//! order, then exactly one terminal event (`complete` or `error`). The
//! consumer may go away at any point; the run carries on and later writes
//! are dropped.

use crate::orchestrator::PipelineState;
use crate::story::{Page, StoryId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Message sent with the terminal `complete` event.
pub const COMPLETE_MESSAGE: &str = "Story generation complete!";

/// One event on the delivery stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StoryEvent {
    Status {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Page {
        page_number: u32,
        total_pages: usize,
        content: Page,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        story_id: StoryId,
        message: String,
    },
    Error {
        message: String,
    },
}

impl StoryEvent {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }

    pub fn page(page: &Page, total_pages: usize) -> Self {
        Self::Page {
            page_number: page.page_number,
            total_pages,
            content: page.clone(),
        }
    }

    pub fn complete(story_id: StoryId) -> Self {
        Self::Complete {
            story_id,
            message: COMPLETE_MESSAGE.to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    /// Newline-delimited JSON framing.
    pub fn to_ndjson(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Server-sent events framing.
    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

/// A write that would break the delivery protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("Stream already terminated")]
    AfterTerminal,

    #[error("Page {got} delivered after page {previous}")]
    PageOutOfOrder { previous: u32, got: u32 },
}

/// Destination for delivery events.
#[async_trait]
pub trait EventSink: Send {
    /// Deliver one event. Returns false once the consumer is gone.
    async fn send(&mut self, event: StoryEvent) -> bool;

    /// Observe a pipeline state transition.
    fn on_state(&mut self, _state: &PipelineState) {}
}

/// Sink feeding a tokio channel.
pub struct ChannelSink {
    tx: mpsc::Sender<StoryEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<StoryEvent>) -> Self {
        Self { tx }
    }
}

/// Create a bounded event channel.
pub fn channel(buffer: usize) -> (ChannelSink, mpsc::Receiver<StoryEvent>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (ChannelSink::new(tx), rx)
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&mut self, event: StoryEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// Protocol-enforcing wrapper around a sink for one run.
pub struct DeliveryChannel<'a> {
    sink: &'a mut dyn EventSink,
    last_page: Option<u32>,
    terminated: bool,
    open: bool,
}

impl<'a> DeliveryChannel<'a> {
    pub fn new(sink: &'a mut dyn EventSink) -> Self {
        Self {
            sink,
            last_page: None,
            terminated: false,
            open: true,
        }
    }

    /// Whether the consumer is still listening.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Whether a terminal event has been written.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Forward a state transition to the sink's observer.
    pub fn observe(&mut self, state: &PipelineState) {
        self.sink.on_state(state);
    }

    pub async fn status(&mut self, message: impl Into<String>) -> Result<(), DeliveryError> {
        self.ensure_live()?;
        self.emit(StoryEvent::status(message)).await;
        Ok(())
    }

    /// Deliver a finished page. Page numbers must strictly increase.
    pub async fn page(&mut self, page: &Page, total_pages: usize) -> Result<(), DeliveryError> {
        self.ensure_live()?;
        if let Some(previous) = self.last_page {
            if page.page_number <= previous {
                return Err(DeliveryError::PageOutOfOrder {
                    previous,
                    got: page.page_number,
                });
            }
        }
        self.last_page = Some(page.page_number);
        self.emit(StoryEvent::page(page, total_pages)).await;
        Ok(())
    }

    pub async fn complete(&mut self, story_id: StoryId) -> Result<(), DeliveryError> {
        self.ensure_live()?;
        self.terminated = true;
        self.emit(StoryEvent::complete(story_id)).await;
        Ok(())
    }

    pub async fn fail(&mut self, message: impl Into<String>) -> Result<(), DeliveryError> {
        self.ensure_live()?;
        self.terminated = true;
        self.emit(StoryEvent::error(message)).await;
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), DeliveryError> {
        if self.terminated {
            Err(DeliveryError::AfterTerminal)
        } else {
            Ok(())
        }
    }

    async fn emit(&mut self, event: StoryEvent) {
        if !self.open {
            return;
        }
        if !self.sink.send(event).await {
            debug!("delivery consumer disconnected");
            self.open = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CollectingSink;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let page = Page::new(2, "Mira floats.");
        let value = serde_json::to_value(StoryEvent::page(&page, 7)).unwrap();
        assert_eq!(value["type"], "page");
        assert_eq!(value["pageNumber"], 2);
        assert_eq!(value["totalPages"], 7);
        assert_eq!(value["content"]["text"], "Mira floats.");

        let value = serde_json::to_value(StoryEvent::status("Starting")).unwrap();
        assert_eq!(value, json!({"type": "status", "message": "Starting"}));

        let id = StoryId::new();
        let value = serde_json::to_value(StoryEvent::complete(id)).unwrap();
        assert_eq!(value["type"], "complete");
        assert_eq!(value["storyId"], id.to_string());
        assert_eq!(value["message"], COMPLETE_MESSAGE);
    }

    #[test]
    fn test_framing() {
        let event = StoryEvent::error("boom");
        assert_eq!(
            event.to_ndjson().unwrap(),
            "{\"type\":\"error\",\"message\":\"boom\"}\n"
        );
        assert_eq!(
            event.to_sse().unwrap(),
            "data: {\"type\":\"error\",\"message\":\"boom\"}\n\n"
        );
    }

    #[test]
    fn test_terminal_events() {
        assert!(StoryEvent::error("x").is_terminal());
        assert!(StoryEvent::complete(StoryId::new()).is_terminal());
        assert!(!StoryEvent::status("x").is_terminal());
    }

    #[tokio::test]
    async fn test_pages_must_increase() {
        let mut sink = CollectingSink::new();
        let mut channel = DeliveryChannel::new(&mut sink);

        channel.page(&Page::new(1, "a"), 3).await.unwrap();
        channel.page(&Page::new(3, "c"), 3).await.unwrap();
        let err = channel.page(&Page::new(2, "b"), 3).await.unwrap_err();
        assert_eq!(err, DeliveryError::PageOutOfOrder { previous: 3, got: 2 });
        drop(channel);

        assert_eq!(sink.page_numbers(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_nothing_after_terminal() {
        let mut sink = CollectingSink::new();
        let mut channel = DeliveryChannel::new(&mut sink);

        channel.status("Starting").await.unwrap();
        channel.fail("model unavailable").await.unwrap();
        assert!(channel.is_terminated());
        assert_eq!(channel.status("late").await, Err(DeliveryError::AfterTerminal));
        assert_eq!(channel.complete(StoryId::new()).await, Err(DeliveryError::AfterTerminal));
        drop(channel);

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.terminal_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnected_consumer_is_not_an_error() {
        let (mut sink, rx) = channel(4);
        drop(rx);
        let mut delivery = DeliveryChannel::new(&mut sink);

        delivery.status("Starting").await.unwrap();
        assert!(!delivery.is_open());
        delivery.page(&Page::new(1, "a"), 1).await.unwrap();
        delivery.complete(StoryId::new()).await.unwrap();
        assert!(delivery.is_terminated());
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_events() {
        let (mut sink, mut rx) = channel(4);
        assert!(sink.send(StoryEvent::status("hello")).await);
        assert_eq!(rx.recv().await, Some(StoryEvent::status("hello")));
    }
}
