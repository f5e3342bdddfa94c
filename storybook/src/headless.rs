//! Headless mode for the story generator.
//!
//! Reads one story request as JSON (from stdin or `--input`), runs the
//! pipeline, and writes the delivery events to stdout as NDJSON. It's
//! designed for scripts and automated testing against the real model.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use storybook_core::{
    EventSink, GeminiModel, ModelError, StoryConfig, StoryError, StoryEvent, StoryOrchestrator,
    StoryRequest, StoryStore,
};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Options for a headless run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadlessOptions {
    /// Read the request from this file instead of stdin.
    pub input: Option<PathBuf>,
    /// Override the configured page count.
    pub pages: Option<usize>,
    /// Write the finished story as PDF here.
    pub pdf: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum HeadlessError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Model(#[from] ModelError),

    #[error("{0}")]
    Story(#[from] StoryError),
}

/// Parse headless options from command line arguments.
pub fn parse_options_from_args(args: &[String]) -> HeadlessOptions {
    let mut options = HeadlessOptions::default();
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "--input" | "-i" => {
                if let Some(path) = args.get(i + 1) {
                    options.input = Some(PathBuf::from(path));
                    i += 1;
                }
            }
            "--pages" | "-p" => {
                if let Some(pages) = args.get(i + 1).and_then(|p| p.parse().ok()) {
                    options.pages = Some(pages);
                    i += 1;
                }
            }
            "--pdf" => {
                if let Some(path) = args.get(i + 1) {
                    options.pdf = Some(PathBuf::from(path));
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    options
}

/// Sink writing one JSON event per line.
pub struct NdjsonSink<W> {
    writer: W,
}

impl<W> NdjsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> EventSink for NdjsonSink<W> {
    async fn send(&mut self, event: StoryEvent) -> bool {
        let line = match event.to_ndjson() {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "could not serialize event");
                return true;
            }
        };
        self.writer.write_all(line.as_bytes()).await.is_ok() && self.writer.flush().await.is_ok()
    }
}

/// Run one generation in headless mode.
pub async fn run_headless(options: HeadlessOptions) -> Result<(), HeadlessError> {
    let raw = match &options.input {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => {
            let mut raw = String::new();
            tokio::io::stdin().read_to_string(&mut raw).await?;
            raw
        }
    };
    let request: StoryRequest = serde_json::from_str(&raw)?;

    let mut config = StoryConfig::from_env();
    if let Some(pages) = options.pages {
        config = config.with_target_pages(pages);
    }
    let model = Arc::new(GeminiModel::from_env(&config)?);
    let orchestrator = StoryOrchestrator::new(model, Arc::new(StoryStore::new()), config);

    let mut sink = NdjsonSink::new(tokio::io::stdout());
    let id = orchestrator.generate(request, &mut sink).await?;

    if let Some(path) = &options.pdf {
        let pdf = orchestrator.export_pdf(id).await?;
        tokio::fs::write(path, pdf).await?;
        tracing::info!(story_id = %id, path = %path.display(), "wrote pdf");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use storybook_core::testing::{sample_request, TestHarness};

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_options() {
        let options = parse_options_from_args(&args(&[
            "storybook",
            "--headless",
            "--input",
            "req.json",
            "--pages",
            "5",
            "--pdf",
            "out.pdf",
        ]));
        assert_eq!(options.input, Some(PathBuf::from("req.json")));
        assert_eq!(options.pages, Some(5));
        assert_eq!(options.pdf, Some(PathBuf::from("out.pdf")));
    }

    #[test]
    fn test_parse_options_ignores_bad_values() {
        let options = parse_options_from_args(&args(&["storybook", "--headless", "--pages", "many"]));
        assert_eq!(options, HeadlessOptions::default());
    }

    #[tokio::test]
    async fn test_ndjson_sink_writes_lines() {
        let harness = TestHarness::new(2);
        let mut sink = NdjsonSink::new(Vec::new());
        harness
            .orchestrator
            .generate(sample_request(), &mut sink)
            .await
            .unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let events: Vec<StoryEvent> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert!(matches!(events.last(), Some(StoryEvent::Complete { .. })));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, StoryEvent::Page { .. }))
                .count(),
            2
        );
    }
}
