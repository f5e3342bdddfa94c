//! Story, page, and illustration records.

use crate::request::Character;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Media type assumed when the model does not report one.
pub const DEFAULT_IMAGE_MIME: &str = "image/png";

/// Opaque identifier of a published story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoryId(Uuid);

impl StoryId {
    /// Create a new unique story ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StoryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// A generated picture for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Illustration {
    /// Raw image bytes; base64 when serialized.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl Illustration {
    pub fn new(data: Vec<u8>, mime_type: Option<String>) -> Self {
        Self {
            data,
            mime_type: mime_type
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string()),
        }
    }
}

/// One page of a story.
///
/// `page_number` is the page's identity for regeneration; it is never
/// re-derived from the page's position in the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub page_number: u32,
    #[serde(default)]
    pub title: Option<String>,
    pub text: String,
    /// Scene description used to request art.
    #[serde(default)]
    pub illustration_prompt: String,
    #[serde(default)]
    pub illustration: Option<Illustration>,
    #[serde(default)]
    pub image_description: Option<String>,
    /// Set when the illustration could not be produced.
    #[serde(default)]
    pub error: Option<String>,
}

impl Page {
    /// Create a page with text only.
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            title: None,
            text: text.into(),
            illustration_prompt: String::new(),
            illustration: None,
            image_description: None,
            error: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_illustration_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.illustration_prompt = prompt.into();
        self
    }

    /// Whether this page has a usable picture.
    pub fn is_illustrated(&self) -> bool {
        self.illustration.is_some()
    }
}

/// Descriptive data recorded alongside a story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryMetadata {
    pub theme: String,
    pub characters: Vec<Character>,
    #[serde(default)]
    pub moral: Option<String>,
    pub age_group: String,
    pub created_at: DateTime<Utc>,
}

/// A published story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: StoryId,
    pub pages: Vec<Page>,
    pub metadata: StoryMetadata,
}

impl Story {
    /// Find a page by its page number.
    pub fn page(&self, page_number: u32) -> Option<&Page> {
        self.pages.iter().find(|p| p.page_number == page_number)
    }

    /// Find a mutable page by its page number.
    pub fn page_mut(&mut self, page_number: u32) -> Option<&mut Page> {
        self.pages.iter_mut().find(|p| p.page_number == page_number)
    }

    /// Title shown on the cover: the first page's title, else its text.
    pub fn display_title(&self) -> Option<&str> {
        let first = self.pages.first()?;
        first
            .title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or(Some(first.text.as_str()))
    }

    /// Number of pages whose illustration failed.
    pub fn failed_illustrations(&self) -> usize {
        self.pages.iter().filter(|p| p.error.is_some()).count()
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.trim())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_story_id_round_trips_through_string() {
        let id = StoryId::new();
        let parsed: StoryId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<StoryId>().is_err());
    }

    #[test]
    fn test_illustration_defaults_mime_type() {
        assert_eq!(Illustration::new(vec![1], None).mime_type, "image/png");
        assert_eq!(
            Illustration::new(vec![1], Some(" ".into())).mime_type,
            "image/png"
        );
        assert_eq!(
            Illustration::new(vec![1], Some("image/jpeg".into())).mime_type,
            "image/jpeg"
        );
    }

    #[test]
    fn test_page_serializes_camel_case_with_base64_image() {
        let mut page = Page::new(2, "The fox ran.").with_illustration_prompt("A fox running");
        page.illustration = Some(Illustration::new(vec![1, 2, 3], None));

        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["pageNumber"], 2);
        assert_eq!(json["illustrationPrompt"], "A fox running");
        assert_eq!(json["illustration"]["data"], "AQID");
        assert_eq!(json["illustration"]["mimeType"], "image/png");
        assert!(json["error"].is_null());

        let back: Page = serde_json::from_value(json).unwrap();
        assert_eq!(back, page);
    }

    #[test]
    fn test_display_title_prefers_title() {
        let story = Story {
            id: StoryId::new(),
            pages: vec![Page::new(1, "By the River").with_title("The Brave Otter")],
            metadata: StoryMetadata {
                theme: "nature".into(),
                characters: vec![],
                moral: None,
                age_group: "3-5".into(),
                created_at: Utc::now(),
            },
        };
        assert_eq!(story.display_title(), Some("The Brave Otter"));
    }
}
