//! In-memory registry of published stories.
//!
//! The map lock is held only long enough to find an entry. Each entry has
//! its own data lock plus a mutation lock, so a slow regeneration of one
//! story never blocks reads of it or any work on other stories.

use crate::story::{Page, Story, StoryId};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Story not found")]
    StoryNotFound(StoryId),

    #[error("Page not found")]
    PageNotFound { story_id: StoryId, page_number: u32 },
}

/// Held while a story is being mutated.
pub type StoryLock = OwnedMutexGuard<()>;

struct StoryEntry {
    story: RwLock<Story>,
    mutation: Arc<Mutex<()>>,
}

/// Concurrent story registry.
#[derive(Default)]
pub struct StoryStore {
    stories: RwLock<HashMap<StoryId, Arc<StoryEntry>>>,
}

impl StoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a story under its id.
    pub async fn insert(&self, story: Story) -> StoryId {
        let id = story.id;
        let entry = Arc::new(StoryEntry {
            story: RwLock::new(story),
            mutation: Arc::new(Mutex::new(())),
        });
        self.stories.write().await.insert(id, entry);
        id
    }

    /// Snapshot of a story.
    pub async fn get(&self, id: StoryId) -> Option<Story> {
        let entry = self.entry(id).await.ok()?;
        let story = entry.story.read().await;
        Some(story.clone())
    }

    pub async fn contains(&self, id: StoryId) -> bool {
        self.stories.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.stories.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.stories.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<StoryId> {
        self.stories.read().await.keys().copied().collect()
    }

    /// Snapshot of one page, found by page number.
    pub async fn page(&self, id: StoryId, page_number: u32) -> Result<Page, StoreError> {
        let entry = self.entry(id).await?;
        let story = entry.story.read().await;
        story.page(page_number).cloned().ok_or(StoreError::PageNotFound {
            story_id: id,
            page_number,
        })
    }

    /// Replace the page with the same page number.
    pub async fn replace_page(&self, id: StoryId, page: Page) -> Result<(), StoreError> {
        let entry = self.entry(id).await?;
        let mut story = entry.story.write().await;
        let slot = story.page_mut(page.page_number).ok_or(StoreError::PageNotFound {
            story_id: id,
            page_number: page.page_number,
        })?;
        *slot = page;
        Ok(())
    }

    /// Serialize mutations of one story. Other stories are unaffected.
    pub async fn lock_story(&self, id: StoryId) -> Result<StoryLock, StoreError> {
        let entry = self.entry(id).await?;
        Ok(entry.mutation.clone().lock_owned().await)
    }

    async fn entry(&self, id: StoryId) -> Result<Arc<StoryEntry>, StoreError> {
        self.stories
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::StoryNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::StoryMetadata;
    use chrono::Utc;
    use std::time::Duration;

    fn story(pages: u32) -> Story {
        Story {
            id: StoryId::new(),
            pages: (1..=pages).map(|n| Page::new(n, format!("text {n}"))).collect(),
            metadata: StoryMetadata {
                theme: "space".into(),
                characters: vec![],
                moral: None,
                age_group: "6-8".into(),
                created_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = StoryStore::new();
        assert!(store.is_empty().await);

        let s = story(3);
        let id = store.insert(s.clone()).await;
        assert!(store.contains(id).await);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.ids().await, vec![id]);
        assert_eq!(store.get(id).await, Some(s));
        assert_eq!(store.get(StoryId::new()).await, None);
    }

    #[tokio::test]
    async fn test_replace_page_by_number() {
        let store = StoryStore::new();
        let id = store.insert(story(3)).await;

        store.replace_page(id, Page::new(2, "new text")).await.unwrap();
        let s = store.get(id).await.unwrap();
        assert_eq!(s.pages[1].text, "new text");
        assert_eq!(s.pages[0].text, "text 1");
        assert_eq!(s.pages[2].text, "text 3");
    }

    #[tokio::test]
    async fn test_missing_lookups() {
        let store = StoryStore::new();
        let id = store.insert(story(2)).await;
        let before = store.get(id).await;

        let err = store.replace_page(id, Page::new(9, "x")).await.unwrap_err();
        assert_eq!(err, StoreError::PageNotFound { story_id: id, page_number: 9 });
        assert_eq!(store.get(id).await, before);

        let other = StoryId::new();
        assert_eq!(store.page(other, 1).await, Err(StoreError::StoryNotFound(other)));
        assert!(store.lock_story(other).await.is_err());
    }

    #[tokio::test]
    async fn test_story_lock_serializes_one_id_only() {
        let store = Arc::new(StoryStore::new());
        let a = store.insert(story(1)).await;
        let b = store.insert(story(1)).await;

        let guard = store.lock_story(a).await.unwrap();

        // A different story can be locked while `a` is held.
        let other = tokio::time::timeout(Duration::from_millis(100), store.lock_story(b)).await;
        assert!(other.is_ok());

        // Reads of the locked story still proceed.
        assert!(store.get(a).await.is_some());

        let contended = tokio::time::timeout(Duration::from_millis(50), store.lock_story(a)).await;
        assert!(contended.is_err());

        drop(guard);
        assert!(store.lock_story(a).await.is_ok());
    }
}
