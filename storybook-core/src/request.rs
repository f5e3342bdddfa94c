//! Story requests and their validation.

use crate::age::AgeGroup;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a request is rejected before any model call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing required field: theme")]
    MissingTheme,

    #[error("Missing required field: at least one character is required")]
    NoCharacters,

    #[error("Character {0} has no name")]
    EmptyCharacterName(usize),

    #[error("Missing required field: ageGroup")]
    MissingAgeGroup,
}

/// A member of the story's cast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Character {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// What the caller asks for.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryRequest {
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub characters: Vec<Character>,
    #[serde(default)]
    pub age_group: String,
    #[serde(default)]
    pub moral: Option<String>,
    #[serde(default)]
    pub custom_ideas: Option<String>,
}

impl StoryRequest {
    /// Create a request with a theme and an age group and no characters yet.
    pub fn new(theme: impl Into<String>, age_group: impl Into<String>) -> Self {
        Self {
            theme: theme.into(),
            age_group: age_group.into(),
            ..Default::default()
        }
    }

    pub fn with_character(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.characters.push(Character::new(name, description));
        self
    }

    pub fn with_moral(mut self, moral: impl Into<String>) -> Self {
        self.moral = Some(moral.into());
        self
    }

    pub fn with_custom_ideas(mut self, ideas: impl Into<String>) -> Self {
        self.custom_ideas = Some(ideas.into());
        self
    }

    /// Check required fields. Unknown age groups are not an error; they
    /// resolve to the default bracket.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.theme.trim().is_empty() {
            return Err(ValidationError::MissingTheme);
        }
        if self.characters.is_empty() {
            return Err(ValidationError::NoCharacters);
        }
        if let Some(index) = self
            .characters
            .iter()
            .position(|c| c.name.trim().is_empty())
        {
            return Err(ValidationError::EmptyCharacterName(index + 1));
        }
        if self.age_group.trim().is_empty() {
            return Err(ValidationError::MissingAgeGroup);
        }
        Ok(())
    }

    /// The bracket this request's age group resolves to.
    pub fn age(&self) -> AgeGroup {
        AgeGroup::resolve(&self.age_group)
    }

    /// The moral if one was given and is not blank.
    pub fn moral(&self) -> Option<&str> {
        non_blank(self.moral.as_deref())
    }

    /// Extra ideas if given and not blank.
    pub fn custom_ideas(&self) -> Option<&str> {
        non_blank(self.custom_ideas.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
