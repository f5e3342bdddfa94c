//! Prompt construction for outline and illustration requests.
//!
//! The outline prompt fixes the `[PAGE n]` markup that [`crate::parser`]
//! reads back; change the two together.

use crate::age::AgeGroup;
use crate::request::{Character, StoryRequest};
use crate::story::Page;

/// Moral used when the request does not supply one.
pub const DEFAULT_MORAL: &str = "A positive life lesson";

/// Characters of page text used as a scene when a page has no description.
pub const SCENE_FALLBACK_CHARS: usize = 100;

/// Build the outline prompt for a request.
pub fn build_outline_prompt(request: &StoryRequest, age: AgeGroup, target_pages: usize) -> String {
    let profile = age.profile();
    let age_label = age.label();
    let character_list = request
        .characters
        .iter()
        .map(|c| {
            if c.description.trim().is_empty() {
                c.name.trim().to_string()
            } else {
                format!("{} ({})", c.name.trim(), c.description.trim())
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    let moral = request.moral().unwrap_or(DEFAULT_MORAL);
    let ideas = request
        .custom_ideas()
        .map(|ideas| format!("ADDITIONAL IDEAS: {ideas}\n"))
        .unwrap_or_default();
    let theme = request.theme.trim();
    let words = profile.word_range();

    format!(
        "Create a children's story with the following specifications:

THEME: {theme}
CHARACTERS: {character_list}
AGE GROUP: {age_label} years old
MORAL/LESSON: {moral}
{ideas}
REQUIREMENTS:
1. Create a story with exactly {target_pages} pages (including title page)
2. Use vocabulary appropriate for {age_label} year olds: {vocabulary}
3. Sentence complexity: {complexity}
4. Each page should be {words} words
5. Include engaging dialogue and descriptive language
6. Make it fun, engaging, and educational
7. End with a clear resolution that reinforces the moral

FORMAT YOUR RESPONSE EXACTLY LIKE THIS:
[PAGE 1 - TITLE]
Title: [Story Title]
Text: [Title page text, author credit]
Illustration: [Description of cover illustration]

[PAGE 2]
Text: [Story text for page 2]
Illustration: [Description of what should be illustrated]

[PAGE 3]
Text: [Story text for page 3]
Illustration: [Description of what should be illustrated]

Continue this format for all {target_pages} pages. Make sure the story has a clear beginning, middle, and end.",
        vocabulary = profile.vocabulary,
        complexity = profile.complexity,
    )
}

/// Build the prompt for one page's illustration.
pub fn build_illustration_prompt(page: &Page, characters: &[Character], theme: &str) -> String {
    let roster = characters
        .iter()
        .map(|c| format!("{}: {}", c.name.trim(), c.description.trim()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Children's book illustration style: watercolor, soft colors, whimsical, friendly, \
         age-appropriate. Theme: {theme}. Characters: {roster}. Scene: {scene}. \
         Create a single beautiful children's book illustration for this scene.",
        theme = theme.trim(),
        scene = scene_description(page),
    )
}

/// The page's scene description, or the opening of its text.
pub fn scene_description(page: &Page) -> String {
    let described = page.illustration_prompt.trim();
    if described.is_empty() {
        truncate_chars(page.text.trim(), SCENE_FALLBACK_CHARS).to_string()
    } else {
        described.to_string()
    }
}

/// Take at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
