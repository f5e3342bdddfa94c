//! Suggested story themes.
//!
//! The pipeline treats a request's theme as free text; this catalog only
//! feeds theme pickers.

use lazy_static::lazy_static;
use serde::Serialize;

/// A suggested theme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Theme {
    pub value: &'static str,
    pub label: &'static str,
    pub emoji: &'static str,
}

lazy_static! {
    static ref THEMES: Vec<Theme> = vec![
        theme("adventure", "Adventure", "🗺️"),
        theme("friendship", "Friendship", "🤝"),
        theme("magic", "Magic & Fantasy", "✨"),
        theme("animals", "Animals", "🦁"),
        theme("space", "Space", "🚀"),
        theme("underwater", "Underwater", "🐠"),
        theme("dinosaurs", "Dinosaurs", "🦕"),
        theme("fairy-tale", "Fairy Tale", "🏰"),
        theme("superhero", "Superhero", "🦸"),
        theme("nature", "Nature", "🌳"),
    ];
}

fn theme(value: &'static str, label: &'static str, emoji: &'static str) -> Theme {
    Theme { value, label, emoji }
}

/// All suggested themes, in display order.
pub fn themes() -> &'static [Theme] {
    &THEMES
}

/// Look up a theme by its value, ignoring case.
pub fn find_theme(value: &str) -> Option<&'static Theme> {
    let value = value.trim();
    THEMES.iter().find(|t| t.value.eq_ignore_ascii_case(value))
}
