//! Age brackets and the writing constraints they imply.

use serde::{Deserialize, Serialize};

/// Supported reader age brackets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgeGroup {
    #[serde(rename = "3-5")]
    ThreeToFive,
    #[serde(rename = "6-8")]
    SixToEight,
    #[serde(rename = "9-12")]
    NineToTwelve,
}

impl Default for AgeGroup {
    fn default() -> Self {
        AgeGroup::SixToEight
    }
}

impl AgeGroup {
    /// All brackets, youngest first.
    pub const ALL: [AgeGroup; 3] = [
        AgeGroup::ThreeToFive,
        AgeGroup::SixToEight,
        AgeGroup::NineToTwelve,
    ];

    /// Resolve a bracket label, falling back to the default bracket.
    pub fn resolve(label: &str) -> Self {
        Self::parse(label).unwrap_or_default()
    }

    /// Parse an exact bracket label.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim() {
            "3-5" => Some(AgeGroup::ThreeToFive),
            "6-8" => Some(AgeGroup::SixToEight),
            "9-12" => Some(AgeGroup::NineToTwelve),
            _ => None,
        }
    }

    /// The bracket label, e.g. `"6-8"`.
    pub fn label(&self) -> &'static str {
        match self {
            AgeGroup::ThreeToFive => "3-5",
            AgeGroup::SixToEight => "6-8",
            AgeGroup::NineToTwelve => "9-12",
        }
    }

    /// Writing constraints for this bracket.
    pub fn profile(&self) -> &'static AgeProfile {
        match self {
            AgeGroup::ThreeToFive => &THREE_TO_FIVE,
            AgeGroup::SixToEight => &SIX_TO_EIGHT,
            AgeGroup::NineToTwelve => &NINE_TO_TWELVE,
        }
    }
}

/// Prompt-shaping guidance for one bracket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgeProfile {
    pub vocabulary: &'static str,
    pub complexity: &'static str,
    /// Target words per page, as a range.
    pub word_count: (u32, u32),
    pub suggested_themes: &'static [&'static str],
}

impl AgeProfile {
    /// Word range formatted for prompts, e.g. `"40-80"`.
    pub fn word_range(&self) -> String {
        format!("{}-{}", self.word_count.0, self.word_count.1)
    }
}

static THREE_TO_FIVE: AgeProfile = AgeProfile {
    vocabulary: "simple, common words",
    complexity: "short, simple sentences",
    word_count: (20, 40),
    suggested_themes: &["friendship", "sharing", "colors", "animals", "family"],
};

static SIX_TO_EIGHT: AgeProfile = AgeProfile {
    vocabulary: "common words with some new vocabulary",
    complexity: "medium-length sentences with basic conjunctions",
    word_count: (40, 80),
    suggested_themes: &["adventure", "problem-solving", "emotions", "nature", "imagination"],
};

static NINE_TO_TWELVE: AgeProfile = AgeProfile {
    vocabulary: "varied vocabulary with context clues",
    complexity: "complex sentences with multiple clauses",
    word_count: (80, 150),
    suggested_themes: &[
        "mystery",
        "courage",
        "responsibility",
        "discovery",
        "friendship challenges",
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_brackets() {
        for group in AgeGroup::ALL {
            assert_eq!(AgeGroup::resolve(group.label()), group);
        }
    }

    #[test]
    fn test_unknown_bracket_falls_back_to_six_to_eight() {
        assert_eq!(AgeGroup::resolve("toddler"), AgeGroup::SixToEight);
        assert_eq!(AgeGroup::resolve(""), AgeGroup::SixToEight);
        assert_eq!(AgeGroup::parse("13-17"), None);
    }

    #[test]
    fn test_word_ranges_grow_with_age() {
        assert_eq!(AgeGroup::ThreeToFive.profile().word_range(), "20-40");
        assert_eq!(AgeGroup::SixToEight.profile().word_range(), "40-80");
        assert_eq!(AgeGroup::NineToTwelve.profile().word_range(), "80-150");
    }
}
