//! Turns free-form model output into page records.
//!
//! Parsing is two passes: [`segment`] splits the text on `[PAGE n]`
//! delimiters, then each block's labeled fields (`Title:`, `Text:`,
//! `Illustration:`) are extracted. When no delimiter is found the text is
//! split into equal line chunks instead. Neither path fails and neither
//! returns an empty list.

use crate::prompt::truncate_chars;
use crate::story::Page;
use lazy_static::lazy_static;
use regex::Regex;

/// Page count requested when nothing else is configured.
pub const DEFAULT_TARGET_PAGES: usize = 7;

lazy_static! {
    /// `[PAGE 3]` or `[PAGE 1 - TITLE]`, any case.
    static ref PAGE_DELIMITER: Regex =
        Regex::new(r"(?i)\[\s*PAGE\s+(\d+)\s*(?:-\s*([^\]]*?)\s*)?\]")
            .expect("page delimiter pattern is valid");

    /// A field label such as `Text:` or `**Illustration:**` at the start of a line.
    static ref FIELD_LABEL: Regex =
        Regex::new(r"(?im)^[ \t]*\**(title|text|illustration)\**[ \t]*:")
            .expect("field label pattern is valid");
}

/// How a page list was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// The `[PAGE n]` markup was present.
    Tagged,
    /// No markup; text was split into line chunks.
    Fallback,
}

/// Result of parsing an outline.
#[derive(Debug, Clone)]
pub struct ParsedOutline {
    pub pages: Vec<Page>,
    pub mode: ParseMode,
}

/// A delimited block of raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub page_number: u32,
    /// Text after the dash in the delimiter, e.g. `TITLE`.
    pub tag: Option<&'a str>,
    /// Everything up to the next delimiter or end of input.
    pub body: &'a str,
}

/// Parse raw text into pages, in input order.
pub fn parse_pages(raw: &str, target_pages: usize) -> Vec<Page> {
    parse_outline(raw, target_pages).pages
}

/// Parse raw text and report which path produced the pages.
pub fn parse_outline(raw: &str, target_pages: usize) -> ParsedOutline {
    let segments = segment(raw);
    if segments.is_empty() {
        return ParsedOutline {
            pages: fallback_pages(raw, target_pages),
            mode: ParseMode::Fallback,
        };
    }

    ParsedOutline {
        pages: segments.iter().map(page_from_segment).collect(),
        mode: ParseMode::Tagged,
    }
}

/// First pass: split on page delimiters.
///
/// Delimiters numbered 0 or too large to represent are not treated as
/// delimiters; their text stays in the preceding block.
pub fn segment(raw: &str) -> Vec<Segment<'_>> {
    let delimiters: Vec<(usize, usize, u32, Option<&str>)> = PAGE_DELIMITER
        .captures_iter(raw)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let number = caps[1].parse::<u32>().ok().filter(|n| *n > 0)?;
            let tag = caps
                .get(2)
                .map(|t| t.as_str().trim())
                .filter(|t| !t.is_empty());
            Some((whole.start(), whole.end(), number, tag))
        })
        .collect();

    delimiters
        .iter()
        .enumerate()
        .map(|(i, &(_, body_start, page_number, tag))| {
            let body_end = delimiters
                .get(i + 1)
                .map(|next| next.0)
                .unwrap_or(raw.len());
            Segment {
                page_number,
                tag,
                body: &raw[body_start..body_end],
            }
        })
        .collect()
}

/// Labeled values found in one block.
#[derive(Debug, Default, PartialEq, Eq)]
struct Fields {
    title: Option<String>,
    text: Option<String>,
    illustration: Option<String>,
    /// Block content not claimed by any label.
    unlabeled: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Title,
    Text,
    Illustration,
}

/// Second pass: pull labeled fields out of a block body.
///
/// Labels only count at the start of a line, so prose such as "its title:"
/// stays in the value. Each value runs to the next label or the end of the
/// block. A `Title:`
/// value is only its first line; anything after that line is unlabeled.
fn extract_fields(body: &str) -> Fields {
    let labels: Vec<(Label, usize, usize)> = FIELD_LABEL
        .captures_iter(body)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let label = match caps[1].to_ascii_lowercase().as_str() {
                "title" => Label::Title,
                "text" => Label::Text,
                _ => Label::Illustration,
            };
            Some((label, whole.start(), whole.end()))
        })
        .collect();

    let mut fields = Fields::default();
    let mut unlabeled = vec![body[..labels.first().map(|l| l.1).unwrap_or(body.len())].to_string()];

    for (i, &(label, _, value_start)) in labels.iter().enumerate() {
        let value_end = labels.get(i + 1).map(|next| next.1).unwrap_or(body.len());
        let value = &body[value_start..value_end];

        match label {
            Label::Title => {
                let (first_line, rest) = value.split_once('\n').unwrap_or((value, ""));
                if fields.title.is_none() {
                    fields.title = Some(clean(first_line));
                }
                unlabeled.push(rest.to_string());
            }
            Label::Text => {
                if fields.text.is_none() {
                    fields.text = Some(clean(value));
                }
            }
            Label::Illustration => {
                if fields.illustration.is_none() {
                    fields.illustration = Some(clean(value));
                }
            }
        }
    }

    fields.unlabeled = unlabeled
        .iter()
        .map(|s| clean(s))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    fields
}

fn page_from_segment(segment: &Segment<'_>) -> Page {
    let fields = extract_fields(segment.body);

    let text = fields
        .text
        .filter(|t| !t.is_empty())
        .or_else(|| Some(fields.unlabeled.clone()).filter(|t| !t.is_empty()))
        .unwrap_or_else(|| placeholder_text(segment.page_number));

    let title = fields
        .title
        .filter(|t| !t.is_empty())
        .or_else(|| segment.tag.map(str::to_string));

    Page {
        title,
        illustration_prompt: fields.illustration.unwrap_or_default(),
        ..Page::new(segment.page_number, text)
    }
}

/// Split unmarked text into exactly `target_pages` pages of equal line chunks.
///
/// Short inputs still yield `target_pages` pages; chunks past the end of the
/// text get placeholder text.
pub fn fallback_pages(raw: &str, target_pages: usize) -> Vec<Page> {
    let target = target_pages.max(1);
    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let chunk_size = lines.len().div_ceil(target).max(1);

    (0..target)
        .map(|i| {
            let page_number = (i + 1) as u32;
            let start = (i * chunk_size).min(lines.len());
            let end = ((i + 1) * chunk_size).min(lines.len());
            let chunk = lines[start..end].join(" ");
            let text = if chunk.is_empty() {
                placeholder_text(page_number)
            } else {
                chunk
            };
            let title = if page_number == 1 {
                "Title Page".to_string()
            } else {
                format!("Page {page_number}")
            };
            let illustration = format!("Illustration for: {}", truncate_chars(&text, 100));

            Page::new(page_number, text)
                .with_title(title)
                .with_illustration_prompt(illustration)
        })
        .collect()
}

/// Serialize a page back into the delimiter format the parser reads.
pub fn render_page_block(page: &Page) -> String {
    let mut block = String::new();
    match page.title.as_deref().filter(|t| !t.trim().is_empty()) {
        Some(title) => {
            block.push_str(&format!("[PAGE {} - TITLE]\n", page.page_number));
            block.push_str(&format!("Title: {}\n", title.trim()));
        }
        None => block.push_str(&format!("[PAGE {}]\n", page.page_number)),
    }
    block.push_str(&format!("Text: {}\n", page.text.trim()));
    block.push_str(&format!("Illustration: {}\n", page.illustration_prompt.trim()));
    block
}

/// Order pages by page number and drop repeated numbers, keeping the first.
pub fn normalize_pages(mut pages: Vec<Page>) -> Vec<Page> {
    pages.sort_by_key(|p| p.page_number);
    pages.dedup_by_key(|p| p.page_number);
    pages
}

fn placeholder_text(page_number: u32) -> String {
    format!("Page {page_number} content")
}

fn clean(value: &str) -> String {
    value
        .trim_matches(|c: char| c.is_whitespace() || c == '*')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_FORMED: &str = "\
[PAGE 1 - TITLE]
Title: Mira and the Moon
Text: A story about a curious astronaut.
Illustration: Mira waving from a rocket window

[PAGE 2]
Text:   Mira zoomed past the stars.
Illustration:  A rocket among stars

[PAGE 3]
Text: She landed softly.
Illustration: A moon landing
";

    #[test]
    fn test_parses_well_formed_blocks_in_order() {
        let outline = parse_outline(WELL_FORMED, 7);
        assert_eq!(outline.mode, ParseMode::Tagged);
        let pages = outline.pages;
        assert_eq!(pages.len(), 3);
        assert_eq!(
            pages.iter().map(|p| p.page_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(pages[0].title.as_deref(), Some("Mira and the Moon"));
        assert_eq!(pages[0].text, "A story about a curious astronaut.");
        assert_eq!(pages[1].text, "Mira zoomed past the stars.");
        assert_eq!(pages[1].illustration_prompt, "A rocket among stars");
        assert_eq!(pages[1].title, None);
    }

    #[test]
    fn test_trailing_content_belongs_to_last_page() {
        let raw = "[PAGE 1]\nText: Start.\nIllustration: A door\n\n[PAGE 2]\nText: End.\nIllustration: A garden\nwith tall flowers";
        let pages = parse_pages(raw, 7);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].illustration_prompt, "A garden\nwith tall flowers");
    }

    #[test]
    fn test_delimiter_tag_used_when_no_title_field() {
        let pages = parse_pages("[page 1 - The Cover]\nText: Hello", 7);
        assert_eq!(pages[0].title.as_deref(), Some("The Cover"));
        assert_eq!(pages[0].illustration_prompt, "");
    }

    #[test]
    fn test_unlabeled_block_uses_content_as_text() {
        let pages = parse_pages("[PAGE 4]\nThe owl hooted twice.\nIllustration: An owl", 7);
        assert_eq!(pages[0].text, "The owl hooted twice.");
        assert_eq!(pages[0].illustration_prompt, "An owl");
    }

    #[test]
    fn test_empty_block_gets_placeholder_text() {
        let pages = parse_pages("[PAGE 1]\n\n[PAGE 2]\nIllustration: only art", 7);
        assert_eq!(pages[0].text, "Page 1 content");
        assert_eq!(pages[1].text, "Page 2 content");
    }

    #[test]
    fn test_markdown_emphasis_is_stripped() {
        let raw = "**[PAGE 2]**\n**Text:** The fox hid.\n**Illustration:** A fox behind a log";
        let pages = parse_pages(raw, 7);
        assert_eq!(pages[0].text, "The fox hid.");
        assert_eq!(pages[0].illustration_prompt, "A fox behind a log");
    }

    #[test]
    fn test_label_words_inside_prose_stay_in_text() {
        let raw = "[PAGE 3]\nText: Mira read the sign. Its title: Moon Base. \
                   Then she read the small text: Welcome!\nIllustration: A sign on the moon";
        let pages = parse_pages(raw, 7);
        assert_eq!(pages.len(), 1);
        assert_eq!(
            pages[0].text,
            "Mira read the sign. Its title: Moon Base. Then she read the small text: Welcome!"
        );
        assert_eq!(pages[0].title, None);
        assert_eq!(pages[0].illustration_prompt, "A sign on the moon");
    }

    #[test]
    fn test_indented_labels_are_recognized() {
        let pages = parse_pages("[PAGE 2]\n  Text: Indented.\n\t**Illustration:** A lamp", 7);
        assert_eq!(pages[0].text, "Indented.");
        assert_eq!(pages[0].illustration_prompt, "A lamp");
    }

    #[test]
    fn test_zero_numbered_delimiter_is_not_a_page() {
        let pages = parse_pages("[PAGE 1]\nText: One [PAGE 0] still one", 7);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].text, "One [PAGE 0] still one");
    }

    #[test]
    fn test_fallback_without_markers() {
        let raw = (1..=14)
            .map(|i| format!("Line {i}."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let outline = parse_outline(&raw, DEFAULT_TARGET_PAGES);
        assert_eq!(outline.mode, ParseMode::Fallback);
        let pages = outline.pages;
        assert_eq!(pages.len(), 7);
        assert_eq!(pages[0].title.as_deref(), Some("Title Page"));
        assert_eq!(pages[3].title.as_deref(), Some("Page 4"));
        assert_eq!(pages[0].text, "Line 1. Line 2.");
        assert_eq!(pages[0].illustration_prompt, "Illustration for: Line 1. Line 2.");
        assert!(pages.iter().all(|p| !p.text.is_empty()));
    }

    #[test]
    fn test_fallback_short_input_still_fills_target() {
        let pages = parse_pages("Just one line", 7);
        assert_eq!(pages.len(), 7);
        assert_eq!(pages[0].text, "Just one line");
        assert_eq!(pages[6].text, "Page 7 content");
        assert_eq!(pages[6].illustration_prompt, "Illustration for: Page 7 content");
    }

    #[test]
    fn test_fallback_on_empty_input() {
        let pages = parse_pages("", 3);
        assert_eq!(pages.len(), 3);
        assert!(pages.iter().all(|p| !p.text.is_empty()));
    }

    #[test]
    fn test_fallback_uneven_split() {
        let raw = "a\nb\nc\nd\ne\nf\ng\nh";
        let pages = parse_pages(raw, 7);
        assert_eq!(pages.len(), 7);
        assert_eq!(pages[0].text, "a b");
        assert_eq!(pages[3].text, "g h");
        assert_eq!(pages[4].text, "Page 5 content");
    }

    #[test]
    fn test_render_and_reparse_round_trip() {
        let original = parse_pages(WELL_FORMED, 7);
        let rendered: String = original.iter().map(render_page_block).collect::<Vec<_>>().join("\n");
        let reparsed = parse_pages(&rendered, 7);

        assert_eq!(reparsed.len(), original.len());
        for (a, b) in original.iter().zip(&reparsed) {
            assert_eq!(a.page_number, b.page_number);
            assert_eq!(a.title, b.title);
            assert_eq!(a.text, b.text);
            assert_eq!(a.illustration_prompt, b.illustration_prompt);
        }
    }

    #[test]
    fn test_normalize_sorts_and_dedups() {
        let pages = vec![
            Page::new(3, "three"),
            Page::new(1, "one"),
            Page::new(3, "three again"),
            Page::new(2, "two"),
        ];
        let normalized = normalize_pages(pages);
        assert_eq!(
            normalized.iter().map(|p| p.text.as_str()).collect::<Vec<_>>(),
            vec!["one", "two", "three"]
        );
    }
}
