//! Rendering a story to a printable document.
//!
//! [`layout_story`] decides what goes on each page; a [`DocumentRenderer`]
//! turns that layout into bytes. [`PdfRenderer`] writes A4 PDF with the
//! standard Helvetica faces, so no font files are embedded.

use crate::story::{Illustration, Story};
use image::codecs::jpeg::JpegEncoder;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use thiserror::Error;
use tracing::{debug, warn};

pub const PAGE_WIDTH: f32 = 595.0;
pub const PAGE_HEIGHT: f32 = 842.0;
pub const MARGIN: f32 = 50.0;

const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;
const TITLE_SIZE: f32 = 20.0;
const BODY_SIZE: f32 = 12.0;
const BODY_LINE_GAP: f32 = 5.0;
const FOOTER_SIZE: f32 = 10.0;
const FOOTER_BASELINE: f32 = MARGIN - FOOTER_SIZE - 5.0;
const COLOPHON_SIZE: f32 = 10.0;
const IMAGE_BOX: (f32, f32) = (400.0, 300.0);
const JPEG_QUALITY: u8 = 85;
const IMAGE_NAME: &str = "Im1";

pub const AUTHOR: &str = "AI Story Generator";
pub const SUBJECT: &str = "Children's Story";
pub const COLOPHON_CREDIT: &str = "Created with AI Story Generator";

/// Export failures.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("Could not embed illustration for page {page_number}: {source}")]
    Image {
        page_number: u32,
        #[source]
        source: image::ImageError,
    },
}

/// Document-level metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub title: String,
    pub author: String,
    pub subject: String,
    pub keywords: String,
}

impl DocumentInfo {
    pub fn for_story(story: &Story) -> Self {
        let title = story
            .pages
            .first()
            .map(|p| p.title.as_deref().unwrap_or(&p.text).trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| SUBJECT.to_string());

        Self {
            title,
            author: AUTHOR.to_string(),
            subject: SUBJECT.to_string(),
            keywords: story.metadata.theme.clone(),
        }
    }
}

/// One logical page of the output document.
///
/// A story page may spill onto continuation sheets when its text is long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentPage {
    Story {
        page_number: u32,
        title: Option<String>,
        illustration: Option<Illustration>,
        body: String,
        footer: String,
    },
    Colophon {
        lines: Vec<String>,
    },
}

/// Lay out a story: one document page per story page, then a colophon.
pub fn layout_story(story: &Story) -> Vec<DocumentPage> {
    let mut pages: Vec<DocumentPage> = story
        .pages
        .iter()
        .map(|page| DocumentPage::Story {
            page_number: page.page_number,
            title: page
                .title
                .as_ref()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            illustration: page.illustration.clone(),
            body: page.text.clone(),
            footer: format!("Page {}", page.page_number),
        })
        .collect();

    pages.push(DocumentPage::Colophon {
        lines: vec![
            COLOPHON_CREDIT.to_string(),
            format!("Generated on: {}", story.metadata.created_at.format("%Y-%m-%d")),
            format!("Theme: {}", story.metadata.theme),
        ],
    });

    pages
}

/// Turns a laid-out story into a document.
pub trait DocumentRenderer: Send + Sync {
    /// Media type of the produced bytes.
    fn media_type(&self) -> &'static str;

    fn render(&self, story: &Story) -> Result<Vec<u8>, ExportError>;
}

/// A4 PDF output.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfRenderer;

impl PdfRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentRenderer for PdfRenderer {
    fn media_type(&self) -> &'static str {
        "application/pdf"
    }

    fn render(&self, story: &Story) -> Result<Vec<u8>, ExportError> {
        let mut builder = PdfBuilder::new();

        for page in layout_story(story) {
            match page {
                DocumentPage::Story {
                    page_number,
                    title,
                    illustration,
                    body,
                    footer,
                } => {
                    let image = illustration.and_then(|ill| {
                        match prepare_image(&ill) {
                            Ok(prepared) => Some(prepared),
                            Err(source) => {
                                let e = ExportError::Image { page_number, source };
                                warn!(error = %e, "skipping illustration");
                                None
                            }
                        }
                    });
                    builder.story_page(title.as_deref(), image, &body, &footer)?;
                }
                DocumentPage::Colophon { lines } => builder.colophon(&lines)?,
            }
        }

        let bytes = builder.finish(&DocumentInfo::for_story(story))?;
        debug!(story_id = %story.id, bytes = bytes.len(), "rendered pdf");
        Ok(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Face {
    Regular,
    Bold,
    Oblique,
}

impl Face {
    fn resource(self) -> &'static str {
        match self {
            Face::Regular => "F1",
            Face::Bold => "F2",
            Face::Oblique => "F3",
        }
    }
}

struct PreparedImage {
    jpeg: Vec<u8>,
    width: u32,
    height: u32,
}

/// Decode any supported format and re-encode as baseline JPEG for DCTDecode.
fn prepare_image(illustration: &Illustration) -> Result<PreparedImage, image::ImageError> {
    let rgb = image::load_from_memory(&illustration.data)?.to_rgb8();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode_image(&rgb)?;
    Ok(PreparedImage {
        jpeg,
        width: rgb.width(),
        height: rgb.height(),
    })
}

/// Operations for one physical sheet.
struct Sheet {
    ops: Vec<Operation>,
    image: Option<ObjectId>,
    y: f32,
}

impl Sheet {
    fn new() -> Self {
        Self {
            ops: Vec::new(),
            image: None,
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn text(&mut self, face: Face, size: f32, x: f32, y: f32, text: &str) {
        self.ops.push(Operation::new("BT", vec![]));
        self.ops.push(Operation::new(
            "Tf",
            vec![Object::Name(face.resource().as_bytes().to_vec()), size.into()],
        ));
        self.ops.push(Operation::new("Td", vec![x.into(), y.into()]));
        self.ops.push(Operation::new(
            "Tj",
            vec![Object::String(to_win_ansi(text), StringFormat::Literal)],
        ));
        self.ops.push(Operation::new("ET", vec![]));
    }

    fn centered(&mut self, face: Face, size: f32, y: f32, text: &str) {
        let width = text_width(text, face, size);
        let x = MARGIN + ((CONTENT_WIDTH - width) / 2.0).max(0.0);
        self.text(face, size, x, y, text);
    }

    fn image(&mut self, id: ObjectId, x: f32, y: f32, width: f32, height: f32) {
        self.image = Some(id);
        self.ops.push(Operation::new("q", vec![]));
        self.ops.push(Operation::new(
            "cm",
            vec![width.into(), 0.into(), 0.into(), height.into(), x.into(), y.into()],
        ));
        self.ops.push(Operation::new(
            "Do",
            vec![Object::Name(IMAGE_NAME.as_bytes().to_vec())],
        ));
        self.ops.push(Operation::new("Q", vec![]));
    }
}

struct PdfBuilder {
    doc: Document,
    pages_id: ObjectId,
    fonts_id: ObjectId,
    page_ids: Vec<ObjectId>,
}

impl PdfBuilder {
    fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let fonts = dictionary! {
            Face::Regular.resource() => type1_font("Helvetica"),
            Face::Bold.resource() => type1_font("Helvetica-Bold"),
            Face::Oblique.resource() => type1_font("Helvetica-Oblique"),
        };
        let fonts_id = doc.add_object(fonts);

        Self {
            doc,
            pages_id,
            fonts_id,
            page_ids: Vec::new(),
        }
    }

    fn story_page(
        &mut self,
        title: Option<&str>,
        image: Option<PreparedImage>,
        body: &str,
        footer: &str,
    ) -> Result<(), ExportError> {
        let mut sheet = Sheet::new();

        if let Some(title) = title {
            for line in wrap_text(title, Face::Bold, TITLE_SIZE, CONTENT_WIDTH) {
                sheet.y -= TITLE_SIZE * 1.2;
                sheet.centered(Face::Bold, TITLE_SIZE, sheet.y, &line);
            }
            sheet.y -= BODY_SIZE;
        }

        if let Some(image) = image {
            let scale = (IMAGE_BOX.0 / image.width as f32).min(IMAGE_BOX.1 / image.height as f32);
            let (width, height) = (image.width as f32 * scale, image.height as f32 * scale);
            let id = self.add_image(image);
            let x = MARGIN + (CONTENT_WIDTH - width) / 2.0;
            sheet.y -= height;
            sheet.image(id, x, sheet.y, width, height);
            sheet.y -= BODY_SIZE;
        }

        let line_height = BODY_SIZE + BODY_LINE_GAP;
        for line in wrap_text(body, Face::Regular, BODY_SIZE, CONTENT_WIDTH) {
            if sheet.y - line_height < MARGIN {
                sheet.centered(Face::Regular, FOOTER_SIZE, FOOTER_BASELINE, footer);
                self.add_sheet(sheet)?;
                sheet = Sheet::new();
            }
            sheet.y -= line_height;
            if !line.is_empty() {
                sheet.text(Face::Regular, BODY_SIZE, MARGIN, sheet.y, &line);
            }
        }

        sheet.centered(Face::Regular, FOOTER_SIZE, FOOTER_BASELINE, footer);
        self.add_sheet(sheet)
    }

    fn colophon(&mut self, lines: &[String]) -> Result<(), ExportError> {
        let mut sheet = Sheet::new();
        for line in lines {
            sheet.y -= COLOPHON_SIZE * 1.4;
            sheet.centered(Face::Oblique, COLOPHON_SIZE, sheet.y, line);
        }
        self.add_sheet(sheet)
    }

    fn add_image(&mut self, image: PreparedImage) -> ObjectId {
        let dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => image.width as i64,
            "Height" => image.height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        };
        self.doc.add_object(Stream::new(dict, image.jpeg))
    }

    fn add_sheet(&mut self, sheet: Sheet) -> Result<(), ExportError> {
        let content = Content { operations: sheet.ops };
        let content_id = self.doc.add_object(Stream::new(dictionary! {}, content.encode()?));

        let mut resources = dictionary! { "Font" => self.fonts_id };
        if let Some(image_id) = sheet.image {
            resources.set("XObject", dictionary! { IMAGE_NAME => image_id });
        }

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
            "Contents" => content_id,
            "Resources" => resources,
        });
        self.page_ids.push(page_id);
        Ok(())
    }

    fn finish(mut self, info: &DocumentInfo) -> Result<Vec<u8>, ExportError> {
        let kids: Vec<Object> = self.page_ids.iter().map(|id| Object::from(*id)).collect();
        let count = self.page_ids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let info_id = self.doc.add_object(info_dictionary(info));
        self.doc.trailer.set("Info", info_id);

        let mut out = Vec::new();
        self.doc.save_to(&mut out).map_err(lopdf::Error::from)?;
        Ok(out)
    }
}

fn type1_font(base: &str) -> Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base,
        "Encoding" => "WinAnsiEncoding",
    }
}

fn info_dictionary(info: &DocumentInfo) -> Dictionary {
    let string = |s: &str| Object::String(to_win_ansi(s), StringFormat::Literal);
    dictionary! {
        "Title" => string(&info.title),
        "Author" => string(&info.author),
        "Subject" => string(&info.subject),
        "Keywords" => string(&info.keywords),
        "Producer" => string(AUTHOR),
    }
}

/// Encode text for a WinAnsiEncoding font. Unmappable characters become `?`.
fn to_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{20AC}' => 0x80,
            '\u{2026}' => 0x85,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            ' '..='~' | '\u{A0}'..='\u{FF}' => c as u8,
            _ => b'?',
        })
        .collect()
}

/// Approximate Helvetica advance width in em units.
fn char_width(c: char, face: Face) -> f32 {
    let width = match c {
        ' ' => 0.278,
        'i' | 'j' | 'l' | '.' | ',' | '\'' | '!' | ':' | ';' | '|' => 0.24,
        'f' | 't' | 'r' | 'I' | '(' | ')' | '-' => 0.33,
        'm' | 'w' | 'M' | 'W' => 0.85,
        'A'..='Z' => 0.68,
        _ => 0.556,
    };
    match face {
        Face::Bold => width * 1.06,
        _ => width,
    }
}

fn text_width(text: &str, face: Face, size: f32) -> f32 {
    text.chars().map(|c| char_width(c, face)).sum::<f32>() * size
}

/// Greedy word wrap. Blank source lines are kept as empty lines; words wider
/// than the line are broken between characters.
fn wrap_text(text: &str, face: Face, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if line.is_empty() {
                word.to_string()
            } else {
                format!("{line} {word}")
            };
            if text_width(&candidate, face, size) <= max_width {
                line = candidate;
                continue;
            }
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            for c in word.chars() {
                line.push(c);
                if text_width(&line, face, size) > max_width && line.chars().count() > 1 {
                    line.pop();
                    lines.push(std::mem::take(&mut line));
                    line.push(c);
                }
            }
        }
        lines.push(line);
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::{Page, StoryId, StoryMetadata};
    use crate::testing::tiny_png;
    use chrono::{TimeZone, Utc};

    fn story() -> Story {
        let mut cover = Page::new(1, "By the Storybook team").with_title("Mira and the Moon");
        cover.illustration = Some(Illustration::new(tiny_png(), None));
        Story {
            id: StoryId::new(),
            pages: vec![cover, Page::new(2, "Mira floats past the moon.")],
            metadata: StoryMetadata {
                theme: "space".into(),
                characters: vec![],
                moral: None,
                age_group: "6-8".into(),
                created_at: Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap(),
            },
        }
    }

    #[test]
    fn test_layout_one_page_per_story_page_plus_colophon() {
        let layout = layout_story(&story());
        assert_eq!(layout.len(), 3);

        match &layout[0] {
            DocumentPage::Story {
                title,
                illustration,
                footer,
                ..
            } => {
                assert_eq!(title.as_deref(), Some("Mira and the Moon"));
                assert!(illustration.is_some());
                assert_eq!(footer, "Page 1");
            }
            other => panic!("expected story page, got {other:?}"),
        }

        match &layout[1] {
            DocumentPage::Story {
                title, body, footer, ..
            } => {
                assert!(title.is_none());
                assert_eq!(body, "Mira floats past the moon.");
                assert_eq!(footer, "Page 2");
            }
            other => panic!("expected story page, got {other:?}"),
        }

        assert_eq!(
            layout[2],
            DocumentPage::Colophon {
                lines: vec![
                    "Created with AI Story Generator".into(),
                    "Generated on: 2024-03-09".into(),
                    "Theme: space".into(),
                ]
            }
        );
    }

    #[test]
    fn test_document_info() {
        let info = DocumentInfo::for_story(&story());
        assert_eq!(info.title, "Mira and the Moon");
        assert_eq!(info.author, AUTHOR);
        assert_eq!(info.subject, SUBJECT);
        assert_eq!(info.keywords, "space");

        let mut untitled = story();
        untitled.pages[0].title = None;
        assert_eq!(DocumentInfo::for_story(&untitled).title, "By the Storybook team");

        untitled.pages.clear();
        assert_eq!(DocumentInfo::for_story(&untitled).title, SUBJECT);
    }

    #[test]
    fn test_render_produces_pdf() {
        let bytes = PdfRenderer::new().render(&story()).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
        let tail = String::from_utf8_lossy(&bytes[bytes.len().saturating_sub(16)..]).to_string();
        assert!(tail.contains("%%EOF"));
    }

    #[test]
    fn test_undecodable_image_is_skipped() {
        let mut s = story();
        s.pages[1].illustration = Some(Illustration::new(b"not an image".to_vec(), None));
        let bytes = PdfRenderer::new().render(&s).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
    }

    #[test]
    fn test_long_text_renders() {
        let mut s = story();
        s.pages[1].text = "Mira counted the stars again. ".repeat(400);
        assert!(PdfRenderer::new().render(&s).is_ok());
    }

    #[test]
    fn test_wrap_respects_width() {
        let text = "Mira floated past the silver moon and waved at the comets ".repeat(10);
        let lines = wrap_text(&text, Face::Regular, BODY_SIZE, CONTENT_WIDTH);
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(text_width(line, Face::Regular, BODY_SIZE) <= CONTENT_WIDTH);
        }
        let rejoined = lines.join(" ");
        assert_eq!(rejoined.split_whitespace().count(), text.split_whitespace().count());
    }

    #[test]
    fn test_wrap_keeps_blank_lines_and_breaks_long_words() {
        let lines = wrap_text("one\n\ntwo", Face::Regular, BODY_SIZE, CONTENT_WIDTH);
        assert_eq!(lines, vec!["one", "", "two"]);

        let long = "x".repeat(200);
        let lines = wrap_text(&long, Face::Regular, BODY_SIZE, 100.0);
        assert!(lines.len() > 1);
        assert_eq!(lines.concat(), long);
    }

    #[test]
    fn test_win_ansi() {
        assert_eq!(to_win_ansi("Caf\u{e9}"), vec![b'C', b'a', b'f', 0xE9]);
        assert_eq!(to_win_ansi("\u{201C}hi\u{201D}"), vec![0x93, b'h', b'i', 0x94]);
        assert_eq!(to_win_ansi("\u{1F680}"), vec![b'?']);
    }
}
