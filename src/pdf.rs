use crate::config::Config;
use crate::error::{Result, TrustLayerError};
use chrono::Local;
use once_cell::sync::Lazy;
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference};
use regex::Regex;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 18.0;

const TITLE_SIZE: f32 = 20.0;
const SUBTITLE_SIZE: f32 = 12.0;
const BODY_SIZE: f32 = 12.0;
const FOOTER_SIZE: f32 = 10.0;

const BODY_WRAP_COLS: usize = 88;
const BULLET_WRAP_COLS: usize = 80;
const BULLET_INDENT_MM: f32 = 8.0;
const BULLET_GLYPH: &str = "\u{2022} ";

const PT_TO_MM: f32 = 0.352_778;
// Average Helvetica glyph advance, in em. Good enough for centering and
// right-aligning single lines with the builtin fonts.
const AVG_CHAR_EM: f32 = 0.5;

static UNSAFE_KEY_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("valid regex"));
static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").expect("valid regex"));
static BULLET_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:-|\*|\d+\.)\s+").expect("valid regex"));

/// A PDF written to local disk, ready to be attached or served
#[derive(Debug, Clone)]
pub struct GeneratedArtifact {
    /// Absolute or configured-relative path of the file on disk
    pub file_path: PathBuf,
    /// Bare filename, `AI_Analysis_<key>.pdf`
    pub filename: String,
}

/// Renders analysis text into a paginated A4 report PDF
#[derive(Debug, Clone)]
pub struct PdfRenderer {
    output_dir: PathBuf,
    require_issue_key: bool,
}

impl PdfRenderer {
    /// Creates a renderer writing into the configured output directory
    pub fn new(config: &Config) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            require_issue_key: config.require_issue_key,
        }
    }

    /// Renders `content` into `AI_Analysis_<key>.pdf` under the output dir.
    ///
    /// Without an issue key the strict configuration fails with
    /// [`TrustLayerError::MissingIssueKey`]; the lenient one substitutes a
    /// timestamp so concurrent keyless requests stay distinguishable.
    pub fn render(&self, content: &str, issue_key: Option<&str>) -> Result<GeneratedArtifact> {
        let key = match issue_key {
            Some(key) if !key.trim().is_empty() => key.trim().to_string(),
            _ if self.require_issue_key => return Err(TrustLayerError::MissingIssueKey),
            _ => Local::now().format("%Y%m%d%H%M%S").to_string(),
        };

        std::fs::create_dir_all(&self.output_dir)?;

        let safe_key = sanitize_key(&key);
        let filename = format!("AI_Analysis_{safe_key}.pdf");
        let file_path = self.output_dir.join(&filename);

        let (doc, page, layer) = PdfDocument::new(
            "AI Analysis Report",
            Mm(PAGE_WIDTH_MM),
            Mm(PAGE_HEIGHT_MM),
            "content",
        );
        let body_font = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| TrustLayerError::PdfWrite(e.to_string()))?;
        let title_font = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| TrustLayerError::PdfWrite(e.to_string()))?;

        let mut writer = PageWriter::new(&doc, doc.get_page(page).get_layer(layer));

        writer.centered_line("AI Analysis Report", TITLE_SIZE, &title_font);
        writer.advance(4.0);
        writer.centered_line(&format!("Jira Issue: {key}"), SUBTITLE_SIZE, &body_font);
        writer.advance(6.0);

        for block in split_blocks(content) {
            match block {
                Block::Bullets(lines) => {
                    for line in lines {
                        let mut wrapped = wrap(&line, BULLET_WRAP_COLS).into_iter();
                        if let Some(first) = wrapped.next() {
                            writer.line(
                                &format!("{BULLET_GLYPH}{first}"),
                                BODY_SIZE,
                                MARGIN_MM + BULLET_INDENT_MM,
                                &body_font,
                            );
                        }
                        // Continuation lines align under the bullet text
                        for rest in wrapped {
                            writer.line(
                                &rest,
                                BODY_SIZE,
                                MARGIN_MM + BULLET_INDENT_MM + 4.0,
                                &body_font,
                            );
                        }
                    }
                    writer.advance(line_height(BODY_SIZE) / 2.0);
                }
                Block::Body(text) => {
                    for line in wrap(&text, BODY_WRAP_COLS) {
                        writer.line(&line, BODY_SIZE, MARGIN_MM, &body_font);
                    }
                    writer.advance(line_height(BODY_SIZE));
                }
            }
        }

        let generated_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        writer.advance(line_height(BODY_SIZE));
        writer.right_aligned_line(&format!("Generated at: {generated_at}"), FOOTER_SIZE, &body_font);

        let file = File::create(&file_path)?;
        doc.save(&mut BufWriter::new(file))
            .map_err(|e| TrustLayerError::PdfWrite(e.to_string()))?;

        tracing::info!(path = %file_path.display(), "PDF written");
        Ok(GeneratedArtifact { file_path, filename })
    }
}

/// Reduces an issue key to a filesystem-safe token
pub fn sanitize_key(key: &str) -> String {
    UNSAFE_KEY_CHARS.replace_all(key, "_").into_owned()
}

enum Block {
    /// One entry per source line, list markers already stripped
    Bullets(Vec<String>),
    Body(String),
}

fn split_blocks(content: &str) -> Vec<Block> {
    let normalized = content.replace("\r\n", "\n");
    PARAGRAPH_BREAK
        .split(&normalized)
        .filter_map(|para| {
            let trimmed = para.trim();
            if trimmed.is_empty() {
                return None;
            }
            let first_line = trimmed.lines().next().unwrap_or_default();
            if BULLET_MARKER.is_match(first_line) {
                let lines = trimmed
                    .lines()
                    .map(|line| BULLET_MARKER.replace(line.trim(), "").into_owned())
                    .collect();
                Some(Block::Bullets(lines))
            } else {
                Some(Block::Body(trimmed.to_string()))
            }
        })
        .collect()
}

/// Greedy word wrap; words longer than a full line are hard-split.
fn wrap(text: &str, cols: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word = word;
        while word.chars().count() > cols {
            let split_at = word
                .char_indices()
                .nth(cols)
                .map(|(i, _)| i)
                .unwrap_or(word.len());
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            lines.push(word[..split_at].to_string());
            word = &word[split_at..];
        }
        let needed = word.chars().count() + if current.is_empty() { 0 } else { 1 };
        if current.chars().count() + needed > cols && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn line_height(size: f32) -> f32 {
    size * 1.4 * PT_TO_MM
}

fn text_width_mm(text: &str, size: f32) -> f32 {
    text.chars().count() as f32 * size * AVG_CHAR_EM * PT_TO_MM
}

/// Tracks the write cursor across pages, adding pages as text runs past the
/// bottom margin.
struct PageWriter<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    y: f32,
}

impl<'a> PageWriter<'a> {
    fn new(doc: &'a PdfDocumentReference, layer: PdfLayerReference) -> Self {
        Self {
            doc,
            layer,
            y: PAGE_HEIGHT_MM - MARGIN_MM - line_height(TITLE_SIZE),
        }
    }

    fn line(&mut self, text: &str, size: f32, x: f32, font: &IndirectFontRef) {
        self.ensure_room(line_height(size));
        self.layer.use_text(text, size, Mm(x), Mm(self.y), font);
        self.y -= line_height(size);
    }

    fn centered_line(&mut self, text: &str, size: f32, font: &IndirectFontRef) {
        let x = ((PAGE_WIDTH_MM - text_width_mm(text, size)) / 2.0).max(MARGIN_MM);
        self.line(text, size, x, font);
    }

    fn right_aligned_line(&mut self, text: &str, size: f32, font: &IndirectFontRef) {
        let x = (PAGE_WIDTH_MM - MARGIN_MM - text_width_mm(text, size)).max(MARGIN_MM);
        self.line(text, size, x, font);
    }

    fn advance(&mut self, dy: f32) {
        self.y -= dy;
    }

    fn ensure_room(&mut self, needed: f32) {
        if self.y - needed < MARGIN_MM {
            let (page, layer) = self.doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "content");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = PAGE_HEIGHT_MM - MARGIN_MM;
        }
    }
}
