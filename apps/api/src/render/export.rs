//! DOCX and PDF export of the visible results.

use std::io::{Cursor, Write};

use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfLayerReference};
use quick_xml::escape::escape;
use thiserror::Error;
use zip::write::SimpleFileOptions;

use crate::payments::pipeline::ResultsView;
use crate::render::document::{build_sections, Block};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Pdf,
    Docx,
}

impl ExportFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pdf" => Some(ExportFormat::Pdf),
            "docx" => Some(ExportFormat::Docx),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Docx => "docx",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf error: {0}")]
    Pdf(String),
}

pub fn export(view: &ResultsView, format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Pdf => export_pdf(view),
        ExportFormat::Docx => export_docx(view),
    }
}

/// Plain-text line for a block, shared by both formats.
fn block_text(block: &Block) -> String {
    match block {
        Block::Heading(t) | Block::Paragraph(t) | Block::Failed(t) | Block::Pending(t) => t.clone(),
        Block::Bullet(t) => format!("- {t}"),
        Block::Score { label, value } => format!("{label}: {value}/100"),
    }
}

// ────────────────────────────────────────────
// DOCX
// ────────────────────────────────────────────

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

/// One `w:p`. `size` is in half-points.
fn docx_paragraph(text: &str, bold: bool, size: u32) -> String {
    let bold = if bold { "<w:b/>" } else { "" };
    format!(
        r#"<w:p><w:r><w:rPr>{bold}<w:sz w:val="{size}"/></w:rPr><w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
        escape(text)
    )
}

fn document_xml(view: &ResultsView) -> String {
    let mut body = docx_paragraph(&format!("Resume review: {}", view.file_name), true, 36);
    for section in build_sections(view) {
        body.push_str(&docx_paragraph(&section.title, true, 30));
        for block in &section.blocks {
            let bold = matches!(block, Block::Heading(_) | Block::Score { .. });
            body.push_str(&docx_paragraph(&block_text(block), bold, 22));
        }
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
    )
}

pub fn export_docx(view: &ResultsView) -> Result<Vec<u8>, ExportError> {
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buffer);
        let options = SimpleFileOptions::default();
        zip.start_file("[Content_Types].xml", options)?;
        zip.write_all(CONTENT_TYPES.as_bytes())?;
        zip.start_file("_rels/.rels", options)?;
        zip.write_all(ROOT_RELS.as_bytes())?;
        zip.start_file("word/document.xml", options)?;
        zip.write_all(document_xml(view).as_bytes())?;
        zip.finish()?;
    }
    Ok(buffer.into_inner())
}

// ────────────────────────────────────────────
// PDF
// ────────────────────────────────────────────

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 20.0;
const BODY_PT: f32 = 11.0;
const HEADING_PT: f32 = 15.0;
/// Characters per body line at 11pt Helvetica across the text width.
const BODY_WRAP: usize = 90;
const HEADING_WRAP: usize = 62;

fn pt_to_mm(pt: f32) -> f32 {
    pt * 0.3528
}

/// Greedy word wrap; words longer than `width` are split.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            lines.push(word.drain(..width).collect());
        }
        let word: String = word.into_iter().collect();
        if word.is_empty() {
            continue;
        }
        let needed = if current.is_empty() { 0 } else { 1 } + word.chars().count();
        if current.chars().count() + needed > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Built-in PDF fonts only cover Latin-1; map common typography and drop the rest.
fn pdf_safe(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2013}' | '\u{2014}' => '-',
            '\u{2022}' => '-',
            c if (c as u32) < 0x100 => c,
            _ => '?',
        })
        .collect()
}

struct PdfWriter {
    doc: printpdf::PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    y: f32,
    pages: usize,
}

impl PdfWriter {
    fn new(title: &str) -> Result<Self, ExportError> {
        let (doc, page, layer) =
            PdfDocument::new(title, Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
        let regular = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| ExportError::Pdf(e.to_string()))?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| ExportError::Pdf(e.to_string()))?;
        let layer = doc.get_page(page).get_layer(layer);
        Ok(Self {
            doc,
            layer,
            regular,
            bold,
            y: PAGE_HEIGHT_MM - MARGIN_MM,
            pages: 1,
        })
    }

    fn line(&mut self, text: &str, size: f32, bold: bool) {
        let advance = pt_to_mm(size) * 1.4;
        if self.y - advance < MARGIN_MM {
            self.pages += 1;
            let (page, layer) = self.doc.add_page(
                Mm(PAGE_WIDTH_MM),
                Mm(PAGE_HEIGHT_MM),
                format!("Layer {}", self.pages),
            );
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = PAGE_HEIGHT_MM - MARGIN_MM;
        }
        self.y -= advance;
        let font = if bold { &self.bold } else { &self.regular };
        self.layer
            .use_text(pdf_safe(text), size, Mm(MARGIN_MM), Mm(self.y), font);
    }

    fn paragraph(&mut self, text: &str, size: f32, bold: bool, width: usize) {
        for line in wrap(text, width) {
            self.line(&line, size, bold);
        }
    }

    fn gap(&mut self) {
        self.y -= pt_to_mm(BODY_PT) * 0.6;
    }

    fn finish(self) -> Result<Vec<u8>, ExportError> {
        self.doc
            .save_to_bytes()
            .map_err(|e| ExportError::Pdf(e.to_string()))
    }
}

pub fn export_pdf(view: &ResultsView) -> Result<Vec<u8>, ExportError> {
    let mut pdf = PdfWriter::new(&format!("Resume review: {}", view.file_name))?;
    pdf.paragraph(&format!("Resume review: {}", view.file_name), HEADING_PT + 3.0, true, HEADING_WRAP);

    for section in build_sections(view) {
        pdf.gap();
        pdf.paragraph(&section.title, HEADING_PT, true, HEADING_WRAP);
        for block in &section.blocks {
            let bold = matches!(block, Block::Heading(_) | Block::Score { .. });
            pdf.paragraph(&block_text(block), BODY_PT, bold, BODY_WRAP);
        }
    }
    pdf.finish()
}
