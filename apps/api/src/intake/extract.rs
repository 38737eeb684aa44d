//! Text extraction from uploaded resumes: PDF, DOCX and plain text.

use std::io::{Cursor, Read};
use std::path::Path;

use bytes::Bytes;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Resume text beyond this is cut off before it reaches a prompt.
pub const MAX_RESUME_CHARS: usize = 40_000;

/// Upper bound on the inflated `word/document.xml`. Markup outweighs text
/// many times over, but a real resume stays far below this.
pub const MAX_DOCX_XML_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Text,
}

impl DocumentKind {
    /// Picks the kind from the content type, falling back to the extension.
    pub fn detect(file_name: &str, content_type: Option<&str>) -> Option<Self> {
        let by_type = content_type.and_then(|ct| {
            let essence = ct.split(';').next().unwrap_or_default().trim();
            match essence.to_ascii_lowercase().as_str() {
                "application/pdf" => Some(DocumentKind::Pdf),
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                    Some(DocumentKind::Docx)
                }
                "text/plain" | "text/markdown" => Some(DocumentKind::Text),
                _ => None,
            }
        });
        by_type.or_else(|| {
            let extension = Path::new(file_name)
                .extension()
                .and_then(|v| v.to_str())
                .map(|v| v.to_ascii_lowercase())
                .unwrap_or_default();
            match extension.as_str() {
                "pdf" => Some(DocumentKind::Pdf),
                "docx" => Some(DocumentKind::Docx),
                "txt" | "md" => Some(DocumentKind::Text),
                _ => None,
            }
        })
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("could not read PDF: {0}")]
    Pdf(String),

    #[error("could not read DOCX: {0}")]
    Docx(String),

    #[error("text file is not valid UTF-8")]
    Encoding,

    #[error("no text could be extracted from the document")]
    Empty,
}

pub async fn extract_text(kind: DocumentKind, data: Bytes) -> Result<String, ExtractError> {
    let raw = match kind {
        DocumentKind::Pdf => {
            // pdf-extract is CPU-bound and can panic on hostile input.
            tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&data))
                .await
                .map_err(|e| ExtractError::Pdf(e.to_string()))?
                .map_err(|e| ExtractError::Pdf(e.to_string()))?
        }
        DocumentKind::Docx => {
            tokio::task::spawn_blocking(move || extract_docx_text(&data, MAX_DOCX_XML_BYTES))
                .await
                .map_err(|e| ExtractError::Docx(e.to_string()))?
                .map_err(|e| ExtractError::Docx(e.to_string()))?
        }
        DocumentKind::Text => String::from_utf8(data.to_vec()).map_err(|_| ExtractError::Encoding)?,
    };

    let text = normalize_text(&raw);
    if text.is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(text)
}

fn extract_docx_text(data: &[u8], max_xml_bytes: u64) -> anyhow::Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
    let document_file = archive.by_name("word/document.xml")?;
    if document_file.size() > max_xml_bytes {
        anyhow::bail!("document body is larger than {max_xml_bytes} bytes");
    }
    // The declared size can lie; never inflate past the limit.
    let mut xml = String::new();
    document_file
        .take(max_xml_bytes + 1)
        .read_to_string(&mut xml)?;
    if xml.len() as u64 > max_xml_bytes {
        anyhow::bail!("document body is larger than {max_xml_bytes} bytes");
    }

    let mut reader = Reader::from_str(&xml);
    let mut current = String::new();
    let mut lines = Vec::new();
    let mut in_paragraph = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"w:p" => {
                in_paragraph = true;
                current.clear();
            }
            Event::End(e) if e.name().as_ref() == b"w:p" => {
                lines.push(current.trim().to_string());
                current.clear();
                in_paragraph = false;
            }
            Event::Empty(e) if in_paragraph => match e.name().as_ref() {
                b"w:tab" => current.push('\t'),
                b"w:br" => current.push('\n'),
                _ => {}
            },
            Event::Text(e) if in_paragraph => current.push_str(&e.xml_content()?),
            Event::GeneralRef(e) if in_paragraph => {
                if let Some(ch) = e.resolve_char_ref()? {
                    current.push(ch);
                } else if let Some(resolved) = resolve_predefined_entity(&e.decode()?) {
                    current.push_str(resolved);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(lines.join("\n"))
}

/// Trims lines, collapses blank runs to one empty line and caps the length.
pub fn normalize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(MAX_RESUME_CHARS));
    let mut blank_run = 0;
    for line in raw.replace('\r', "").lines() {
        let line = line.trim();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 || out.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    let trimmed = out.trim_end();
    match trimmed.char_indices().nth(MAX_RESUME_CHARS) {
        Some((cut, _)) => trimmed[..cut].to_string(),
        None => trimmed.to_string(),
    }
}
