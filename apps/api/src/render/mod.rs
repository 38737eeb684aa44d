//! Presentation of stored results: the HTML page and DOCX/PDF exports.

pub mod document;
pub mod export;
pub mod handlers;
pub mod html;
