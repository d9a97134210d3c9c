//! PDF text extraction and normalisation.

use crate::storage::ArtifactStore;
use crate::types::{AppError, ExtractedPage, Result};
use lopdf::Document;
use std::time::Instant;
use tracing::{info, warn};

/// Extract the raw text of every page, in page order.
///
/// Pages that fail to decode yield an empty string instead of failing the
/// whole document.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<Vec<String>> {
    let doc = Document::load_mem(bytes)
        .map_err(|e| AppError::Extraction(format!("Failed to parse PDF: {}", e)))?;

    // get_pages() is a BTreeMap keyed by 1-based page number
    let pages = doc
        .get_pages()
        .into_keys()
        .map(|page_num| match doc.extract_text(&[page_num]) {
            Ok(text) => text,
            Err(e) => {
                warn!(page = page_num, error = %e, "Failed to extract page text");
                String::new()
            }
        })
        .collect();

    Ok(pages)
}

/// Normalise whitespace and strip bullet glyphs.
pub fn replace_special_characters(text: &str) -> String {
    let replaced = text
        .replace('\u{a0}', " ")
        .replace("- ", "")
        .replace(['•', '●'], "");

    let mut out = String::with_capacity(replaced.len());
    let mut prev_space = false;
    for c in replaced.chars() {
        if c == ' ' {
            if !prev_space {
                out.push(c);
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    out
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

/// Split on every line boundary. A trailing boundary does not produce an
/// empty final line, and `\r\n` counts as one boundary.
fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !is_line_break(c) {
            continue;
        }
        lines.push(&text[start..i]);
        start = i + c.len_utf8();
        if c == '\r' {
            if let Some(&(j, '\n')) = chars.peek() {
                start = j + 1;
                chars.next();
            }
        }
    }

    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

/// Join all lines of a page with single spaces.
pub fn combine_lines(text: &str) -> String {
    split_lines(text).join(" ")
}

/// Drop lines with no ASCII letter.
pub fn remove_non_letter_lines(text: &str) -> String {
    split_lines(text)
        .into_iter()
        .filter(|line| line.chars().any(|c| c.is_ascii_alphabetic()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn preprocess_text(text: &str) -> String {
    let text = replace_special_characters(text);
    let text = combine_lines(&text);
    remove_non_letter_lines(&text)
}

/// Save processed page texts as the extracted artifact, numbering pages from 1.
pub async fn save_text_to_json(
    store: &ArtifactStore,
    pages_text: Vec<String>,
    file_name: &str,
) -> Result<Vec<ExtractedPage>> {
    let pages: Vec<ExtractedPage> = pages_text
        .into_iter()
        .zip(1u32..)
        .map(|(text, page)| ExtractedPage { text, page })
        .collect();

    store.put_extracted(file_name, &pages).await?;
    Ok(pages)
}

/// Download `raw-pdfs/{file}.pdf`, extract and preprocess each page, and
/// save the result.
pub async fn extract_and_preprocess_pdf(
    store: &ArtifactStore,
    file_name: &str,
) -> Result<Vec<ExtractedPage>> {
    let start = Instant::now();
    let bytes = store.get_raw_pdf(file_name).await?;

    // lopdf parsing is CPU bound
    let raw_pages = tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
        .await
        .map_err(|e| AppError::Internal(format!("Extraction task failed: {}", e)))??;

    let processed: Vec<String> = raw_pages.iter().map(|p| preprocess_text(p)).collect();
    let pages = save_text_to_json(store, processed, file_name).await?;

    info!(
        file = file_name,
        pages = pages.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Extracted PDF"
    );
    Ok(pages)
}
