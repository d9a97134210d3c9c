//! Sentence-aware, token-bounded chunking with overlap.
//!
//! Pages are split into sentences, then sentences are packed into chunks
//! whose token count falls between a minimum and a maximum. Each new chunk
//! starts with the tail of the previous one so context carries across chunk
//! boundaries.

use crate::storage::ArtifactStore;
use crate::types::{AppError, ExtractedPage, Result};
use crate::utils::toml_config::ChunkingConfig;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tiktoken_rs::CoreBPE;
use tracing::{debug, info};

pub const OVERLAP_SIZE_TOKENS: usize = 40;
pub const CHUNK_SIZE_TOKENS_MIN: usize = 126 + OVERLAP_SIZE_TOKENS;
pub const CHUNK_SIZE_TOKENS_MAX: usize = 256;
pub const DEFAULT_ENCODING: &str = "cl100k_base";

// ============= Token Counting =============

/// BPE token counter.
#[derive(Clone)]
pub struct TokenCounter {
    encoding: String,
    bpe: Arc<CoreBPE>,
}

impl TokenCounter {
    /// Load a tiktoken encoding by name.
    pub fn new(encoding: &str) -> Result<Self> {
        let bpe = match encoding {
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "o200k_base" => tiktoken_rs::o200k_base(),
            "p50k_base" => tiktoken_rs::p50k_base(),
            "r50k_base" => tiktoken_rs::r50k_base(),
            other => {
                return Err(AppError::Configuration(format!(
                    "Unknown token encoding '{}'",
                    other
                )))
            }
        }
        .map_err(|e| AppError::Configuration(format!("Failed to load {}: {}", encoding, e)))?;

        Ok(Self {
            encoding: encoding.to_string(),
            bpe: Arc::new(bpe),
        })
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("encoding", &self.encoding)
            .finish()
    }
}

// ============= Chunk Types =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentence {
    pub text: String,
    pub page: u32,
    /// 1-based position of the sentence on its page
    pub sentence_num: usize,
    /// Number of sentences on the page
    pub sentences_page: usize,
}

/// A chunk of text. Page and sentence fields describe the last sentence
/// that contributed to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub page: u32,
    pub sentence_num: usize,
    pub sentences_page: usize,
}

impl Chunk {
    fn closing(text: String, last: &Sentence) -> Self {
        Self {
            text,
            page: last.page,
            sentence_num: last.sentence_num,
            sentences_page: last.sentences_page,
        }
    }
}

/// Ordered chunks of one document.
///
/// Serialised as `{"chunk_1": {...}, "chunk_2": {...}}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkSet {
    chunks: Vec<Chunk>,
}

pub fn chunk_key(number: usize) -> String {
    format!("chunk_{}", number)
}

fn parse_chunk_key(key: &str) -> Option<usize> {
    key.strip_prefix("chunk_")?
        .parse()
        .ok()
        .filter(|n| *n > 0)
}

impl ChunkSet {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunk by its 1-based number.
    pub fn get(&self, number: usize) -> Option<&Chunk> {
        number.checked_sub(1).and_then(|i| self.chunks.get(i))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Chunk> {
        self.chunks.iter()
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }
}

impl<'a> IntoIterator for &'a ChunkSet {
    type Item = &'a Chunk;
    type IntoIter = std::slice::Iter<'a, Chunk>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.iter()
    }
}

impl Serialize for ChunkSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.chunks.len()))?;
        for (i, chunk) in self.chunks.iter().enumerate() {
            map.serialize_entry(&chunk_key(i + 1), chunk)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ChunkSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = HashMap::<String, Chunk>::deserialize(deserializer)?;

        let mut numbered = raw
            .into_iter()
            .map(|(key, chunk)| {
                parse_chunk_key(&key)
                    .map(|n| (n, chunk))
                    .ok_or_else(|| D::Error::custom(format!("invalid chunk key '{}'", key)))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        numbered.sort_by_key(|(n, _)| *n);

        for (expected, (n, _)) in (1..).zip(&numbered) {
            if *n != expected {
                return Err(D::Error::custom(format!("missing {}", chunk_key(expected))));
            }
        }

        Ok(Self {
            chunks: numbered.into_iter().map(|(_, chunk)| chunk).collect(),
        })
    }
}

// ============= Sentence Splitting =============

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_split_space(c: char) -> bool {
    c.is_whitespace() || ('\x1c'..='\x1f').contains(&c)
}

/// Whether the whitespace at `chars[i]` ends a sentence.
fn is_sentence_boundary(chars: &[char], i: usize) -> bool {
    if i == 0 || !matches!(chars[i - 1], '.' | '?') {
        return false;
    }
    // abbreviations such as "e.g." or "1.2."
    if i >= 4 && is_word(chars[i - 4]) && chars[i - 3] == '.' && is_word(chars[i - 2]) {
        return false;
    }
    // titles such as "Mr." or "Dr."
    if i >= 3
        && chars[i - 3].is_ascii_uppercase()
        && chars[i - 2].is_ascii_lowercase()
        && chars[i - 1] == '.'
    {
        return false;
    }
    !(i >= 2 && is_word(chars[i - 2]) && chars[i - 1] == '?')
}

/// Split text into trimmed sentences.
///
/// The whitespace after `.` or `?` ends a sentence unless it follows an
/// abbreviation, a title, or a question mark glued to a word. Empty pieces
/// are kept so that sentence counts stay stable per page.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0;

    for i in 0..chars.len() {
        if is_split_space(chars[i]) && is_sentence_boundary(&chars, i) {
            sentences.push(chars[start..i].iter().collect::<String>().trim().to_string());
            start = i + 1;
        }
    }
    sentences.push(chars[start..].iter().collect::<String>().trim().to_string());

    sentences
}

// ============= Chunking =============

/// Tail of `parts` worth roughly `overlap_size` tokens, cut on a word boundary.
///
/// Returns the overlap as a single part plus its token count. Text shorter
/// than the cut is returned whole.
pub fn get_overlap(
    parts: &[String],
    overlap_size: usize,
    counter: &TokenCounter,
) -> (Vec<String>, usize) {
    if overlap_size == 0 {
        return (Vec::new(), 0);
    }

    let fluent: Vec<char> = parts.join(" ").chars().collect();
    let mut cut = fluent.len().saturating_sub(overlap_size * 3);
    while cut > 0 && fluent[cut] != ' ' {
        cut -= 1;
    }

    let overlap = fluent[cut..].iter().collect::<String>().trim().to_string();
    if overlap.is_empty() {
        return (Vec::new(), 0);
    }
    let tokens = counter.count(&overlap);
    (vec![overlap], tokens)
}

/// Split at the character midpoint, `floor(n / 2)`.
fn split_in_half(text: &str) -> (String, String) {
    let mid = text.chars().count() / 2;
    let idx = text
        .char_indices()
        .nth(mid)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    (text[..idx].to_string(), text[idx..].to_string())
}

/// Pack sentences into chunks of `min_size..=max_size` tokens.
///
/// A sentence that would push a chunk past `max_size` is halved: the first
/// half closes the chunk and the second half opens the next one after the
/// overlap. Whatever is left at the end becomes a final, possibly short,
/// chunk.
pub fn chunk_sentences(
    sentences: &[Sentence],
    min_size: usize,
    max_size: usize,
    overlap_size: usize,
    counter: &TokenCounter,
) -> ChunkSet {
    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut token_count = 0;
    // Set when `current` holds text that no closed chunk has covered yet
    let mut pending = false;
    let mut last: Option<&Sentence> = None;

    for sentence in sentences {
        if sentence.text.is_empty() {
            continue;
        }
        last = Some(sentence);

        let num_tokens = counter.count(&sentence.text);
        current.push(sentence.text.clone());
        token_count += num_tokens;
        pending = true;

        if (min_size..=max_size).contains(&token_count) {
            chunks.push(Chunk::closing(current.join(" "), sentence));
            (current, token_count) = get_overlap(&current, overlap_size, counter);
            pending = false;
        } else if token_count > max_size {
            current.pop();
            let mut rest = sentence.text.clone();

            loop {
                let (first, second) = split_in_half(&rest);
                current.push(first);
                chunks.push(Chunk::closing(current.join(" "), sentence));

                (current, _) = get_overlap(&current, overlap_size, counter);
                current.push(second.clone());
                token_count = counter.count(&current.join(" "));

                if token_count <= max_size || second.chars().count() < 2 {
                    break;
                }
                current.pop();
                rest = second;
            }
        }
    }

    if let Some(last) = last.filter(|_| pending) {
        let text = current.join(" ").trim().to_string();
        if !text.is_empty() {
            chunks.push(Chunk::closing(text, last));
        }
    }

    ChunkSet::new(chunks)
}

/// Split every page into numbered sentences.
pub fn sentences_from_pages(pages: &[ExtractedPage]) -> Vec<Sentence> {
    pages
        .iter()
        .flat_map(|page| {
            let sentences = split_sentences(&page.text);
            let sentences_page = sentences.len();
            sentences
                .into_iter()
                .enumerate()
                .map(move |(i, text)| Sentence {
                    text,
                    page: page.page,
                    sentence_num: i + 1,
                    sentences_page,
                })
        })
        .collect()
}

pub fn overlapping_chunking(
    pages: &[ExtractedPage],
    min_size: usize,
    max_size: usize,
    overlap_size: usize,
    counter: &TokenCounter,
) -> ChunkSet {
    let sentences = sentences_from_pages(pages);
    debug!(sentences = sentences.len(), "Split pages into sentences");
    chunk_sentences(&sentences, min_size, max_size, overlap_size, counter)
}

/// Chunk the extracted artifact of `file_name` and save the chunked artifact.
pub async fn chunk_and_save(
    store: &ArtifactStore,
    file_name: &str,
    settings: &ChunkingConfig,
    counter: &TokenCounter,
) -> Result<ChunkSet> {
    let start = Instant::now();
    let pages = store.get_extracted(file_name).await?;

    let chunks = overlapping_chunking(
        &pages,
        settings.min_tokens,
        settings.max_tokens,
        settings.overlap_tokens,
        counter,
    );
    store.put_chunked(file_name, &chunks).await?;

    info!(
        file = file_name,
        chunks = chunks.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Chunked document"
    );
    Ok(chunks)
}
