//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod mocks;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use mocks::{MockLLMClient, MockVectorizer};
use openrag::db::InMemoryVectorStore;
use openrag::llm::LLMClient;
use openrag::storage::InMemoryBlobStore;
use openrag::{AppState, OpenRagConfig};
use std::sync::Arc;

pub const TEST_DIMENSIONS: usize = 32;

/// Build a PDF with one page per entry. Each line of an entry is written as
/// its own text object so extraction sees separate lines.
pub fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let mut operations = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let y = 780 - (i as i64) * 14;
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), 10.into()]));
            operations.push(Operation::new("Td", vec![50.into(), y.into()]));
            operations.push(Operation::new(
                "Tj",
                vec![Object::string_literal(format!("{} ", line.trim()))],
            ));
            operations.push(Operation::new("ET", vec![]));
        }

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode page content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("save pdf");
    bytes
}

/// Two pages: vector search, then tokenisation and retrieval.
pub fn sample_pdf() -> Vec<u8> {
    pdf_with_pages(&[
        "Vector databases store embeddings for similarity search.\n\
         Each embedding is a list of floating point numbers.\n\
         Nearest neighbour search finds the closest vectors quickly.\n\
         Indexes trade accuracy for speed when collections grow large.",
        "Tokenisers split text into tokens before counting them.\n\
         Chunk overlap keeps context between neighbouring chunks.\n\
         Retrieval returns chunks that answer the user question.\n\
         Rerunning a stage overwrites the artifact it produced.",
    ])
}

pub fn other_pdf() -> Vec<u8> {
    pdf_with_pages(&["Sourdough bread needs flour, water and salt.\n\
         The starter ferments overnight before baking.\n\
         A hot oven gives the loaf a crisp crust."])
}

/// Offline configuration: memory backends, small chunks, instant retries.
pub fn test_config() -> OpenRagConfig {
    OpenRagConfig::from_toml(
        r#"
[storage]
backend = "memory"

[chunking]
min_tokens = 20
max_tokens = 40
overlap_tokens = 5

[vectorizer]
kind = "tfidf"
dimensions = 32
cache_capacity = 100

[vector_store]
provider = "memory"
collection = "test"

[llm]
provider = "none"

[query]
top_k = 2
max_neighbors = 6

[queue]
batch_size = 4
visibility_timeout_secs = 0
poll_interval_secs = 0
max_dequeue_count = 2
"#,
    )
    .expect("test config parses")
}

/// State over in-memory stores with the mock vectorizer.
pub fn test_state(llm: Option<MockLLMClient>) -> AppState {
    test_state_with(test_config(), llm)
}

pub fn test_state_with(config: OpenRagConfig, llm: Option<MockLLMClient>) -> AppState {
    AppState::from_parts(
        config,
        Arc::new(InMemoryBlobStore::new()),
        Arc::new(MockVectorizer::new(TEST_DIMENSIONS)),
        Arc::new(InMemoryVectorStore::new()),
        llm.map(|c| Arc::new(c) as Arc<dyn LLMClient>),
    )
    .expect("state builds")
}

/// Upload `bytes` as `raw-pdfs/{name}.pdf`.
pub async fn upload_pdf(state: &AppState, name: &str, bytes: Vec<u8>) {
    state
        .pipeline
        .artifacts()
        .put_raw_pdf(name, bytes)
        .await
        .expect("upload pdf");
}
