//! Retrieval Augmented Generation (RAG) Pipeline
//!
//! # Module Structure
//!
//! - [`rag::extractor`](crate::rag::extractor) - PDF text extraction and cleanup
//! - [`rag::chunker`](crate::rag::chunker) - Sentence-based overlapping chunking
//! - [`rag::embeddings`](crate::rag::embeddings) - Vectorizers (OpenAI-compatible, TF-IDF, local)
//! - [`rag::cache`](crate::rag::cache) - LRU cache for embeddings
//! - [`rag::query`](crate::rag::query) - Retrieval with neighbour expansion and answering
//!
//! # RAG Pipeline
//!
//! 1. **Extract** - Page text is pulled from the raw PDF
//! 2. **Chunk** - Sentences are packed into token-bounded chunks
//! 3. **Vectorize** - Each chunk is embedded and padded
//! 4. **Store** - Vectors go into the vector store under sequential ids
//! 5. **Query** - The question is embedded, neighbours resolved, an LLM answers
//!
//! # Example
//!
//! ```ignore
//! use openrag::rag::query::{QueryEngine, QueryOptions};
//!
//! let engine = QueryEngine::new(artifacts, vectorizer, store, "openrag", 3072)
//!     .with_llm(llm);
//! let result = engine.answer("What is chunk overlap?", QueryOptions::default()).await?;
//! ```

pub mod cache;
pub mod chunker;
pub mod embeddings;
pub mod extractor;
pub mod query;
