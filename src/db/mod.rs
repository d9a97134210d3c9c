//! Vector stores and indexing.
//!
//! The following vector store backends are supported:
//! - `in-memory` - Exact search, nothing persisted
//! - `local` (default) - HNSW index from `ares-vector`, persisted to disk
//! - `qdrant` - Qdrant server, behind the `qdrant` feature
//!
//! `ares-vector` is a default feature. Enable Qdrant via Cargo features:
//! ```toml
//! openrag = { version = "*", features = ["qdrant"] }
//! ```

pub mod indexer;
#[cfg(feature = "ares-vector")]
pub mod local;
pub mod vectorstore;

#[cfg(feature = "qdrant")]
pub mod qdrant;

pub use indexer::{ChunkIndex, IdRange};
#[cfg(feature = "ares-vector")]
pub use local::LocalVectorStore;
pub use vectorstore::{
    CollectionInfo, CollectionStats, DistanceMetric, InMemoryVectorStore, Neighbor, VectorRecord,
    VectorStore, VectorStoreProvider,
};

#[cfg(feature = "qdrant")]
pub use qdrant::QdrantVectorStore;
