//! API request handlers.

/// Liveness and vector store reachability.
pub mod health;
/// Ingestion, querying and document listing.
pub mod rag;
