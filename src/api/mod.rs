//! HTTP API Handlers and Routes
//!
//! # API Endpoints
//!
//! - `GET /api/health` - Vector store reachability
//! - `POST /api/ingest` - Run the full pipeline for one file
//! - `POST /api/jobs` - Queue a file for the background worker
//! - `POST /api/query` - Answer a question from the collection
//! - `GET /api/documents` - Files in the chunk index
//!
//! Errors are returned as `{"error": "..."}` with a matching status code.

/// Request and response handlers for all API endpoints.
pub mod handlers;
/// Router configuration and route definitions.
pub mod routes;

pub use routes::{create_app, create_router};
