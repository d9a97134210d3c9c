//! RAG API handlers.
//!
//! Provides endpoints for:
//! - Synchronous ingestion of an uploaded PDF
//! - Queueing ingestion for the background worker
//! - Question answering
//! - Listing indexed documents

use crate::{
    rag::query::{QueryAnswer, QueryOptions},
    types::{
        AppError, DocumentEntry, EnqueueRequest, EnqueueResponse, IngestReport, IngestRequest,
        QueryRequest, Result,
    },
    AppState,
};
use axum::{extract::State, Json};
use tracing::info;

// ============================================================================
// Ingest Endpoints
// ============================================================================

/// Run every stage for `raw-pdfs/{file_name}.pdf`.
pub async fn ingest(
    State(state): State<AppState>,
    Json(payload): Json<IngestRequest>,
) -> Result<Json<IngestReport>> {
    if payload.file_name.trim().is_empty() {
        return Err(AppError::InvalidInput("file_name required".into()));
    }

    let report = state
        .pipeline
        .ingest(&payload.file_name, payload.recreate)
        .await?;
    Ok(Json(report))
}

/// Queue `file_name` for the background worker.
pub async fn enqueue(
    State(state): State<AppState>,
    Json(payload): Json<EnqueueRequest>,
) -> Result<Json<EnqueueResponse>> {
    if payload.file_name.trim().is_empty() {
        return Err(AppError::InvalidInput("file_name required".into()));
    }

    let message_id = state.pipeline.enqueue(&state.queue, &payload.file_name)?;
    info!(file = %payload.file_name, id = %message_id, "Queued ingestion");

    Ok(Json(EnqueueResponse {
        message_id,
        queue: state.queue.name().to_string(),
        queued: state.queue.approximate_len(),
    }))
}

// ============================================================================
// Query Endpoint
// ============================================================================

/// Answer a question from the indexed collection.
///
/// Unset request fields fall back to the `[query]` section.
pub async fn query(
    State(state): State<AppState>,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<QueryAnswer>> {
    let defaults = state.default_query_options();
    let options = QueryOptions {
        top_k: payload.top_k.unwrap_or(defaults.top_k),
        max_neighbors: payload.max_neighbors.unwrap_or(defaults.max_neighbors),
        generate: payload.generate.unwrap_or(defaults.generate),
    };

    let answer = state
        .query_engine
        .answer(&payload.question, options)
        .await?;
    Ok(Json(answer))
}

// ============================================================================
// Documents Endpoint
// ============================================================================

/// List files in the chunk index with their id ranges.
pub async fn documents(State(state): State<AppState>) -> Result<Json<Vec<DocumentEntry>>> {
    let index = state.pipeline.artifacts().get_chunk_index().await?;
    let entries = index
        .entries()
        .map(|(file, range)| DocumentEntry {
            file: file.to_string(),
            start: range.start,
            end: range.end,
            chunks: range.len(),
        })
        .collect();
    Ok(Json(entries))
}
