use serde::{Deserialize, Serialize};

// ============= Pipeline Types =============

/// Text of a single PDF page after preprocessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPage {
    pub text: String,
    /// 1-based page number
    pub page: u32,
}

/// Stage of the ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extract,
    Chunk,
    Vectorize,
    Store,
}

impl Stage {
    /// The stage that follows this one, if any.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Extract => Some(Stage::Chunk),
            Stage::Chunk => Some(Stage::Vectorize),
            Stage::Vectorize => Some(Stage::Store),
            Stage::Store => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Chunk => "chunk",
            Stage::Vectorize => "vectorize",
            Stage::Store => "store",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a completed ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub file: String,
    pub pages: usize,
    pub chunks: usize,
    /// Inclusive range of vector ids assigned to the file's chunks
    pub id_range: Option<(u64, u64)>,
    pub duration_ms: u64,
}

// ============= API Request/Response Types =============

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestRequest {
    pub file_name: String,
    #[serde(default)]
    pub recreate: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_neighbors: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub vector_store: String,
    pub vector_store_reachable: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub file_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub message_id: String,
    pub queue: String,
    /// Messages in the queue after this one was added
    pub queued: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub file: String,
    pub start: u64,
    pub end: u64,
    pub chunks: u64,
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("LLM error: {0}")]
    LLM(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON error: {}", e))
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Storage(e.to_string())
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Embedding(_) | AppError::LLM(_) => StatusCode::BAD_GATEWAY,
            AppError::Storage(_)
            | AppError::Extraction(_)
            | AppError::VectorStore(_)
            | AppError::Configuration(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
