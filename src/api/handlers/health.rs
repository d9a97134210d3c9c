use crate::{db::indexer::check_ping_status, types::HealthResponse, AppState};
use axum::{extract::State, Json};

/// Report whether the vector store answers a ping.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = state.pipeline.vector_store();
    let reachable = check_ping_status(store.as_ref()).await;

    Json(HealthResponse {
        status: if reachable { "ok" } else { "degraded" }.to_string(),
        vector_store: store.provider_name().to_string(),
        vector_store_reachable: reachable,
    })
}
