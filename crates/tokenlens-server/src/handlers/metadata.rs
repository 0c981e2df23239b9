use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use tokenlens_core::etag::{cache_control, if_none_match_satisfied, weak_etag, DEFAULT_MAX_AGE_SECS};
use tokenlens_core::ChainId;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct MetadataQuery {
    #[serde(rename = "rpcUrl")]
    pub rpc_url: Option<String>,
    pub refresh: Option<u8>,
    pub debug: Option<u8>,
}

/// `GET /{chain}/{contract}/{tokenId}`.
pub async fn get_metadata(
    State(state): State<Arc<AppState>>,
    Path((chain, contract, token_id)): Path<(String, String, String)>,
    Query(query): Query<MetadataQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let debug = query.debug.unwrap_or(0) == 1 && state.config.dev_mode;

    let chain = ChainId::parse(&chain).map_err(|e| ApiError::new(e, debug))?;
    let skip_cache = query.refresh.unwrap_or(0) == 1;

    let mut rpc = state.rpc.lock().await;
    let mut metadata = state.metadata.lock().await;
    let record = metadata
        .resolve(&mut rpc, chain, &contract, &token_id, query.rpc_url.as_deref(), skip_cache)
        .await
        .map_err(|e| ApiError::new(e, debug))?;
    drop(rpc);
    drop(metadata);

    let body = serde_json::to_vec(&record).map_err(|e| {
        ApiError::new(tokenlens_core::ResolveError::unknown(format!("could not serialize metadata: {e}")), debug)
    })?;
    let etag = weak_etag(&body);

    if let Some(if_none_match) = headers.get(axum::http::header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        if if_none_match_satisfied(if_none_match, &etag) {
            return Ok((
                StatusCode::NOT_MODIFIED,
                [(axum::http::header::ETAG, etag)],
            )
                .into_response());
        }
    }

    Ok((
        StatusCode::OK,
        [
            (axum::http::header::ETAG, etag),
            (axum::http::header::CACHE_CONTROL, cache_control(DEFAULT_MAX_AGE_SECS)),
            (axum::http::header::CONTENT_TYPE, "application/json".to_string()),
        ],
        Json(record),
    )
        .into_response())
}
