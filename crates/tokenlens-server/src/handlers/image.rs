use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use tokenlens_core::etag::{cache_control, if_none_match_satisfied, weak_etag, DEFAULT_MAX_AGE_SECS};
use tokenlens_core::image::{clamp_dimension, clamp_quality, transform, TransformParams};
use tokenlens_core::uri::decode_data_url;
use tokenlens_core::{ChainId, ErrorKind, ResolveError};

use crate::AppState;

const IMAGE_BYTE_CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(300);

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    w: Option<String>,
    h: Option<String>,
    q: Option<String>,
    #[serde(rename = "rpcUrl")]
    rpc_url: Option<String>,
    raw: Option<u8>,
    svg: Option<u8>,
    debug: Option<u8>,
    json: Option<u8>,
}

/// `GET /{chain}/{contract}/{tokenId}/image`.
pub async fn get_image(
    State(state): State<Arc<AppState>>,
    Path((chain, contract, token_id)): Path<(String, String, String)>,
    Query(query): Query<ImageQuery>,
    headers: HeaderMap,
) -> Response {
    let debug = query.debug.unwrap_or(0) == 1 && state.config.dev_mode;
    let json_errors = query.json.unwrap_or(0) == 1;

    match serve_image(&state, &chain, &contract, &token_id, &query, &headers).await {
        Ok(response) => response,
        Err(err) => error_response(err, json_errors, debug),
    }
}

async fn serve_image(
    state: &Arc<AppState>,
    chain: &str,
    contract: &str,
    token_id: &str,
    query: &ImageQuery,
    headers: &HeaderMap,
) -> Result<Response, ResolveError> {
    let chain = ChainId::parse(chain)?;

    let mut rpc = state.rpc.lock().await;
    let mut metadata = state.metadata.lock().await;
    let record = metadata
        .resolve(&mut rpc, chain, contract, token_id, query.rpc_url.as_deref(), false)
        .await?;
    drop(rpc);
    drop(metadata);

    let image_url = record.image_url.ok_or_else(|| {
        ResolveError::new(ErrorKind::Contract, "token has no image field", false)
    })?;

    let raw = query.raw.unwrap_or(0) == 1;

    if raw {
        if image_url.starts_with("data:") {
            let decoded = decode_data_url(&image_url)?;
            return Ok((
                StatusCode::OK,
                [(axum::http::header::CONTENT_TYPE, decoded.mime)],
                decoded.bytes,
            )
                .into_response());
        }
        return Ok(Redirect::temporary(&image_url).into_response());
    }

    let (content_type, bytes) = {
        let mut images = state.images.lock().await;
        images.fetch(&image_url, IMAGE_BYTE_CACHE_TTL).await?
    };

    let etag = weak_etag(&bytes);
    if let Some(if_none_match) = headers.get(axum::http::header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        if if_none_match_satisfied(if_none_match, &etag) {
            return Ok((StatusCode::NOT_MODIFIED, [(axum::http::header::ETAG, etag)]).into_response());
        }
    }

    let params = TransformParams {
        width: clamp_dimension(query.w.as_deref().and_then(|v| v.parse().ok())),
        height: clamp_dimension(query.h.as_deref().and_then(|v| v.parse().ok())),
        quality: clamp_quality(query.q.as_deref().and_then(|v| v.parse().ok())),
    };
    // `svg=1` forces passthrough even when SVG rasterization would otherwise be
    // attempted; this crate never rasterizes SVG, so it is always effectively set.
    let allow_svg_raster = false;
    let _ = query.svg;

    let (served_bytes, served_content_type) = {
        let mut cache = state.transforms.lock().await;
        match transform(&bytes, &content_type, params, allow_svg_raster, &mut cache, Instant::now()) {
            Some(webp_bytes) => (webp_bytes, "image/webp".to_string()),
            None => (bytes, content_type),
        }
    };

    let etag = weak_etag(&served_bytes);
    Ok((
        StatusCode::OK,
        [
            (axum::http::header::CONTENT_TYPE, served_content_type),
            (axum::http::header::ETAG, etag),
            (axum::http::header::CACHE_CONTROL, cache_control(DEFAULT_MAX_AGE_SECS)),
        ],
        served_bytes,
    )
        .into_response())
}

/// Served image errors return an SVG placeholder with the error text, unless
/// `json=1` was requested.
fn error_response(err: ResolveError, json_errors: bool, debug: bool) -> Response {
    let status = StatusCode::from_u16(err.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if json_errors {
        let body = if debug {
            json!({ "error": err.message, "kind": err.kind.as_str(), "transient": err.transient })
        } else {
            json!({ "error": err.message })
        };
        return (status, Json(body)).into_response();
    }

    let svg = placeholder_svg(&err.message);
    (status, [(axum::http::header::CONTENT_TYPE, "image/svg+xml")], svg).into_response()
}

fn placeholder_svg(message: &str) -> String {
    let escaped = message.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;");
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="512" height="512">
<rect width="512" height="512" fill="#1a1a1a"/>
<text x="50%" y="50%" fill="#ffffff" font-size="16" text-anchor="middle" dominant-baseline="middle">{escaped}</text>
</svg>"#
    )
}
