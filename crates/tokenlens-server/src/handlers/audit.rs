use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use tokenlens_core::{audit_token, AuditRecord, ChainId, ResolveError};

use crate::error::ApiError;
use crate::wallet::WalletItem;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(rename = "rpcUrl")]
    pub rpc_url: Option<String>,
    pub refresh: Option<u8>,
}

/// `GET /{chain}/{contract}/{tokenId}/audit` — single-token health audit.
pub async fn audit_single(
    State(state): State<Arc<AppState>>,
    Path((chain, contract, token_id)): Path<(String, String, String)>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditRecord>, ApiError> {
    let debug = state.config.dev_mode;
    let chain = ChainId::parse(&chain).map_err(|e| ApiError::new(e, debug))?;
    let skip_cache = query.refresh.unwrap_or(0) == 1;

    let mut rpc = state.rpc.lock().await;
    let mut metadata = state.metadata.lock().await;
    let record = audit_token(
        &mut rpc,
        &mut metadata,
        &state.pins,
        &state.http,
        chain,
        &contract,
        &token_id,
        query.rpc_url.as_deref(),
        skip_cache,
    )
    .await;

    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct WalletAuditRequest {
    pub chain: String,
    pub wallet: String,
    #[serde(default, rename = "pageKey")]
    pub page_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WalletAuditItem {
    pub contract: String,
    #[serde(rename = "tokenId")]
    pub token_id: String,
    pub title: Option<String>,
    pub collection: Option<String>,
    #[serde(rename = "thumbnailUrl")]
    pub thumbnail_url: Option<String>,
    pub audit: AuditRecord,
}

#[derive(Debug, Serialize)]
pub struct WalletAuditResponse {
    pub items: Vec<WalletAuditItem>,
    #[serde(rename = "nextPageKey")]
    pub next_page_key: Option<String>,
}

/// `POST /audit/wallet` — fetches one page of a wallet's tokens via the wallet
/// adapter and audits each with bounded parallelism (a small semaphore limit,
/// configurable, rather than one task per item).
pub async fn audit_wallet(State(state): State<Arc<AppState>>, Json(request): Json<WalletAuditRequest>) -> Result<Response, ApiError> {
    let debug = state.config.dev_mode;
    let chain = ChainId::parse(&request.chain).map_err(|e| ApiError::new(e, debug))?;

    if !state.wallet.is_available() {
        return Err(ApiError::new(
            ResolveError::unknown("wallet adapter unavailable: ALCHEMY_API_KEY not set"),
            debug,
        ));
    }

    let page = state
        .wallet
        .list_tokens(chain, &request.wallet, request.page_key.as_deref())
        .await
        .map_err(|e| ApiError::new(e, debug))?;

    let semaphore = Arc::new(Semaphore::new(state.config.audit_concurrency.max(1)));

    let tasks = page.items.into_iter().map(|item: WalletItem| {
        let state = state.clone();
        let semaphore = semaphore.clone();
        async move {
            let _permit = semaphore.acquire_owned().await.expect("audit semaphore is never closed");
            let audit = {
                let mut rpc = state.rpc.lock().await;
                let mut metadata = state.metadata.lock().await;
                audit_token(&mut rpc, &mut metadata, &state.pins, &state.http, item.chain, &item.contract, &item.token_id, None, false).await
            };
            WalletAuditItem {
                contract: item.contract,
                token_id: item.token_id,
                title: item.title,
                collection: item.collection,
                thumbnail_url: item.thumbnail_url,
                audit,
            }
        }
    });

    let items = join_all(tasks).await;

    Ok((StatusCode::OK, Json(WalletAuditResponse { items, next_page_key: page.next_page_key })).into_response())
}
