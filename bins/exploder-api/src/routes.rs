use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use exploder_core::error::{ExplorerError, ValidationError};
use exploder_core::pagination::parse_limit;
use exploder_core::types::{BlockRecord, SearchResult, SyncHistoryRecord, UnspentOutput};
use exploder_index::query::{AddressView, BlockDetail, Confirmations, NetworkInfo, QueryEngine, TransactionDetail};
use exploder_index::sync::ClientInfo;

use crate::upstream::{sample_hashrates, HashrateSample};
use crate::AppState;

// ── Error helper ─────────────────────────────────────────────────────────────

struct ApiError(ExplorerError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            ExplorerError::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ExplorerError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            other => {
                error!(error = %other, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<ExplorerError> for ApiError {
    fn from(e: ExplorerError) -> Self {
        ApiError(e)
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError(e.into())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Run a query on the blocking pool; index reads hit RocksDB.
async fn read<T, F>(s: &AppState, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&QueryEngine) -> Result<T, ExplorerError> + Send + 'static,
{
    let query = Arc::clone(&s.query);
    let value = tokio::task::spawn_blocking(move || f(&query))
        .await
        .map_err(|e| ExplorerError::Storage(format!("query task failed: {e}")))??;
    Ok(Json(value))
}

// ── Router ───────────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/blocks", get(block_by_height))
        .route("/api/blocks/latest", get(latest_blocks))
        .route("/api/blocks/:hash", get(block_by_hash))
        .route("/api/blocks/:hash/confirmations", get(block_confirmations))
        .route("/api/transactions", get(transactions_by_block))
        .route("/api/transactions/latest", get(latest_transactions))
        .route("/api/transactions/:txid", get(transaction))
        .route("/api/transactions/:txid/confirmations", get(transaction_confirmations))
        .route("/api/addresses/:address", get(address))
        .route("/api/addresses/:address/unspent", get(unspent))
        .route("/api/addresses/:address/volume", get(volume))
        .route("/api/addresses/:address/balance", get(balance))
        .route("/api/addresses/:address/transaction-count", get(transaction_count))
        .route("/api/network/hashrates", get(hashrates))
        .route("/api/network/info", get(network_info))
        .route("/api/network/price", get(price))
        .route("/api/client/sync_history", get(sync_history))
        .route("/api/client/info", get(client_info))
        .route("/api/search/:query", get(search))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// Numeric parameters stay strings so the query engine can reject
// negative and overflowing values itself.

#[derive(Deserialize)]
struct PageParams {
    limit: Option<String>,
    offset: Option<String>,
}

#[derive(Deserialize)]
struct HeightParams {
    height: Option<String>,
}

#[derive(Deserialize)]
struct BlockhashParams {
    blockhash: Option<String>,
}

#[derive(Deserialize)]
struct StartParams {
    start: Option<String>,
}

#[derive(Deserialize)]
struct UnspentParams {
    start: Option<String>,
    limit: Option<String>,
}

#[derive(Deserialize)]
struct LimitParams {
    limit: Option<String>,
}

// ── /api/blocks ──────────────────────────────────────────────────────────────

async fn latest_blocks(State(s): State<AppState>, Query(q): Query<PageParams>) -> ApiResult<Vec<BlockRecord>> {
    read(&s, move |query| query.latest_blocks(q.limit.as_deref(), q.offset.as_deref())).await
}

async fn block_by_height(State(s): State<AppState>, Query(q): Query<HeightParams>) -> ApiResult<BlockDetail> {
    let height = q.height.ok_or(ValidationError::Missing { field: "height" })?;
    read(&s, move |query| query.block_by_height(&height)).await
}

async fn block_by_hash(State(s): State<AppState>, Path(hash): Path<String>) -> ApiResult<BlockDetail> {
    read(&s, move |query| query.block_by_hash(&hash)).await
}

async fn block_confirmations(State(s): State<AppState>, Path(hash): Path<String>) -> ApiResult<Confirmations> {
    read(&s, move |query| query.block_confirmations(&hash)).await
}

// ── /api/transactions ────────────────────────────────────────────────────────

async fn latest_transactions(
    State(s): State<AppState>,
    Query(q): Query<PageParams>,
) -> ApiResult<Vec<TransactionDetail>> {
    read(&s, move |query| query.latest_transactions(q.limit.as_deref(), q.offset.as_deref())).await
}

async fn transactions_by_block(
    State(s): State<AppState>,
    Query(q): Query<BlockhashParams>,
) -> ApiResult<Vec<TransactionDetail>> {
    let hash = q.blockhash.ok_or(ValidationError::Missing { field: "blockhash" })?;
    read(&s, move |query| query.transactions_by_block(&hash)).await
}

async fn transaction(State(s): State<AppState>, Path(txid): Path<String>) -> ApiResult<TransactionDetail> {
    read(&s, move |query| query.transaction(&txid)).await
}

async fn transaction_confirmations(
    State(s): State<AppState>,
    Path(txid): Path<String>,
) -> ApiResult<Confirmations> {
    read(&s, move |query| query.transaction_confirmations(&txid)).await
}

// ── /api/addresses/:address ──────────────────────────────────────────────────

async fn address(
    State(s): State<AppState>,
    Path(address): Path<String>,
    Query(q): Query<StartParams>,
) -> ApiResult<AddressView> {
    read(&s, move |query| query.address(&address, q.start.as_deref())).await
}

async fn unspent(
    State(s): State<AppState>,
    Path(address): Path<String>,
    Query(q): Query<UnspentParams>,
) -> ApiResult<Vec<UnspentOutput>> {
    read(&s, move |query| query.unspent(&address, q.start.as_deref(), q.limit.as_deref())).await
}

async fn volume(State(s): State<AppState>, Path(address): Path<String>) -> ApiResult<u64> {
    read(&s, move |query| query.volume(&address)).await
}

async fn balance(State(s): State<AppState>, Path(address): Path<String>) -> ApiResult<u64> {
    read(&s, move |query| query.balance(&address)).await
}

async fn transaction_count(State(s): State<AppState>, Path(address): Path<String>) -> ApiResult<u64> {
    read(&s, move |query| query.transaction_count(&address)).await
}

// ── /api/network ─────────────────────────────────────────────────────────────

async fn hashrates(State(s): State<AppState>, Query(q): Query<LimitParams>) -> ApiResult<Vec<HashrateSample>> {
    let limit = parse_limit(q.limit.as_deref(), s.query.page_limits())?;
    Ok(Json(sample_hashrates(s.hashrates.as_ref(), limit).await?))
}

async fn network_info(State(s): State<AppState>) -> ApiResult<NetworkInfo> {
    read(&s, |query| query.network_info()).await
}

async fn price(State(s): State<AppState>) -> ApiResult<Value> {
    match &s.price {
        Some(feed) => Ok(Json(feed.current().await?)),
        None => Ok(Json(json!({}))),
    }
}

// ── /api/client ──────────────────────────────────────────────────────────────

async fn sync_history(
    State(s): State<AppState>,
    Query(q): Query<PageParams>,
) -> ApiResult<Vec<SyncHistoryRecord>> {
    read(&s, move |query| query.sync_history(q.limit.as_deref(), q.offset.as_deref())).await
}

async fn client_info(State(s): State<AppState>) -> ApiResult<ClientInfo> {
    read(&s, |query| query.client_info()).await
}

// ── /api/search/:query ───────────────────────────────────────────────────────

async fn search(State(s): State<AppState>, Path(q): Path<String>) -> ApiResult<SearchResult> {
    read(&s, move |query| query.search(&q)).await
}
