//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{format_money, LedgerRecord, OperationContext, OwnerId, Source};
use crate::error::{AppError, AppResult};
use crate::processor::{ApplyCommand, ApplyStatus, TransactionProcessor};
use crate::store::Store;

/// Header naming the submitting channel
pub const SOURCE_TYPE_HEADER: &str = "source-type";

const DEFAULT_LIMIT: i64 = 10;
const MAX_LIMIT: i64 = 100;

// =========================================================================
// State
// =========================================================================

/// Shared handler state
pub struct AppState<S: Store> {
    pub processor: TransactionProcessor<S>,
}

impl<S: Store> AppState<S> {
    pub fn new(processor: TransactionProcessor<S>) -> Self {
        Self { processor }
    }
}

impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            processor: self.processor.clone(),
        }
    }
}

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct ApplyQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApplyRequest {
    /// "win" or "lost"
    pub state: String,
    /// Decimal string, e.g. "10.15"
    pub amount: String,
    pub transaction_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApplyResponse {
    pub status: ApplyStatus,
    pub balance: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub user_id: OwnerId,
    pub balance: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub offset: Option<String>,
}

impl ListQuery {
    /// Limit clamped to 1..=100; unparseable values fall back to the default
    pub fn limit(&self) -> i64 {
        self.limit
            .as_deref()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(DEFAULT_LIMIT)
            .clamp(1, MAX_LIMIT)
    }

    /// Offset, never negative
    pub fn offset(&self) -> i64 {
        self.offset
            .as_deref()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(0)
            .max(0)
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionListResponse {
    pub transactions: Vec<LedgerRecord>,
    /// Number of records in this page
    pub total: usize,
    pub limit: i64,
    pub offset: i64,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router<S: Store>() -> Router<AppState<S>> {
    Router::new()
        .route("/transactions", post(apply_transaction::<S>))
        .route("/transactions/user/:user_id", get(list_user_transactions::<S>))
        .route("/users/:user_id/balance", get(get_user_balance::<S>))
}

fn parse_owner_id(raw: &str) -> Option<OwnerId> {
    raw.trim().parse::<OwnerId>().ok()
}

fn context_or_default(context: Option<Extension<OperationContext>>) -> OperationContext {
    context.map(|Extension(ctx)| ctx).unwrap_or_default()
}

// =========================================================================
// POST /transactions
// =========================================================================

/// Apply a win/lost event
async fn apply_transaction<S: Store>(
    State(state): State<AppState<S>>,
    context: Option<Extension<OperationContext>>,
    headers: HeaderMap,
    Query(query): Query<ApplyQuery>,
    body: Result<Json<ApplyRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ApplyResponse>)> {
    let source_header = headers
        .get(SOURCE_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let source: Source = source_header.parse()?;

    let raw_user_id = query
        .user_id
        .ok_or_else(|| AppError::InvalidRequest("user_id query parameter is required".into()))?;
    let owner_id = parse_owner_id(&raw_user_id)
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::InvalidRequest("user_id must be a positive integer".into()))?;

    let Json(request) = body.map_err(|e| AppError::InvalidRequest(e.body_text()))?;

    let command = ApplyCommand::new(request.transaction_id, owner_id, request.state, request.amount)
        .with_source(source);

    let context = context_or_default(context);
    let outcome = state.processor.apply(command, &context).await?;

    let (status_code, message) = match outcome.status {
        ApplyStatus::Success => (StatusCode::CREATED, "Transaction processed successfully"),
        ApplyStatus::AlreadyApplied => (StatusCode::OK, "Transaction already processed"),
    };

    Ok((
        status_code,
        Json(ApplyResponse {
            status: outcome.status,
            balance: format_money(outcome.balance),
            message: message.to_string(),
        }),
    ))
}

// =========================================================================
// GET /users/:user_id/balance
// =========================================================================

/// Get user balance
async fn get_user_balance<S: Store>(
    State(state): State<AppState<S>>,
    Path(raw_user_id): Path<String>,
) -> AppResult<Json<BalanceResponse>> {
    let user_id =
        parse_owner_id(&raw_user_id).ok_or_else(|| AppError::UserNotFound(raw_user_id.clone()))?;

    let balance = state.processor.get_balance(user_id).await?;

    Ok(Json(BalanceResponse {
        user_id,
        balance: format_money(balance),
    }))
}

// =========================================================================
// GET /transactions/user/:user_id
// =========================================================================

/// List a user's transactions, newest first
async fn list_user_transactions<S: Store>(
    State(state): State<AppState<S>>,
    Path(raw_user_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<TransactionListResponse>> {
    let user_id =
        parse_owner_id(&raw_user_id).ok_or_else(|| AppError::UserNotFound(raw_user_id.clone()))?;

    let limit = query.limit();
    let offset = query.offset();

    let transactions = state
        .processor
        .list_by_owner(user_id, limit, offset)
        .await?;

    Ok(Json(TransactionListResponse {
        total: transactions.len(),
        transactions,
        limit,
        offset,
    }))
}
