use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::DepositStatus;
use crate::error::AppError;
use crate::money::Amount;
use crate::services::deposits::DEFAULT_PAGE_SIZE;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateDepositRequest {
    pub user_id: Uuid,
    pub amount: Amount,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub operator_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ManualConfirmRequest {
    pub amount: Amount,
    pub tx_hash: String,
    pub operator_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct FailuresQuery {
    pub limit: Option<i64>,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

pub async fn create_deposit(
    State(state): State<AppState>,
    payload: Result<Json<CreateDepositRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = body(payload)?;
    let ticket = state
        .deposits
        .create_deposit(request.user_id, request.amount)
        .await?;

    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn list_deposits(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<DepositStatus>)
        .transpose()
        .map_err(AppError::Validation)?;

    let deposits = state
        .deposits
        .list_all(
            status,
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            query.offset.unwrap_or(0),
        )
        .await?;

    Ok(Json(deposits))
}

pub async fn list_pending(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let deposits = state
        .deposits
        .list_pending(
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            query.offset.unwrap_or(0),
        )
        .await?;

    Ok(Json(deposits))
}

pub async fn cancel_deposit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.deposits.cancel_deposit(id).await?))
}

pub async fn reject_deposit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<RejectRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = body(payload)?;
    Ok(Json(state.deposits.reject_deposit(id, &request.operator_id).await?))
}

pub async fn manual_confirm(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<ManualConfirmRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = body(payload)?;
    let deposit = state
        .deposits
        .manual_confirm(id, request.amount, &request.tx_hash, &request.operator_id)
        .await?;

    Ok(Json(deposit))
}

pub async fn list_reconciliation_failures(
    State(state): State<AppState>,
    Query(query): Query<FailuresQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 1000);
    Ok(Json(state.failures.list_open(limit).await?))
}
