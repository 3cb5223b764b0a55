use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use edumart_core::wallet::{Wallet, WalletTransaction};
use edumart_order::{NewPayoutRequest, PayoutRequest};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::{instructor_auth_middleware, Claims};
use crate::orders::{checkout_context, PaymentResponse};
use crate::state::AppState;
use crate::RequestMeta;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    pub amount: Decimal,
    pub bank_code: Option<String>,
    pub locale: Option<String>,
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/wallets/me", get(my_wallet))
        .route("/v1/wallets/me/transactions", get(my_transactions))
        .route("/v1/wallets/me/top-ups", post(top_up))
        .route("/v1/wallets/me/payouts", post(request_payout).get(my_payouts))
        .route("/v1/wallets/me/payouts/{id}", get(my_payout))
        .route_layer(middleware::from_fn_with_state(state, instructor_auth_middleware))
}

/// GET /v1/wallets/me
async fn my_wallet(State(state): State<AppState>, Extension(claims): Extension<Claims>) -> Result<Json<Wallet>, AppError> {
    Ok(Json(state.wallets.instructor_wallet(claims.sub).await?))
}

/// GET /v1/wallets/me/transactions?limit=50
async fn my_transactions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<WalletTransaction>>, AppError> {
    let wallet = state.wallets.instructor_wallet(claims.sub).await?;
    let transactions = state
        .wallets
        .transactions(wallet.id, query.limit.unwrap_or(50))
        .await?;
    Ok(Json(transactions))
}

/// POST /v1/wallets/me/top-ups
/// Starts a gateway payment that credits the available balance once confirmed
async fn top_up(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    meta: RequestMeta,
    Json(req): Json<TopUpRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), AppError> {
    let ctx = checkout_context(meta, req.bank_code, req.locale);
    let payment = state.payments.start_top_up(claims.sub, req.amount, ctx).await?;
    state.metrics.payments_started.inc();
    Ok((StatusCode::CREATED, Json(PaymentResponse::from(payment))))
}

/// POST /v1/wallets/me/payouts
/// Opens a request for admin review. Nothing is debited yet.
async fn request_payout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<NewPayoutRequest>,
) -> Result<(StatusCode, Json<PayoutRequest>), AppError> {
    let payout = state.payouts.request_payout(claims.sub, req).await?;
    Ok((StatusCode::CREATED, Json(payout)))
}

/// GET /v1/wallets/me/payouts?limit=50
async fn my_payouts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<PayoutRequest>>, AppError> {
    let payouts = state
        .payouts
        .list_payouts(Some(claims.sub), query.limit.unwrap_or(50))
        .await?;
    Ok(Json(payouts))
}

/// GET /v1/wallets/me/payouts/{id}
async fn my_payout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(payout_id): Path<Uuid>,
) -> Result<Json<PayoutRequest>, AppError> {
    Ok(Json(state.payouts.payout_for_instructor(payout_id, claims.sub).await?))
}
