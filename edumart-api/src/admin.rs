use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use edumart_core::payment::Payment;
use edumart_core::wallet::{Wallet, WalletTransaction};
use edumart_coupon::{Coupon, NewCoupon};
use edumart_order::repository::{SettlementOutcome, SettlementRecord};
use edumart_order::{Order, PayoutRequest, SweepReport};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::{admin_auth_middleware, Claims};
use crate::state::AppState;
use crate::wallets::PageQuery;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct PayoutApproval {
    pub payout: PayoutRequest,
    pub transaction: WalletTransaction,
}

#[derive(Debug, Serialize)]
pub struct SettleResponse {
    pub order_id: Uuid,
    pub status: &'static str,
    pub settlement: Option<SettlementRecord>,
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/admin/settlements/run", post(run_settlements))
        .route("/v1/admin/orders/{id}/settle", post(force_settle))
        .route("/v1/admin/orders/{id}/refund", post(refund_order))
        .route("/v1/admin/orders/{id}/payments", get(order_payments))
        .route("/v1/admin/wallets/platform", get(platform_wallet))
        .route("/v1/admin/payouts", get(list_payouts))
        .route("/v1/admin/payouts/{id}", get(get_payout))
        .route("/v1/admin/payouts/{id}/approve", post(approve_payout))
        .route("/v1/admin/payouts/{id}/reject", post(reject_payout))
        .route("/v1/admin/coupons", post(create_coupon))
        .route("/v1/admin/coupons/by-code/{code}", get(get_coupon))
        .route("/v1/admin/coupons/{id}/deactivate", post(deactivate_coupon))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}

// ============================================================================
// Settlement
// ============================================================================

/// POST /v1/admin/settlements/run
/// Same sweep the background worker runs, on demand
async fn run_settlements(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    let report = state.settlements.process_pending_settlements().await?;
    state.metrics.orders_settled.inc_by(report.settled as u64);
    state.metrics.settlement_failures.inc_by(report.failures.len() as u64);
    Ok(Json(report))
}

/// POST /v1/admin/orders/{id}/settle
/// Settle inside the hold period. Audited with the admin's id and the given reason.
async fn force_settle(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<SettleResponse>, AppError> {
    let operator = claims.sub.to_string();
    let response = match state.settlements.force_settle(order_id, &operator, &req.reason).await? {
        SettlementOutcome::Settled(record) => {
            state.metrics.orders_settled.inc();
            SettleResponse {
                order_id,
                status: "SETTLED",
                settlement: Some(record),
            }
        }
        SettlementOutcome::AlreadySettled => SettleResponse {
            order_id,
            status: "ALREADY_SETTLED",
            settlement: None,
        },
        SettlementOutcome::NotEligible(why) => {
            return Err(AppError::ConflictError(format!("Order {} cannot be settled: {}", order_id, why)));
        }
    };
    Ok(Json(response))
}

/// POST /v1/admin/orders/{id}/refund
async fn refund_order(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<Order>, AppError> {
    let operator = claims.sub.to_string();
    Ok(Json(state.orders.refund_order(order_id, &operator, &req.reason).await?))
}

/// GET /v1/admin/orders/{id}/payments
async fn order_payments(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Vec<Payment>>, AppError> {
    state.orders.get_order(order_id).await?;
    Ok(Json(state.payments.payments_for_order(order_id).await?))
}

/// GET /v1/admin/wallets/platform
async fn platform_wallet(State(state): State<AppState>) -> Result<Json<Wallet>, AppError> {
    Ok(Json(state.wallets.platform_wallet().await?))
}

// ============================================================================
// Payouts
// ============================================================================

/// GET /v1/admin/payouts?limit=50
async fn list_payouts(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<PayoutRequest>>, AppError> {
    Ok(Json(state.payouts.list_payouts(None, query.limit.unwrap_or(50)).await?))
}

/// GET /v1/admin/payouts/{id}
async fn get_payout(State(state): State<AppState>, Path(payout_id): Path<Uuid>) -> Result<Json<PayoutRequest>, AppError> {
    Ok(Json(state.payouts.get_payout(payout_id).await?))
}

/// POST /v1/admin/payouts/{id}/approve
/// Debits the instructor's available balance and completes the request, or does neither.
async fn approve_payout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(payout_id): Path<Uuid>,
) -> Result<Json<PayoutApproval>, AppError> {
    let (payout, transaction) = state.payouts.approve(payout_id, claims.sub).await?;
    Ok(Json(PayoutApproval { payout, transaction }))
}

/// POST /v1/admin/payouts/{id}/reject
async fn reject_payout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(payout_id): Path<Uuid>,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<PayoutRequest>, AppError> {
    Ok(Json(state.payouts.reject(payout_id, claims.sub, &req.reason).await?))
}

// ============================================================================
// Coupons
// ============================================================================

/// POST /v1/admin/coupons
async fn create_coupon(
    State(state): State<AppState>,
    Json(req): Json<NewCoupon>,
) -> Result<(StatusCode, Json<Coupon>), AppError> {
    let coupon = state.coupons.create_coupon(req).await?;
    Ok((StatusCode::CREATED, Json(coupon)))
}

/// GET /v1/admin/coupons/by-code/{code}
async fn get_coupon(State(state): State<AppState>, Path(code): Path<String>) -> Result<Json<Coupon>, AppError> {
    Ok(Json(state.coupons.get_by_code(&code).await?))
}

/// POST /v1/admin/coupons/{id}/deactivate
async fn deactivate_coupon(State(state): State<AppState>, Path(coupon_id): Path<Uuid>) -> Result<StatusCode, AppError> {
    state.coupons.deactivate(coupon_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
