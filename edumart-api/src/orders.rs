use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use edumart_core::payment::Payment;
use edumart_order::{CheckoutContext, CheckoutLine, CheckoutRequest, ClientContext, Order, PriceBreakdown};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::{user_auth_middleware, Claims};
use crate::state::AppState;
use crate::RequestMeta;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<CheckoutLine>,
    pub system_coupon_code: Option<String>,
    pub notes: Option<String>,
}

impl CreateOrderRequest {
    fn checkout(&self) -> CheckoutRequest {
        CheckoutRequest {
            items: self.items.clone(),
            system_coupon_code: self.system_coupon_code.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PayOrderRequest {
    pub bank_code: Option<String>,
    pub locale: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub payment_id: Uuid,
    pub payment_number: String,
    pub status: String,
    pub amount: rust_decimal::Decimal,
    pub currency: String,
    pub payment_url: Option<String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub paid_at: Option<chrono::DateTime<chrono::Utc>>,
    pub failure_reason: Option<String>,
}

impl From<Payment> for PaymentResponse {
    fn from(p: Payment) -> Self {
        Self {
            payment_id: p.id,
            payment_number: p.payment_number,
            status: p.status.as_str().to_string(),
            amount: p.amount,
            currency: p.currency,
            payment_url: p.redirect_url,
            expires_at: p.expires_at,
            paid_at: p.paid_at,
            failure_reason: p.failure_reason,
        }
    }
}

pub(crate) fn checkout_context(meta: RequestMeta, bank_code: Option<String>, locale: Option<String>) -> CheckoutContext {
    CheckoutContext {
        client_ip: meta.client_ip,
        origin: meta.origin,
        referer: meta.referer,
        bank_code,
        locale,
    }
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/orders", post(create_order).get(list_orders))
        .route("/v1/orders/preview", post(preview_order))
        .route("/v1/orders/{id}", get(get_order))
        .route("/v1/orders/{id}/cancel", post(cancel_order))
        .route("/v1/orders/{id}/payments", post(pay_order))
        .route("/v1/payments/{id}", get(get_payment))
        .route_layer(middleware::from_fn_with_state(state, user_auth_middleware))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/orders/preview
/// Price a cart without creating anything
async fn preview_order(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<PriceBreakdown>, AppError> {
    Ok(Json(state.orders.preview(claims.sub, &req).await?))
}

/// POST /v1/orders
async fn create_order(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    meta: RequestMeta,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let client = ClientContext {
        ip_address: Some(meta.client_ip),
        user_agent: meta.user_agent,
        notes: req.notes.clone(),
    };

    let order = state.orders.create_order(claims.sub, &req.checkout(), client).await?;
    state.metrics.orders_created.inc();

    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /v1/orders
async fn list_orders(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.orders.list_orders(claims.sub).await?))
}

/// GET /v1/orders/{id}
async fn get_order(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.get_order_for_user(order_id, claims.sub).await?))
}

/// POST /v1/orders/{id}/cancel
async fn cancel_order(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.cancel_order(order_id, claims.sub).await?))
}

/// POST /v1/orders/{id}/payments
/// Start (or resume) the gateway payment and hand back the redirect URL
async fn pay_order(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(order_id): Path<Uuid>,
    meta: RequestMeta,
    Json(req): Json<PayOrderRequest>,
) -> Result<Json<PaymentResponse>, AppError> {
    let ctx = checkout_context(meta, req.bank_code, req.locale);

    let payment = state.payments.process_payment(order_id, claims.sub, ctx).await?;
    state.metrics.payments_started.inc();

    Ok(Json(PaymentResponse::from(payment)))
}

/// GET /v1/payments/{id}
async fn get_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentResponse>, AppError> {
    let payment = state.payments.payment_for_user(payment_id, claims.sub).await?;
    Ok(Json(PaymentResponse::from(payment)))
}
