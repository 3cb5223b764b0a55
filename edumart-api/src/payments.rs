use axum::{
    extract::{RawQuery, State},
    routing::get,
    Json, Router,
};
use edumart_core::CoreError;
use edumart_order::CallbackOutcome;
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;

/// Body VNPay expects back from the IPN call.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct IpnResponse {
    #[serde(rename = "RspCode")]
    pub rsp_code: &'static str,
    #[serde(rename = "Message")]
    pub message: &'static str,
}

impl IpnResponse {
    fn new(rsp_code: &'static str, message: &'static str) -> Self {
        Self { rsp_code, message }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/payments/vnpay/callback", get(vnpay_callback))
}

/// GET /v1/payments/vnpay/callback
/// Signed by the gateway, not by a user token. The raw query is verified byte-for-byte.
async fn vnpay_callback(State(state): State<AppState>, RawQuery(query): RawQuery) -> Json<IpnResponse> {
    let raw = query.unwrap_or_default();

    let response = match state.payments.handle_callback(&raw).await {
        Ok(outcome) => {
            let (label, response) = match outcome {
                CallbackOutcome::Confirmed(_) => ("confirmed", IpnResponse::new("00", "Confirm Success")),
                CallbackOutcome::Failed(_) => ("failed", IpnResponse::new("00", "Confirm Success")),
                CallbackOutcome::AlreadyProcessed(_) => {
                    ("already_processed", IpnResponse::new("02", "Order already confirmed"))
                }
            };
            state.metrics.record_callback(label);
            response
        }
        Err(e) => {
            let (label, response) = match &e {
                CoreError::SignatureInvalid => ("invalid_signature", IpnResponse::new("97", "Invalid signature")),
                CoreError::NotFound { .. } => ("not_found", IpnResponse::new("01", "Order not found")),
                CoreError::AmountMismatch { .. } => ("invalid_amount", IpnResponse::new("04", "Invalid amount")),
                _ => ("error", IpnResponse::new("99", "Unknown error")),
            };
            warn!("VNPay callback rejected: {}", e);
            state.metrics.record_callback(label);
            response
        }
    };

    Json(response)
}
