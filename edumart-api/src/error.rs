use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use edumart_core::{CoreError, CouponRejection};
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    CouponRejected { code: String, reason: CouponRejection },
    NotFoundError(String),
    ConflictError(String),
    /// Well-formed request the current balances cannot honour.
    UnprocessableError(String),
    ServiceUnavailable(String),
    InternalServerError(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::AuthenticationError(_) => StatusCode::UNAUTHORIZED,
            AppError::AuthorizationError(_) => StatusCode::FORBIDDEN,
            AppError::ValidationError(_) | AppError::CouponRejected { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFoundError(_) => StatusCode::NOT_FOUND,
            AppError::ConflictError(_) => StatusCode::CONFLICT,
            AppError::UnprocessableError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            AppError::CouponRejected { code, reason } => json!({
                "error": format!("Coupon {} rejected: {}", code, reason),
                "code": code,
                "reason": reason,
            }),
            AppError::ServiceUnavailable(msg) => {
                tracing::warn!("Dependency unavailable: {}", msg);
                json!({ "error": "Service temporarily unavailable" })
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                json!({ "error": "Internal Server Error" })
            }
            AppError::AuthenticationError(msg)
            | AppError::AuthorizationError(msg)
            | AppError::ValidationError(msg)
            | AppError::NotFoundError(msg)
            | AppError::ConflictError(msg)
            | AppError::UnprocessableError(msg) => json!({ "error": msg }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValidationError(_) | CoreError::SignatureInvalid | CoreError::AmountMismatch { .. } => {
                AppError::ValidationError(err.to_string())
            }
            CoreError::CouponRejected { code, reason } => AppError::CouponRejected { code, reason },
            CoreError::NotFound { .. } => AppError::NotFoundError(err.to_string()),
            CoreError::Conflict(msg) => AppError::ConflictError(msg),
            CoreError::InsufficientFunds { .. } => AppError::UnprocessableError(err.to_string()),
            CoreError::GatewayUnavailable(_) | CoreError::UpstreamUnavailable(_) => {
                AppError::ServiceUnavailable(err.to_string())
            }
            CoreError::Storage(_) | CoreError::InternalError(_) => AppError::InternalServerError(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn test_core_errors_map_to_http_status() {
        let cases = vec![
            (CoreError::ValidationError("bad".into()), StatusCode::BAD_REQUEST),
            (CoreError::SignatureInvalid, StatusCode::BAD_REQUEST),
            (
                CoreError::AmountMismatch {
                    payment_number: "PAY-1".into(),
                    expected: dec!(100000),
                    received: dec!(1000),
                },
                StatusCode::BAD_REQUEST,
            ),
            (CoreError::coupon("X", CouponRejection::Expired), StatusCode::BAD_REQUEST),
            (CoreError::not_found("Order", Uuid::nil()), StatusCode::NOT_FOUND),
            (CoreError::Conflict("paid".into()), StatusCode::CONFLICT),
            (
                CoreError::InsufficientFunds {
                    wallet_id: Uuid::nil(),
                    requested: dec!(10),
                    available: dec!(5),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (CoreError::GatewayUnavailable("down".into()), StatusCode::SERVICE_UNAVAILABLE),
            (CoreError::UpstreamUnavailable("catalog".into()), StatusCode::SERVICE_UNAVAILABLE),
            (CoreError::Storage("pool".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (CoreError::InternalError("bug".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let response = AppError::from(CoreError::Storage("connection refused".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
