pub mod clock;
pub mod events;
pub mod payment;
pub mod retry;
pub mod wallet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Why a coupon code did not apply. Surfaced verbatim to the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponRejection {
    NotFound,
    Inactive,
    NotYetValid,
    Expired,
    BelowMinimum { minimum: Decimal },
    UsageLimitReached,
    PerUserLimitReached,
    ScopeMismatch(String),
}

impl fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CouponRejection::NotFound => write!(f, "coupon does not exist"),
            CouponRejection::Inactive => write!(f, "coupon is no longer active"),
            CouponRejection::NotYetValid => write!(f, "coupon is not valid yet"),
            CouponRejection::Expired => write!(f, "coupon has expired"),
            CouponRejection::BelowMinimum { minimum } => {
                write!(f, "order amount is below the coupon minimum of {}", minimum)
            }
            CouponRejection::UsageLimitReached => write!(f, "coupon usage limit has been reached"),
            CouponRejection::PerUserLimitReached => {
                write!(f, "you have already used this coupon the maximum number of times")
            }
            CouponRejection::ScopeMismatch(detail) => write!(f, "coupon does not apply: {}", detail),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Coupon {code} rejected: {reason}")]
    CouponRejected { code: String, reason: CouponRejection },
    #[error("Payment callback signature is invalid")]
    SignatureInvalid,
    #[error("Callback amount {received} does not match payment {payment_number} amount {expected}")]
    AmountMismatch {
        payment_number: String,
        expected: Decimal,
        received: Decimal,
    },
    #[error("Insufficient funds in wallet {wallet_id}: requested {requested}, available {available}")]
    InsufficientFunds {
        wallet_id: Uuid,
        requested: Decimal,
        available: Decimal,
    },
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),
    #[error("Upstream service unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn coupon(code: impl Into<String>, reason: CouponRejection) -> Self {
        CoreError::CouponRejected {
            code: code.into(),
            reason,
        }
    }

    /// Errors worth retrying: the remote side may recover on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::GatewayUnavailable(_) | CoreError::UpstreamUnavailable(_)
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_coupon_rejection_message() {
        let err = CoreError::coupon(
            "SPRING20",
            CouponRejection::BelowMinimum { minimum: dec!(200000) },
        );
        assert_eq!(
            err.to_string(),
            "Coupon SPRING20 rejected: order amount is below the coupon minimum of 200000"
        );
    }

    #[test]
    fn test_only_remote_failures_are_transient() {
        assert!(CoreError::GatewayUnavailable("timeout".into()).is_transient());
        assert!(CoreError::UpstreamUnavailable("catalog".into()).is_transient());
        assert!(!CoreError::SignatureInvalid.is_transient());
        assert!(!CoreError::Storage("deadlock".into()).is_transient());
    }
}
