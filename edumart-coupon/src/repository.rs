use async_trait::async_trait;
use edumart_core::CoreResult;
use uuid::Uuid;

use crate::models::{Coupon, CouponUsage};

/// Coupon reads and administrative writes. Usage recording is not here: it only happens inside
/// the payment-confirmation transaction owned by the payment repository.
#[async_trait]
pub trait CouponRepository: Send + Sync {
    /// Fails with `Conflict` when the normalized code is taken.
    async fn insert_coupon(&self, coupon: &Coupon) -> CoreResult<()>;

    /// `code` is already normalized.
    async fn find_by_code(&self, code: &str) -> CoreResult<Option<Coupon>>;

    async fn find_coupon(&self, coupon_id: Uuid) -> CoreResult<Option<Coupon>>;

    async fn count_user_usages(&self, coupon_id: Uuid, user_id: Uuid) -> CoreResult<i64>;

    async fn usages_for_order(&self, order_id: Uuid) -> CoreResult<Vec<CouponUsage>>;

    async fn set_active(&self, coupon_id: Uuid, active: bool) -> CoreResult<()>;
}
