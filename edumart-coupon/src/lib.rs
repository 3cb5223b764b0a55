pub mod models;
pub mod repository;
pub mod service;
pub mod validator;

pub use models::{AppliedCoupon, Coupon, CouponScope, CouponType, CouponUsage, NewCoupon};
pub use repository::CouponRepository;
pub use service::{CouponService, CouponTarget};
pub use validator::{CouponContext, CouponValidator};
