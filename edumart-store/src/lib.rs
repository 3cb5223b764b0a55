pub mod app_config;
pub mod coupon_repo;
pub mod database;
#[cfg(feature = "kafka")]
pub mod events;
pub mod order_repo;
pub mod payment_repo;
pub mod payout_repo;
pub mod redis_repo;
pub mod settlement_repo;
pub mod wallet_repo;

pub use app_config::Config;
pub use coupon_repo::StoreCouponRepository;
pub use database::DbClient;
#[cfg(feature = "kafka")]
pub use events::EventProducer;
pub use order_repo::StoreOrderRepository;
pub use payment_repo::StorePaymentRepository;
pub use payout_repo::StorePayoutRepository;
pub use redis_repo::RedisClient;
pub use settlement_repo::StoreSettlementRepository;
pub use wallet_repo::StoreWalletRepository;
