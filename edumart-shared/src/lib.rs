pub mod models;
pub mod money;
pub mod pii;

pub use models::events::{
    OrderRefundedEvent, OrderSettledEvent, PaymentConfirmedEvent, PaymentFailedEvent, SaleEvent,
    WalletToppedUpEvent,
};
