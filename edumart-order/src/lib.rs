pub mod finance;
pub mod gateway;
pub mod manager;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod payout;
pub mod pricing;
pub mod repository;
pub mod settlement;
pub mod wallet;

pub use gateway::{VnPayGateway, VnPaySettings};
pub use manager::OrderManager;
pub use memory::InMemoryStore;
pub use models::{ClientContext, Order, OrderItem, OrderStatus};
pub use orchestrator::{CallbackOutcome, CheckoutContext, PaymentOrchestrator, PaymentPolicy};
pub use payout::{NewPayoutRequest, PayoutRequest, PayoutService, PayoutStatus};
pub use pricing::{CheckoutLine, CheckoutRequest, PriceBreakdown, PricingConfig, PricingEngine};
pub use settlement::{SettlementEngine, SettlementPolicy, SweepReport};
pub use wallet::WalletService;

use edumart_core::events::EventPublisher;
use edumart_shared::SaleEvent;
use tracing::error;

/// Events go out after the owning transaction has committed. A publish failure is logged and
/// never undoes the write.
pub(crate) async fn publish_or_log(publisher: &dyn EventPublisher, event: &SaleEvent) {
    if let Err(e) = publisher.publish(event).await {
        error!("Failed to publish {}: {}", event.topic(), e);
    }
}
