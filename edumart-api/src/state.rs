use std::sync::Arc;

use edumart_catalog::CatalogClient;
use edumart_core::clock::Clock;
use edumart_core::events::EventPublisher;
use edumart_core::retry::RetryConfig;
use edumart_coupon::{CouponRepository, CouponService};
use edumart_order::repository::{
    OrderRepository, PaymentRepository, PayoutRepository, SettlementRepository, WalletRepository,
};
use edumart_order::{
    InMemoryStore, OrderManager, PaymentOrchestrator, PaymentPolicy, PayoutService, PricingEngine, SettlementEngine,
    VnPayGateway, WalletService,
};
use edumart_store::{
    Config, DbClient, RedisClient, StoreCouponRepository, StoreOrderRepository, StorePaymentRepository,
    StorePayoutRepository, StoreSettlementRepository, StoreWalletRepository,
};

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderManager>,
    pub payments: Arc<PaymentOrchestrator>,
    pub settlements: Arc<SettlementEngine>,
    pub wallets: Arc<WalletService>,
    pub payouts: Arc<PayoutService>,
    pub coupons: Arc<CouponService>,
    /// Rate limiting and worker leases. Without Redis both are skipped.
    pub redis: Option<Arc<RedisClient>>,
    pub rate_limit_per_minute: i64,
    pub auth: AuthConfig,
    pub metrics: Arc<Metrics>,
}

/// Storage behind the services, either all Postgres or all in-process.
pub struct Repositories {
    pub orders: Arc<dyn OrderRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub wallets: Arc<dyn WalletRepository>,
    pub settlements: Arc<dyn SettlementRepository>,
    pub payouts: Arc<dyn PayoutRepository>,
    pub coupons: Arc<dyn CouponRepository>,
}

impl Repositories {
    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            orders: store.clone(),
            payments: store.clone(),
            wallets: store.clone(),
            settlements: store.clone(),
            payouts: store.clone(),
            coupons: store,
        }
    }

    pub fn postgres(db: &DbClient) -> Self {
        Self {
            orders: Arc::new(StoreOrderRepository::new(db.pool.clone())),
            payments: Arc::new(StorePaymentRepository::new(db.pool.clone())),
            wallets: Arc::new(StoreWalletRepository::new(db.pool.clone())),
            settlements: Arc::new(StoreSettlementRepository::new(db.pool.clone())),
            payouts: Arc::new(StorePayoutRepository::new(db.pool.clone())),
            coupons: Arc::new(StoreCouponRepository::new(db.pool.clone())),
        }
    }
}

impl AppState {
    /// Wires the sale services from configuration.
    pub fn build(
        config: &Config,
        repos: Repositories,
        catalog: Arc<dyn CatalogClient>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        redis: Option<Arc<RedisClient>>,
    ) -> Result<Self, prometheus::Error> {
        let currency = config.business_rules.currency.clone();

        let coupons = Arc::new(CouponService::new(repos.coupons, clock.clone()));
        let pricing = Arc::new(PricingEngine::new(
            config.business_rules.clone(),
            catalog,
            coupons.clone(),
        ));
        let orders = Arc::new(OrderManager::new(
            repos.orders.clone(),
            pricing,
            publisher.clone(),
            clock.clone(),
        ));
        let payments = Arc::new(PaymentOrchestrator::new(
            repos.payments,
            repos.orders.clone(),
            repos.wallets.clone(),
            Arc::new(VnPayGateway::new(config.payment.vnpay.clone())),
            publisher.clone(),
            clock.clone(),
            PaymentPolicy {
                expiry_minutes: config.payment.expiry_minutes,
                currency: currency.clone(),
                retry: RetryConfig::default(),
            },
        ));
        let settlements = Arc::new(SettlementEngine::new(
            repos.orders,
            repos.settlements,
            publisher,
            clock.clone(),
            config.settlement.policy(),
        ));
        let payouts = Arc::new(PayoutService::new(repos.payouts, repos.wallets.clone(), clock, &currency));
        let wallets = Arc::new(WalletService::new(repos.wallets, &currency));

        Ok(Self {
            orders,
            payments,
            settlements,
            wallets,
            payouts,
            coupons,
            redis,
            rate_limit_per_minute: config.server.rate_limit_per_minute,
            auth: AuthConfig {
                secret: config.auth.jwt_secret.clone(),
                expiration: config.auth.jwt_expiration_seconds,
            },
            metrics: Arc::new(Metrics::new()?),
        })
    }
}
