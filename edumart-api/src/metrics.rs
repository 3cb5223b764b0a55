use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Sale counters exposed on `/metrics`. Each instance owns its registry so tests can build as
/// many app states as they like.
pub struct Metrics {
    registry: Registry,
    pub orders_created: IntCounter,
    pub payments_started: IntCounter,
    pub payment_callbacks: IntCounterVec,
    pub orders_settled: IntCounter,
    pub settlement_failures: IntCounter,
    pub payments_expired: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let orders_created = IntCounter::new("edumart_orders_created_total", "Orders created at checkout")?;
        let payments_started = IntCounter::new("edumart_payments_started_total", "Gateway payments started")?;
        let payment_callbacks = IntCounterVec::new(
            Opts::new("edumart_payment_callbacks_total", "Gateway callbacks by outcome"),
            &["outcome"],
        )?;
        let orders_settled = IntCounter::new("edumart_orders_settled_total", "Orders released from the hold period")?;
        let settlement_failures =
            IntCounter::new("edumart_settlement_failures_total", "Orders a settlement sweep could not settle")?;
        let payments_expired = IntCounter::new("edumart_payments_expired_total", "Payments expired by the sweep")?;

        registry.register(Box::new(orders_created.clone()))?;
        registry.register(Box::new(payments_started.clone()))?;
        registry.register(Box::new(payment_callbacks.clone()))?;
        registry.register(Box::new(orders_settled.clone()))?;
        registry.register(Box::new(settlement_failures.clone()))?;
        registry.register(Box::new(payments_expired.clone()))?;

        Ok(Self {
            registry,
            orders_created,
            payments_started,
            payment_callbacks,
            orders_settled,
            settlement_failures,
            payments_expired,
        })
    }

    pub fn record_callback(&self, outcome: &str) {
        self.payment_callbacks.with_label_values(&[outcome]).inc();
    }

    /// Prometheus text exposition of every registered metric.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
