use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use edumart_catalog::{CourseSnapshot, CourseStatus, InMemoryCatalog};
use edumart_core::clock::FixedClock;
use edumart_core::events::BroadcastPublisher;
use edumart_core::payment::{GatewayCallback, Payment, PaymentGateway, PaymentStatus, PaymentUrlRequest};
use edumart_core::wallet::{replay, TransactionKind};
use edumart_core::{CoreError, CoreResult};
use edumart_coupon::{CouponService, CouponType, NewCoupon};
use edumart_order::repository::{
    SettlementOutcome, SettlementPlan, SettlementRecord, SettlementRepository,
};
use edumart_order::{
    CallbackOutcome, CheckoutContext, CheckoutLine, CheckoutRequest, ClientContext, InMemoryStore, NewPayoutRequest,
    OrderManager, OrderStatus, PaymentOrchestrator, PaymentPolicy, PayoutService, PayoutStatus, PricingConfig,
    PricingEngine, SettlementEngine, SettlementPolicy, VnPayGateway, VnPaySettings, WalletService,
};
use edumart_shared::SaleEvent;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

struct Harness {
    clock: Arc<FixedClock>,
    store: Arc<InMemoryStore>,
    catalog: Arc<InMemoryCatalog>,
    coupons: Arc<CouponService>,
    gateway: Arc<VnPayGateway>,
    publisher: Arc<BroadcastPublisher>,
    orders: OrderManager,
    payments: PaymentOrchestrator,
    settlement: SettlementEngine,
    wallets: WalletService,
    payouts: PayoutService,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
}

fn harness() -> Harness {
    let clock = Arc::new(FixedClock::new(start()));
    let store = Arc::new(InMemoryStore::new(clock.clone()));
    let catalog = Arc::new(InMemoryCatalog::new());
    let coupons = Arc::new(CouponService::new(store.clone(), clock.clone()));
    let pricing = Arc::new(PricingEngine::new(
        PricingConfig::default(),
        catalog.clone(),
        coupons.clone(),
    ));
    let publisher = Arc::new(BroadcastPublisher::new(64));
    let gateway = Arc::new(VnPayGateway::new(VnPaySettings::sandbox(
        "EDUMART1",
        "TESTSECRET",
        "https://edumart.test/payment/callback",
    )));

    Harness {
        orders: OrderManager::new(store.clone(), pricing, publisher.clone(), clock.clone()),
        payments: PaymentOrchestrator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            gateway.clone(),
            publisher.clone(),
            clock.clone(),
            PaymentPolicy::default(),
        ),
        settlement: SettlementEngine::new(
            store.clone(),
            store.clone(),
            publisher.clone(),
            clock.clone(),
            SettlementPolicy::default(),
        ),
        wallets: WalletService::new(store.clone(), "VND"),
        payouts: PayoutService::new(store.clone(), store.clone(), clock.clone(), "VND"),
        clock,
        store,
        catalog,
        coupons,
        gateway,
        publisher,
    }
}

impl Harness {
    /// Publishes a course and returns `(course_id, instructor_id)`.
    async fn course(&self, price: Decimal) -> (Uuid, Uuid) {
        let course_id = Uuid::new_v4();
        let instructor_id = Uuid::new_v4();
        self.catalog
            .upsert(CourseSnapshot {
                id: course_id,
                title: "Rust for Backend Engineers".into(),
                thumbnail_url: None,
                instructor_id,
                instructor_name: "Minh Tran".into(),
                original_price: price,
                status: CourseStatus::Published,
            })
            .await;
        (course_id, instructor_id)
    }

    async fn coupon(&self, code: &str, coupon_type: CouponType, value: Decimal, instructor: Option<Uuid>, limit: Option<i32>) {
        self.coupons
            .create_coupon(NewCoupon {
                code: code.into(),
                description: None,
                coupon_type,
                value,
                min_order_amount: None,
                max_discount_amount: None,
                usage_limit: limit,
                usage_per_user: None,
                applicable_instructor_id: instructor,
                applicable_course_id: None,
                valid_from: start() - Duration::days(1),
                valid_to: start() + Duration::days(60),
            })
            .await
            .unwrap();
    }

    async fn order(&self, user_id: Uuid, course_id: Uuid, instructor_code: Option<&str>, system_code: Option<&str>) -> edumart_order::Order {
        let request = CheckoutRequest {
            items: vec![CheckoutLine {
                course_id,
                instructor_coupon_code: instructor_code.map(str::to_string),
            }],
            system_coupon_code: system_code.map(str::to_string),
        };
        self.orders
            .create_order(user_id, &request, ClientContext::default())
            .await
            .unwrap()
    }

    async fn checkout(&self, user_id: Uuid, course_id: Uuid, instructor_code: Option<&str>, system_code: Option<&str>) -> (edumart_order::Order, Payment) {
        let order = self.order(user_id, course_id, instructor_code, system_code).await;
        let payment = self
            .payments
            .process_payment(order.id, user_id, ctx())
            .await
            .unwrap();
        (order, payment)
    }

    fn callback(&self, payment: &Payment, response_code: &str, amount: Decimal) -> String {
        let mut params = BTreeMap::new();
        params.insert("vnp_TmnCode".to_string(), "EDUMART1".to_string());
        params.insert("vnp_TxnRef".to_string(), payment.payment_number.clone());
        params.insert(
            "vnp_Amount".to_string(),
            (amount * dec!(100)).to_i64().unwrap().to_string(),
        );
        params.insert("vnp_ResponseCode".to_string(), response_code.to_string());
        let status = if response_code == "00" { "00" } else { "02" };
        params.insert("vnp_TransactionStatus".to_string(), status.to_string());
        params.insert("vnp_TransactionNo".to_string(), "14226112".to_string());
        params.insert("vnp_BankCode".to_string(), "NCB".to_string());
        params.insert("vnp_CardType".to_string(), "ATM".to_string());
        self.gateway.signed_query(&params).unwrap()
    }
}

fn ctx() -> CheckoutContext {
    CheckoutContext {
        client_ip: "203.0.113.9".into(),
        ..CheckoutContext::default()
    }
}

#[tokio::test]
async fn test_stacked_coupons_pay_and_settle() {
    let h = harness();
    let mut events = h.publisher.subscribe();
    let (course_id, instructor_id) = h.course(dec!(500000)).await;
    h.coupon("INSTR20", CouponType::Percentage, dec!(20), Some(instructor_id), None).await;
    h.coupon("SALE50K", CouponType::FixedAmount, dec!(50000), None, None).await;
    let buyer = Uuid::new_v4();

    let (order, payment) = h.checkout(buyer, course_id, Some("instr20"), Some("SALE50K")).await;
    assert_eq!(order.total, dec!(350000));
    assert_eq!(order.instructor_discount, dec!(100000));
    assert_eq!(order.system_discount, dec!(50000));
    assert_eq!(order.items[0].platform_fee_amount, dec!(105000));
    assert_eq!(order.items[0].instructor_earnings, dec!(245000));
    assert_eq!(payment.status, PaymentStatus::Processing);
    let url = payment.redirect_url.clone().unwrap();
    assert!(url.starts_with("https://sandbox.vnpayment.vn/paymentv2/vpcpay.html?"));
    assert!(url.contains("vnp_Amount=35000000"));

    // Creating the order did not consume the coupons.
    assert_eq!(h.coupons.get_by_code("SALE50K").await.unwrap().used_count, 0);

    let outcome = h
        .payments
        .handle_callback(&h.callback(&payment, "00", dec!(350000)))
        .await
        .unwrap();
    assert!(matches!(outcome, CallbackOutcome::Confirmed(_)));

    let order = h.orders.get_order(order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.paid_at, Some(start()));
    assert_eq!(h.coupons.get_by_code("SALE50K").await.unwrap().used_count, 1);
    assert_eq!(h.coupons.get_by_code("INSTR20").await.unwrap().used_count, 1);
    assert_eq!(h.coupons.usages_for_order(order.id).await.unwrap().len(), 2);

    match events.recv().await.unwrap() {
        SaleEvent::PaymentConfirmed(e) => {
            assert_eq!(e.order_id, order.id);
            assert_eq!(e.user_id, buyer);
            assert_eq!(e.course_ids, vec![course_id]);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let instructor = h.wallets.instructor_wallet(instructor_id).await.unwrap();
    assert_eq!(instructor.pending_balance, dec!(245000));
    assert_eq!(instructor.available_balance, dec!(0));
    let platform = h.wallets.platform_wallet().await.unwrap();
    assert_eq!(platform.pending_balance, dec!(105000));

    // Still on hold.
    let report = h.settlement.process_pending_settlements().await.unwrap();
    assert_eq!(report.settled, 0);

    h.clock.advance(Duration::days(14));
    let report = h.settlement.process_pending_settlements().await.unwrap();
    assert_eq!(report.settled, 1);
    assert!(report.failures.is_empty());

    let instructor = h.wallets.instructor_wallet(instructor_id).await.unwrap();
    assert_eq!(instructor.pending_balance, dec!(0));
    assert_eq!(instructor.available_balance, dec!(245000));
    assert_eq!(instructor.total_earnings, dec!(245000));
    let platform = h.wallets.platform_wallet().await.unwrap();
    assert_eq!(platform.available_balance, dec!(105000));

    let (available, pending) = replay(&h.store.ledger(instructor.id).await);
    assert_eq!((available, pending), (dec!(245000), dec!(0)));

    let record = h.store.settlement_record(order.id).await.unwrap().unwrap();
    assert!(!record.forced);
    assert_eq!(record.instructor_total, dec!(245000));
    assert_eq!(record.platform_total, dec!(105000));
}

#[tokio::test]
async fn test_settlement_never_runs_twice() {
    let h = harness();
    let (course_id, instructor_id) = h.course(dec!(100000)).await;
    let (order, payment) = h.checkout(Uuid::new_v4(), course_id, None, None).await;
    h.payments
        .handle_callback(&h.callback(&payment, "00", dec!(100000)))
        .await
        .unwrap();

    h.clock.advance(Duration::days(15));
    assert_eq!(h.settlement.process_pending_settlements().await.unwrap().settled, 1);
    assert_eq!(h.settlement.process_pending_settlements().await.unwrap().settled, 0);
    assert!(matches!(
        h.settlement.settle_order(order.id).await.unwrap(),
        SettlementOutcome::AlreadySettled
    ));
    assert!(matches!(
        h.settlement.force_settle(order.id, "ops", "retry").await.unwrap(),
        SettlementOutcome::AlreadySettled
    ));

    let wallet = h.wallets.instructor_wallet(instructor_id).await.unwrap();
    assert_eq!(wallet.available_balance, dec!(70000));
    assert_eq!(wallet.pending_balance, dec!(0));
}

#[tokio::test]
async fn test_replayed_callback_is_a_no_op() {
    let h = harness();
    let (course_id, instructor_id) = h.course(dec!(100000)).await;
    let (order, payment) = h.checkout(Uuid::new_v4(), course_id, None, None).await;
    let query = h.callback(&payment, "00", dec!(100000));

    let first = h.payments.handle_callback(&query).await.unwrap();
    let second = h.payments.handle_callback(&query).await.unwrap();
    assert!(matches!(first, CallbackOutcome::Confirmed(_)));
    assert!(matches!(second, CallbackOutcome::AlreadyProcessed(_)));

    let wallet = h.wallets.instructor_wallet(instructor_id).await.unwrap();
    assert_eq!(wallet.pending_balance, dec!(70000));
    assert_eq!(h.store.ledger(wallet.id).await.len(), 1);
    assert_eq!(h.orders.get_order(order.id).await.unwrap().status, OrderStatus::Paid);
}

#[tokio::test]
async fn test_cancelled_at_gateway_fails_payment_only() {
    let h = harness();
    let (course_id, _) = h.course(dec!(100000)).await;
    h.coupon("ONCE10K", CouponType::FixedAmount, dec!(10000), None, Some(1)).await;
    let buyer = Uuid::new_v4();
    let (order, payment) = h.checkout(buyer, course_id, None, Some("ONCE10K")).await;
    assert_eq!(order.total, dec!(90000));

    let outcome = h
        .payments
        .handle_callback(&h.callback(&payment, "24", dec!(90000)))
        .await
        .unwrap();
    let failed = match outcome {
        CallbackOutcome::Failed(p) => p,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(failed.status, PaymentStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("Customer cancelled the transaction"));
    assert_eq!(h.orders.get_order(order.id).await.unwrap().status, OrderStatus::Pending);

    // The coupon slot is still free.
    assert_eq!(h.coupons.get_by_code("ONCE10K").await.unwrap().used_count, 0);
    assert!(h.coupons.usages_for_order(order.id).await.unwrap().is_empty());

    // A fresh attempt gets a new payment.
    let retry = h.payments.process_payment(order.id, buyer, ctx()).await.unwrap();
    assert_ne!(retry.id, payment.id);

    // A late success for the failed attempt changes nothing.
    let late = h
        .payments
        .handle_callback(&h.callback(&payment, "00", dec!(90000)))
        .await
        .unwrap();
    assert!(matches!(late, CallbackOutcome::AlreadyProcessed(_)));
    assert_eq!(h.orders.get_order(order.id).await.unwrap().status, OrderStatus::Pending);
    assert_eq!(h.coupons.get_by_code("ONCE10K").await.unwrap().used_count, 0);
}

/// Yields before signing so two checkouts of one order interleave.
struct YieldingGateway(Arc<VnPayGateway>);

#[async_trait]
impl PaymentGateway for YieldingGateway {
    fn provider(&self) -> &'static str {
        self.0.provider()
    }

    async fn create_payment_url(&self, request: &PaymentUrlRequest) -> CoreResult<String> {
        tokio::task::yield_now().await;
        self.0.create_payment_url(request).await
    }

    fn verify_callback(&self, raw_query: &str) -> CoreResult<GatewayCallback> {
        self.0.verify_callback(raw_query)
    }

    fn describe_response(&self, response_code: &str) -> String {
        self.0.describe_response(response_code)
    }
}

#[tokio::test]
async fn test_concurrent_checkouts_share_one_payment() {
    let h = harness();
    let payments = PaymentOrchestrator::new(
        h.store.clone(),
        h.store.clone(),
        h.store.clone(),
        Arc::new(YieldingGateway(h.gateway.clone())),
        h.publisher.clone(),
        h.clock.clone(),
        PaymentPolicy::default(),
    );
    let (course_id, _) = h.course(dec!(100000)).await;
    let buyer = Uuid::new_v4();
    let order = h.order(buyer, course_id, None, None).await;

    let (first, second) = tokio::join!(
        payments.process_payment(order.id, buyer, ctx()),
        payments.process_payment(order.id, buyer, ctx()),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.id, second.id);
    assert_eq!(second.status, PaymentStatus::Processing);
    assert!(second.redirect_url.is_some());
    assert_eq!(first.redirect_url, second.redirect_url);
    assert_eq!(payments.payments_for_order(order.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_active_payment_is_reused_until_it_expires() {
    let h = harness();
    let (course_id, _) = h.course(dec!(100000)).await;
    let buyer = Uuid::new_v4();
    let (order, first) = h.checkout(buyer, course_id, None, None).await;

    let again = h.payments.process_payment(order.id, buyer, ctx()).await.unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(again.redirect_url, first.redirect_url);

    h.clock.advance(Duration::minutes(16));
    let fresh = h.payments.process_payment(order.id, buyer, ctx()).await.unwrap();
    assert_ne!(fresh.id, first.id);

    let old = h.payments.payment_for_user(first.id, buyer).await.unwrap();
    assert_eq!(old.status, PaymentStatus::Expired);
    assert_eq!(old.failure_reason.as_deref(), Some("Payment expired after 15 minutes"));
    assert_eq!(h.payments.payments_for_order(order.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_expiry_sweep_and_expire_on_read() {
    let h = harness();
    let (course_id, _) = h.course(dec!(100000)).await;
    let buyer = Uuid::new_v4();
    let (order, first) = h.checkout(buyer, course_id, None, None).await;

    h.clock.advance(Duration::minutes(15));
    let read = h.payments.payment_for_user(first.id, buyer).await.unwrap();
    assert_eq!(read.status, PaymentStatus::Expired);

    let second = h.payments.process_payment(order.id, buyer, ctx()).await.unwrap();
    h.clock.advance(Duration::minutes(20));
    assert_eq!(h.payments.expire_stale_payments().await.unwrap(), 1);
    assert_eq!(h.payments.expire_stale_payments().await.unwrap(), 0);

    let second = h.payments.payment_for_user(second.id, buyer).await.unwrap();
    assert_eq!(second.status, PaymentStatus::Expired);
    assert_eq!(h.orders.get_order(order.id).await.unwrap().status, OrderStatus::Pending);

    let err = h.payments.payment_for_user(second.id, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
}

#[tokio::test]
async fn test_forged_or_mismatched_callbacks_change_nothing() {
    let h = harness();
    let (course_id, _) = h.course(dec!(100000)).await;
    let (order, payment) = h.checkout(Uuid::new_v4(), course_id, None, None).await;

    let forged = h
        .callback(&payment, "00", dec!(100000))
        .replace("vnp_ResponseCode=00", "vnp_ResponseCode=01");
    assert!(matches!(
        h.payments.handle_callback(&forged).await,
        Err(CoreError::SignatureInvalid)
    ));

    let cheap = h.callback(&payment, "00", dec!(1000));
    assert!(matches!(
        h.payments.handle_callback(&cheap).await,
        Err(CoreError::AmountMismatch { expected, received, .. })
            if expected == dec!(100000) && received == dec!(1000)
    ));

    let unknown = Payment {
        payment_number: "PAY-20260301-DEADBEEF".into(),
        ..payment.clone()
    };
    assert!(matches!(
        h.payments
            .handle_callback(&h.callback(&unknown, "00", dec!(100000)))
            .await,
        Err(CoreError::NotFound { .. })
    ));

    assert_eq!(h.orders.get_order(order.id).await.unwrap().status, OrderStatus::Pending);
    let current = h.payments.payment_for_user(payment.id, order.user_id).await.unwrap();
    assert_eq!(current.status, PaymentStatus::Processing);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_coupon_limit_holds_under_concurrent_confirmations() {
    let h = Arc::new(harness());
    let (course_id, _) = h.course(dec!(200000)).await;
    h.coupon("FLASH", CouponType::FixedAmount, dec!(20000), None, Some(2)).await;

    let mut queries = Vec::new();
    for _ in 0..5 {
        let (_, payment) = h.checkout(Uuid::new_v4(), course_id, None, Some("FLASH")).await;
        queries.push(h.callback(&payment, "00", dec!(180000)));
    }

    let mut tasks = Vec::new();
    for query in queries {
        let h = h.clone();
        tasks.push(tokio::spawn(async move { h.payments.handle_callback(&query).await }));
    }

    let mut confirmed = 0;
    let mut failed = 0;
    for task in tasks {
        match task.await.unwrap().unwrap() {
            CallbackOutcome::Confirmed(_) => confirmed += 1,
            CallbackOutcome::Failed(p) => {
                assert!(p.failure_reason.unwrap().contains("FLASH"));
                failed += 1;
            }
            CallbackOutcome::AlreadyProcessed(_) => panic!("each payment is confirmed once"),
        }
    }

    assert_eq!(confirmed, 2);
    assert_eq!(failed, 3);
    assert_eq!(h.coupons.get_by_code("FLASH").await.unwrap().used_count, 2);
    let platform = h.wallets.platform_wallet().await.unwrap();
    assert_eq!(platform.pending_balance, dec!(108000));
}

#[tokio::test]
async fn test_free_order_needs_no_payment() {
    let h = harness();
    let (course_id, _) = h.course(Decimal::ZERO).await;
    let buyer = Uuid::new_v4();
    let request = CheckoutRequest {
        items: vec![CheckoutLine {
            course_id,
            instructor_coupon_code: None,
        }],
        system_coupon_code: None,
    };

    let order = h
        .orders
        .create_order(buyer, &request, ClientContext::default())
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert!(order.is_settled);

    let err = h.payments.process_payment(order.id, buyer, ctx()).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
    assert_eq!(h.store.wallet_count().await, 0);
    assert!(h.store.due_for_settlement(start() + Duration::days(30), &[], 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_refund_inside_hold_reverses_pending_earnings() {
    let h = harness();
    let mut events = h.publisher.subscribe();
    let (course_id, instructor_id) = h.course(dec!(100000)).await;
    let (order, payment) = h.checkout(Uuid::new_v4(), course_id, None, None).await;
    h.payments
        .handle_callback(&h.callback(&payment, "00", dec!(100000)))
        .await
        .unwrap();

    let refunded = h.orders.refund_order(order.id, "ops@edumart", "duplicate purchase").await.unwrap();
    assert_eq!(refunded.status, OrderStatus::Refunded);
    assert!(refunded.refunded_at.is_some());

    let wallet = h.wallets.instructor_wallet(instructor_id).await.unwrap();
    assert_eq!(wallet.pending_balance, dec!(0));
    assert_eq!(h.wallets.platform_wallet().await.unwrap().pending_balance, dec!(0));

    h.clock.advance(Duration::days(20));
    assert_eq!(h.settlement.process_pending_settlements().await.unwrap().settled, 0);

    let mut saw_refund = false;
    while let Ok(event) = events.try_recv() {
        if let SaleEvent::OrderRefunded(e) = event {
            assert_eq!(e.order_id, order.id);
            assert_eq!(e.amount, dec!(100000));
            saw_refund = true;
        }
    }
    assert!(saw_refund);
}

#[tokio::test]
async fn test_force_settle_skips_hold_but_not_the_guard() {
    let h = harness();
    let (course_id, instructor_id) = h.course(dec!(100000)).await;
    let (order, payment) = h.checkout(Uuid::new_v4(), course_id, None, None).await;
    h.payments
        .handle_callback(&h.callback(&payment, "00", dec!(100000)))
        .await
        .unwrap();

    assert!(matches!(
        h.settlement.settle_order(order.id).await.unwrap(),
        SettlementOutcome::NotEligible(_)
    ));
    assert!(matches!(
        h.settlement.force_settle(order.id, "ops", "").await,
        Err(CoreError::ValidationError(_))
    ));

    let outcome = h
        .settlement
        .force_settle(order.id, "ops@edumart", "instructor dispute resolved")
        .await
        .unwrap();
    let record = match outcome {
        SettlementOutcome::Settled(record) => record,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert!(record.forced);
    assert_eq!(record.operator.as_deref(), Some("ops@edumart"));

    let wallet = h.wallets.instructor_wallet(instructor_id).await.unwrap();
    assert_eq!(wallet.available_balance, dec!(70000));

    let err = h.orders.refund_order(order.id, "ops", "late").await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

/// Settlement storage that cannot settle one particular order.
struct StuckOrder {
    inner: Arc<InMemoryStore>,
    order_id: Uuid,
}

#[async_trait]
impl SettlementRepository for StuckOrder {
    async fn due_for_settlement(&self, paid_before: DateTime<Utc>, exclude: &[Uuid], limit: i64) -> CoreResult<Vec<Uuid>> {
        self.inner.due_for_settlement(paid_before, exclude, limit).await
    }

    async fn settle_order(&self, plan: &SettlementPlan) -> CoreResult<SettlementOutcome> {
        if plan.order_id == self.order_id {
            return Err(CoreError::Storage("deadlock detected".into()));
        }
        self.inner.settle_order(plan).await
    }

    async fn settlement_record(&self, order_id: Uuid) -> CoreResult<Option<SettlementRecord>> {
        self.inner.settlement_record(order_id).await
    }
}

#[tokio::test]
async fn test_failing_order_does_not_block_the_sweep() {
    let h = harness();
    let (course_id, _) = h.course(dec!(100000)).await;
    let (stuck, payment) = h.checkout(Uuid::new_v4(), course_id, None, None).await;
    h.payments
        .handle_callback(&h.callback(&payment, "00", dec!(100000)))
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(1));
    let (next, payment) = h.checkout(Uuid::new_v4(), course_id, None, None).await;
    h.payments
        .handle_callback(&h.callback(&payment, "00", dec!(100000)))
        .await
        .unwrap();

    let engine = SettlementEngine::new(
        h.store.clone(),
        Arc::new(StuckOrder {
            inner: h.store.clone(),
            order_id: stuck.id,
        }),
        h.publisher.clone(),
        h.clock.clone(),
        SettlementPolicy {
            hold_days: 14,
            batch_size: 1,
            failure_backoff_minutes: 60,
        },
    );
    h.clock.advance(Duration::days(15));

    let report = engine.process_pending_settlements().await.unwrap();
    assert_eq!(report.settled, 0);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].order_id, stuck.id);

    // The oldest order sits out, so the next one gets its turn.
    let report = engine.process_pending_settlements().await.unwrap();
    assert_eq!(report.settled, 1);
    assert!(report.failures.is_empty());
    assert!(h.orders.get_order(next.id).await.unwrap().is_settled);

    let report = engine.process_pending_settlements().await.unwrap();
    assert_eq!(report.settled, 0);
    assert!(report.failures.is_empty());

    h.clock.advance(Duration::minutes(61));
    let report = engine.process_pending_settlements().await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].order_id, stuck.id);
    assert!(!h.orders.get_order(stuck.id).await.unwrap().is_settled);
}

fn payout_request(amount: Decimal) -> NewPayoutRequest {
    NewPayoutRequest {
        amount,
        bank_name: "Vietcombank".into(),
        bank_account_number: "0071000123456".into(),
        bank_account_name: "TRAN VAN MINH".into(),
        note: Some("March earnings".into()),
    }
}

#[tokio::test]
async fn test_top_up_then_payout() {
    let h = harness();
    let instructor_id = Uuid::new_v4();
    let admin_id = Uuid::new_v4();

    let payment = h
        .payments
        .start_top_up(instructor_id, dec!(200000), ctx())
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Processing);
    let outcome = h
        .payments
        .handle_callback(&h.callback(&payment, "00", dec!(200000)))
        .await
        .unwrap();
    assert!(matches!(outcome, CallbackOutcome::Confirmed(_)));

    let wallet = h.wallets.instructor_wallet(instructor_id).await.unwrap();
    assert_eq!(wallet.available_balance, dec!(200000));

    let err = h
        .payouts
        .request_payout(instructor_id, payout_request(dec!(250000)))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InsufficientFunds { .. }));

    let payout = h
        .payouts
        .request_payout(instructor_id, payout_request(dec!(150000)))
        .await
        .unwrap();
    assert_eq!(payout.status, PayoutStatus::Requested);
    assert_eq!(payout.wallet_id, wallet.id);
    let err = h
        .payouts
        .request_payout(instructor_id, payout_request(dec!(10000)))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    // Requesting moves no money.
    let wallet = h.wallets.instructor_wallet(instructor_id).await.unwrap();
    assert_eq!(wallet.available_balance, dec!(200000));

    let (completed, tx) = h.payouts.approve(payout.id, admin_id).await.unwrap();
    assert_eq!(completed.status, PayoutStatus::Completed);
    assert_eq!(completed.approved_by, Some(admin_id));
    assert_eq!(completed.approved_at, Some(start()));
    assert_eq!(tx.kind, TransactionKind::Withdrawal);
    assert_eq!(tx.available_after, dec!(50000));
    assert!(matches!(
        h.payouts.approve(payout.id, admin_id).await,
        Err(CoreError::Conflict(_))
    ));

    let history = h.wallets.transactions(wallet.id, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].reference.as_deref(), Some(payout.request_number.as_str()));

    let second = h
        .payouts
        .request_payout(instructor_id, payout_request(dec!(50000)))
        .await
        .unwrap();
    assert!(matches!(
        h.payouts.reject(second.id, admin_id, "  ").await,
        Err(CoreError::ValidationError(_))
    ));
    let rejected = h.payouts.reject(second.id, admin_id, "account closed").await.unwrap();
    assert_eq!(rejected.status, PayoutStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("account closed"));

    let wallet = h.wallets.instructor_wallet(instructor_id).await.unwrap();
    assert_eq!(wallet.available_balance, dec!(50000));
    assert_eq!(wallet.total_withdrawn, dec!(150000));

    let mine = h.payouts.list_payouts(Some(instructor_id), 10).await.unwrap();
    assert_eq!(mine.len(), 2);
    assert!(matches!(
        h.payouts.payout_for_instructor(second.id, Uuid::new_v4()).await,
        Err(CoreError::NotFound { .. })
    ));
}
