//! Integration tests for redeem-kit
//!
//! These tests verify end-to-end loyalty flows across all components.

use chrono::{Duration as ChronoDuration, Utc};
use redeem_kit::code::{CustomerCode, SuffixSource, SUFFIX_SPACE};
use redeem_kit::entity::{
    Business, Customer, CustomerClass, PointsDelta, PointsSource, PurchaseRecord, Reward,
};
use redeem_kit::observability::LoyaltyMetrics;
use redeem_kit::store::{BusinessRegistry, ClassRegistry, CustomerStore, InMemoryStore};
use redeem_kit::{
    Assignment, ClassFeatures, Error, LoyaltyConfig, LoyaltyService, QrKind, QrPayload, Result,
    RngSource,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Fixtures
// ============================================================================

/// Replays fixed suffixes, repeating the last one.
struct Scripted {
    values: Vec<u32>,
    pos: usize,
}

impl Scripted {
    fn new(values: Vec<u32>) -> Self {
        Scripted { values, pos: 0 }
    }
}

impl SuffixSource for Scripted {
    fn draw(&mut self, _upper: u32) -> u32 {
        let v = self.values[self.pos.min(self.values.len() - 1)];
        self.pos += 1;
        v
    }
}

/// Store whose first issued-code snapshot hides the codes a concurrent
/// writer is about to take.
struct StaleSnapshotStore {
    inner: InMemoryStore,
    hidden: HashSet<String>,
    snapshots: AtomicU32,
}

impl CustomerStore for StaleSnapshotStore {
    async fn fetch_customer(&self, customer_id: &str) -> Result<Option<Customer>> {
        self.inner.fetch_customer(customer_id).await
    }

    async fn issued_codes(&self, business_id: &str) -> Result<HashSet<String>> {
        let mut codes = self.inner.issued_codes(business_id).await?;
        if self.snapshots.fetch_add(1, Ordering::SeqCst) == 0 {
            codes.retain(|c| !self.hidden.contains(c));
        }
        Ok(codes)
    }

    async fn write_customer_code(
        &self,
        customer_id: &str,
        business_id: &str,
        code: &CustomerCode,
        qr_code_url: &str,
        updated_at: chrono::DateTime<Utc>,
    ) -> Result<()> {
        self.inner
            .write_customer_code(customer_id, business_id, code, qr_code_url, updated_at)
            .await
    }

    async fn apply_points(&self, customer_id: &str, delta: PointsDelta) -> Result<Customer> {
        self.inner.apply_points(customer_id, delta).await
    }

    async fn record_purchase(&self, record: &PurchaseRecord) -> Result<Customer> {
        self.inner.record_purchase(record).await
    }
}

impl BusinessRegistry for StaleSnapshotStore {
    async fn fetch_business(&self, business_id: &str) -> Result<Option<Business>> {
        self.inner.fetch_business(business_id).await
    }
}

impl ClassRegistry for StaleSnapshotStore {
    async fn fetch_class(&self, class_id: &str) -> Result<Option<CustomerClass>> {
        self.inner.fetch_class(class_id).await
    }

    async fn classes_for_business(&self, business_id: &str) -> Result<Vec<CustomerClass>> {
        self.inner.classes_for_business(business_id).await
    }

    async fn insert_class(&self, class: CustomerClass) -> Result<()> {
        self.inner.insert_class(class).await
    }

    async fn fetch_reward(&self, reward_id: &str) -> Result<Option<Reward>> {
        self.inner.fetch_reward(reward_id).await
    }
}

#[derive(Clone, Default)]
struct CountingMetrics {
    assigned: Arc<AtomicU32>,
    collisions: Arc<AtomicU32>,
}

impl LoyaltyMetrics for CountingMetrics {
    fn record_code_assigned(&self, _business_id: &str, _code: &str, _allocations: u32) {
        self.assigned.fetch_add(1, Ordering::SeqCst);
    }

    fn record_collision(&self, _business_id: &str, _code: &str) {
        self.collisions.fetch_add(1, Ordering::SeqCst);
    }
}

fn test_config() -> LoyaltyConfig {
    LoyaltyConfig::default()
        .with_qr_base_url("https://rewards.test/customer")
        .with_collision_backoff(Duration::ZERO)
}

fn bakery_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    store.insert_business(
        Business::new("bakery", "Corner Bakery")
            .with_prefix("ABC")
            .listed(),
    );
    store
}

// ============================================================================
// Tests
// ============================================================================

/// Test 1: Signup To Redemption
///
/// Verifies the full customer lifecycle:
/// - default class created for a new business
/// - code and QR link assigned at signup
/// - points accrued from purchases
/// - points spent on a reward
#[tokio::test]
async fn test_signup_to_redemption() {
    let _ = env_logger::builder().is_test(true).try_init();

    let store = bakery_store();
    store.insert_reward(Reward::new("card_5", "bakery", "$5 gift card", 250));
    let service = LoyaltyService::new(store.clone(), test_config())
        .expect("Failed to build service")
        .with_suffix_source(RngSource::seeded(2024));

    let class = service
        .ensure_default_class("bakery")
        .await
        .expect("Failed to create class")
        .expect("Business had no class");
    store.insert_customer(
        Customer::new("alice")
            .with_business("bakery")
            .with_class(class.id.clone()),
    );

    let assignment = service
        .assign_customer_code("alice")
        .await
        .expect("Failed to assign code");
    assert!(assignment.is_new());

    service
        .record_purchase("alice", 19.99, PointsSource::Purchase)
        .await
        .expect("Failed to record purchase");
    service
        .record_purchase("alice", 8.50, PointsSource::Purchase)
        .await
        .expect("Failed to record purchase");

    let customer = service
        .redeem_reward("alice", "card_5")
        .await
        .expect("Failed to redeem");

    // 199 + 85 earned, 250 spent
    assert_eq!(customer.total_earned, 284);
    assert_eq!(customer.total_redeemed, 250);
    assert_eq!(customer.points, 34);
    assert_eq!(
        customer.qr_code_url,
        Some(format!(
            "https://rewards.test/customer?code={}",
            assignment.code()
        ))
    );
}

/// Test 2: Stale Snapshot Collision
///
/// A concurrent writer took a code the first snapshot did not show:
/// - the conditional write reports a collision
/// - the service refreshes the snapshot and allocates again
#[tokio::test]
async fn test_stale_snapshot_collision_is_retried() {
    let inner = bakery_store();
    inner.insert_customer(Customer::new("bob").with_business("bakery"));
    inner.reserve_code("bakery", "ABC12345");

    let store = StaleSnapshotStore {
        inner: inner.clone(),
        hidden: ["ABC12345".to_string()].into_iter().collect(),
        snapshots: AtomicU32::new(0),
    };
    let metrics = CountingMetrics::default();
    let service = LoyaltyService::new(store, test_config())
        .expect("Failed to build service")
        .with_suffix_source(Scripted::new(vec![12345, 12345, 22222]))
        .with_metrics(Box::new(metrics.clone()));

    let assignment = service
        .assign_customer_code("bob")
        .await
        .expect("Failed to assign code");

    assert_eq!(assignment.code().as_str(), "ABC22222");
    assert_eq!(metrics.collisions.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.assigned.load(Ordering::SeqCst), 1);
    assert_eq!(service.store().snapshots.load(Ordering::SeqCst), 2);
}

/// Test 3: Collision Retries Are Bounded
///
/// With retries disabled the collision surfaces to the caller as retryable.
#[tokio::test]
async fn test_collision_without_retries_surfaces() {
    let inner = bakery_store();
    inner.insert_customer(Customer::new("bob").with_business("bakery"));
    inner.reserve_code("bakery", "ABC12345");

    let store = StaleSnapshotStore {
        inner,
        hidden: ["ABC12345".to_string()].into_iter().collect(),
        snapshots: AtomicU32::new(0),
    };
    let service = LoyaltyService::new(store, test_config().with_collision_retries(0))
        .expect("Failed to build service")
        .with_suffix_source(Scripted::new(vec![12345]));

    let err = service
        .assign_customer_code("bob")
        .await
        .expect_err("Collision should surface");

    assert!(err.is_retryable());
    assert_eq!(
        err,
        Error::CodeCollision {
            business_id: "bakery".to_string(),
            code: "ABC12345".to_string(),
        }
    );
}

/// Test 4: Single Free Slot
///
/// Every code but ABC12345 is issued; an injected source reaches it.
#[tokio::test]
async fn test_single_free_slot_assigned() {
    let store = bakery_store();
    for n in 1..=SUFFIX_SPACE {
        if n != 12345 {
            store.reserve_code("bakery", CustomerCode::sequential("ABC", n).as_str());
        }
    }
    store.insert_customer(Customer::new("carol").with_business("bakery"));

    let service = LoyaltyService::new(store.clone(), test_config())
        .expect("Failed to build service")
        .with_suffix_source(Scripted::new(vec![7, 99_999, 12345]));

    let assignment = service
        .assign_customer_code("carol")
        .await
        .expect("Failed to assign code");
    assert_eq!(assignment.code().as_str(), "ABC12345");

    // Space is now full
    store.insert_customer(Customer::new("dave").with_business("bakery"));
    let err = service
        .assign_customer_code("dave")
        .await
        .expect_err("No codes left");
    assert_eq!(
        err,
        Error::AllocationExhausted {
            business_id: "bakery".to_string(),
            attempts: 100,
        }
    );
}

/// Test 5: Concurrent Assignment
///
/// Many customers of one business assigned in parallel all get distinct codes.
#[tokio::test]
async fn test_concurrent_assignment_unique_codes() {
    let store = bakery_store();
    for i in 0..50 {
        store.insert_customer(Customer::new(format!("cust_{}", i)).with_business("bakery"));
    }
    let service = LoyaltyService::new(store.clone(), test_config())
        .expect("Failed to build service")
        .with_suffix_source(RngSource::seeded(5));

    let mut handles = vec![];
    for i in 0..50 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .assign_customer_code(&format!("cust_{}", i))
                .await
                .expect("Failed to assign code")
        }));
    }

    let mut codes = HashSet::new();
    for handle in handles {
        let assignment = handle.await.expect("Task failed");
        assert!(codes.insert(assignment.code().clone()));
    }
    assert_eq!(codes.len(), 50);
    assert_eq!(store.stats().customers_with_code, 50);
}

/// Test 6: Same Customer Assigned Twice Concurrently
///
/// Both callers see the same code; only one write happens.
#[tokio::test]
async fn test_same_customer_concurrent_assignment() {
    let store = bakery_store();
    store.insert_customer(Customer::new("erin").with_business("bakery"));
    let service = LoyaltyService::new(store.clone(), test_config())
        .expect("Failed to build service");

    let (a, b) = tokio::join!(
        service.assign_customer_code("erin"),
        service.assign_customer_code("erin")
    );
    let a = a.expect("Failed to assign code");
    let b = b.expect("Failed to assign code");

    assert_eq!(a.code(), b.code());
    assert_eq!(store.stats().issued_codes, 1);
}

/// Test 7: Backfill Missing Codes
///
/// Mirrors the batch repair job:
/// - customers with codes are skipped
/// - customers without codes are assigned
#[tokio::test]
async fn test_backfill_missing_codes() {
    let store = bakery_store();
    let mut legacy = Customer::new("legacy").with_business("bakery");
    legacy.customer_code = Some(CustomerCode::sequential("ABC", 1));
    store.insert_customer(legacy);
    for i in 0..5 {
        store.insert_customer(Customer::new(format!("new_{}", i)).with_business("bakery"));
    }
    store.insert_customer(Customer::new("elsewhere").with_business("other"));

    let service = LoyaltyService::new(store.clone(), test_config())
        .expect("Failed to build service")
        .with_suffix_source(RngSource::seeded(77));

    let report = service
        .backfill_missing_codes("bakery")
        .await
        .expect("Failed to backfill");

    assert_eq!(report.assigned, 5);
    assert_eq!(report.skipped, 1);
    assert!(report.failed.is_empty());

    let issued = store
        .issued_codes("bakery")
        .await
        .expect("Failed to list codes");
    assert_eq!(issued.len(), 6);

    let untouched = store
        .fetch_customer("elsewhere")
        .await
        .expect("Failed to fetch")
        .expect("Customer not found");
    assert!(!untouched.has_existing_code());
}

/// Test 8: Backfill Needs A Prefix
#[tokio::test]
async fn test_backfill_without_prefix() {
    let store = InMemoryStore::new();
    store.insert_business(Business::new("deli", "Deli"));
    let service = LoyaltyService::new(store, test_config()).expect("Failed to build service");

    let err = service
        .backfill_missing_codes("deli")
        .await
        .expect_err("No prefix");
    assert_eq!(err, Error::MissingBusinessPrefix("deli".to_string()));
}

/// Test 9: Audit Finds Old-Rate Purchases
///
/// Records written under a 1 point per dollar rate fail validation.
#[tokio::test]
async fn test_audit_detects_stale_rate() {
    let store = bakery_store();
    store.insert_customer(Customer::new("frank").with_business("bakery"));
    let service = LoyaltyService::new(store.clone(), test_config())
        .expect("Failed to build service");

    let fresh = service
        .record_purchase("frank", 12.34, PointsSource::Purchase)
        .await
        .expect("Failed to record");

    let stale = PurchaseRecord {
        id: "old_1".to_string(),
        customer_id: "frank".to_string(),
        business_id: "bakery".to_string(),
        amount: 12.34,
        base_points: 12,
        awarded_points: 12,
        source: PointsSource::Purchase,
        recorded_at: Utc::now() - ChronoDuration::days(400),
    };
    store
        .record_purchase(&stale)
        .await
        .expect("Failed to record");

    let flagged = service
        .audit_purchases("bakery")
        .await
        .expect("Failed to audit");
    assert_eq!(flagged, vec![stale]);
    assert!(!flagged.iter().any(|r| r.id == fresh.id));
}

/// Test 10: QR-Driven Purchases
///
/// - referral payloads earn the class bonus
/// - class payloads do not
/// - expired or foreign payloads are rejected
#[tokio::test]
async fn test_qr_driven_purchase() {
    let store = bakery_store();
    store
        .insert_class(
            CustomerClass::new("vip", "bakery", "VIP").with_features(
                ClassFeatures::default()
                    .with_referral_bonus(100)
                    .with_max_points(400),
            ),
        )
        .await
        .expect("Failed to insert class");
    store.insert_customer(
        Customer::new("gina")
            .with_business("bakery")
            .with_class("vip"),
    );
    let service = LoyaltyService::new(store, test_config()).expect("Failed to build service");

    let now = Utc::now();
    let referral = QrPayload::new("bakery", "vip", "Corner Bakery", "VIP", QrKind::Referral)
        .with_expiry(now + ChronoDuration::hours(1));
    let referral_url = referral
        .to_url("https://rewards.test/join")
        .expect("Failed to encode");

    let record = service
        .record_purchase_from_qr("gina", &referral_url, 50.0, now)
        .await
        .expect("Failed to record");
    assert_eq!(record.source, PointsSource::Referral);
    assert_eq!(record.awarded_points, 400);

    let class_json = QrPayload::new("bakery", "vip", "Corner Bakery", "VIP", QrKind::Class)
        .to_json()
        .expect("Failed to encode");
    let record = service
        .record_purchase_from_qr("gina", &class_json, 10.0, now)
        .await
        .expect("Failed to record");
    assert_eq!(record.awarded_points, 100);

    let expired = referral
        .clone()
        .with_expiry(now - ChronoDuration::minutes(1))
        .to_json()
        .expect("Failed to encode");
    assert_eq!(
        service
            .record_purchase_from_qr("gina", &expired, 10.0, now)
            .await,
        Err(Error::QrPayloadExpired)
    );

    let foreign = QrPayload::new("deli", "x", "Deli", "X", QrKind::Class)
        .to_json()
        .expect("Failed to encode");
    let err = service
        .record_purchase_from_qr("gina", &foreign, 10.0, now)
        .await
        .expect_err("Foreign payload");
    assert!(matches!(err, Error::InvalidQrPayload(_)));
}

/// Test 11: Listed Businesses
#[tokio::test]
async fn test_listed_businesses_for_picker() {
    let store = bakery_store();
    store.insert_business(Business::new("hidden", "Unapproved Shop").with_prefix("HID"));

    let listed = store
        .listed_businesses()
        .await
        .expect("Failed to list businesses");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "bakery");
}

/// Test 12: Existing Code Short-Circuits
#[tokio::test]
async fn test_existing_code_is_returned() {
    let store = bakery_store();
    let mut customer = Customer::new("hank").with_business("bakery");
    customer.customer_code = Some(CustomerCode::sequential("ABC", 77));
    store.insert_customer(customer);
    let service = LoyaltyService::new(store, test_config()).expect("Failed to build service");

    let assignment = service
        .assign_customer_code("hank")
        .await
        .expect("Failed to assign code");
    assert_eq!(
        assignment,
        Assignment::Existing(CustomerCode::sequential("ABC", 77))
    );
}
