//! High-level loyalty service for web applications.
//!
//! Binds the pure rules (points calculation, code allocation, QR payloads)
//! to a store implementing the persistence collaborator traits.

use crate::code::{CodeAllocator, CustomerCode, RngSource, SuffixSource};
use crate::config::{LoyaltyConfig, MAX_COLLISION_BACKOFF};
use crate::entity::{Customer, CustomerClass, PointsDelta, PointsSource, PurchaseRecord};
use crate::error::{Error, Result};
use crate::observability::{LoyaltyMetrics, NoOpMetrics};
use crate::points::{ClassFeatures, PointsCalculator};
use crate::qr::{derive_qr_url, QrKind, QrPayload};
use crate::store::{BusinessRegistry, ClassRegistry, CustomerStore};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type SharedSource = Arc<Mutex<Box<dyn SuffixSource + Send>>>;

/// Outcome of [`LoyaltyService::assign_customer_code`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Assignment {
    /// The customer already had a code. Nothing was written.
    Existing(CustomerCode),

    /// A new code was allocated and stored.
    Assigned {
        code: CustomerCode,
        qr_code_url: String,
    },
}

impl Assignment {
    pub fn code(&self) -> &CustomerCode {
        match self {
            Assignment::Existing(code) => code,
            Assignment::Assigned { code, .. } => code,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Assignment::Assigned { .. })
    }
}

/// Result of a batch code backfill.
#[derive(Debug, Default)]
pub struct BackfillReport {
    /// Customers that received a new code.
    pub assigned: usize,
    /// Customers that already had one.
    pub skipped: usize,
    /// Customers whose assignment failed, with the reason.
    pub failed: Vec<(String, Error)>,
}

/// High-level loyalty service.
///
/// Cloning is cheap: the store, metrics and suffix source are shared.
///
/// # Example
///
/// ```ignore
/// use redeem_kit::{LoyaltyConfig, LoyaltyService, store::InMemoryStore};
///
/// let service = LoyaltyService::new(InMemoryStore::new(), LoyaltyConfig::default())?;
///
/// // Give a newly registered customer a code and QR link
/// let assignment = service.assign_customer_code("cust_1").await?;
///
/// // Award points for a purchase
/// let record = service
///     .record_purchase("cust_1", 19.99, PointsSource::Purchase)
///     .await?;
/// assert_eq!(record.awarded_points, 199);
/// ```
pub struct LoyaltyService<S> {
    store: Arc<S>,
    config: Arc<LoyaltyConfig>,
    calculator: PointsCalculator,
    allocator: CodeAllocator,
    source: SharedSource,
    metrics: Arc<dyn LoyaltyMetrics>,
    sequence: Arc<AtomicU64>,
}

impl<S> Clone for LoyaltyService<S> {
    fn clone(&self) -> Self {
        LoyaltyService {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            calculator: self.calculator,
            allocator: self.allocator,
            source: Arc::clone(&self.source),
            metrics: Arc::clone(&self.metrics),
            sequence: Arc::clone(&self.sequence),
        }
    }
}

impl<S> LoyaltyService<S>
where
    S: CustomerStore + BusinessRegistry + ClassRegistry,
{
    /// Create a new service over `store`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if `config` fails validation.
    pub fn new(store: S, config: LoyaltyConfig) -> Result<Self> {
        config.validate()?;
        let source: Box<dyn SuffixSource + Send> = Box::new(RngSource::from_os_rng());

        Ok(LoyaltyService {
            store: Arc::new(store),
            calculator: PointsCalculator::new(config.points_per_dollar),
            allocator: CodeAllocator::new(config.max_allocation_attempts),
            config: Arc::new(config),
            source: Arc::new(Mutex::new(source)),
            metrics: Arc::new(NoOpMetrics),
            sequence: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Box<dyn LoyaltyMetrics>) -> Self {
        self.metrics = Arc::from(metrics);
        self
    }

    /// Replace the random source used for code suffixes.
    pub fn with_suffix_source<T>(mut self, source: T) -> Self
    where
        T: SuffixSource + Send + 'static,
    {
        let source: Box<dyn SuffixSource + Send> = Box::new(source);
        self.source = Arc::new(Mutex::new(source));
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LoyaltyConfig {
        &self.config
    }

    pub fn calculator(&self) -> PointsCalculator {
        self.calculator
    }

    /// Human-readable earning rate.
    pub fn points_rate_display(&self) -> String {
        self.calculator.rate_display()
    }

    /// Give a customer a code and QR link, unless they already have one.
    ///
    /// Reads the issued-code snapshot, allocates against it and writes
    /// `{code, qr_code_url, updated_at}` in one conditional write. When that
    /// write loses to a concurrent writer the snapshot is refreshed and
    /// allocation runs again, up to `collision_retries` times with
    /// exponential backoff capped at [`MAX_COLLISION_BACKOFF`].
    ///
    /// # Errors
    ///
    /// - `Error::CustomerNotFound`: unknown customer
    /// - `Error::MissingBusinessAssignment`: customer has no business
    /// - `Error::MissingBusinessPrefix`: business has no code prefix
    /// - `Error::AllocationExhausted`: no free code within the attempt budget
    /// - `Error::CodeCollision`: still colliding after every retry
    /// - `Error::RepositoryError`: store failure
    pub async fn assign_customer_code(&self, customer_id: &str) -> Result<Assignment> {
        let customer = self.require_customer(customer_id).await?;
        if let Some(code) = customer.customer_code {
            debug!("Customer {} already has code {}", customer_id, code);
            return Ok(Assignment::Existing(code));
        }

        let business_id = customer
            .business_id
            .ok_or_else(|| Error::MissingBusinessAssignment(customer_id.to_string()))?;
        let prefix = self
            .store
            .business_prefix(&business_id)
            .await?
            .ok_or_else(|| Error::MissingBusinessPrefix(business_id.clone()))?;

        let max_allocations = self.config.collision_retries.saturating_add(1);
        let mut allocations: u32 = 0;

        loop {
            allocations += 1;

            let existing = self.store.issued_codes(&business_id).await?;
            let code = match self.draw_code(&business_id, &prefix, &existing) {
                Ok(code) => code,
                Err(e) => {
                    if let Error::AllocationExhausted { attempts, .. } = &e {
                        self.metrics.record_exhausted(&business_id, *attempts);
                    }
                    return Err(e);
                }
            };
            let qr_code_url = derive_qr_url(&self.config.qr_base_url, &code);

            match self
                .store
                .write_customer_code(customer_id, &business_id, &code, &qr_code_url, Utc::now())
                .await
            {
                Ok(()) => {
                    self.metrics
                        .record_code_assigned(&business_id, code.as_str(), allocations);
                    info!("✓ Assigned code {} to customer {}", code, customer_id);
                    return Ok(Assignment::Assigned { code, qr_code_url });
                }
                Err(e) if e.is_retryable() => {
                    self.metrics.record_collision(&business_id, code.as_str());

                    // A concurrent request may have assigned this very customer
                    if let Some(code) = self
                        .store
                        .fetch_customer(customer_id)
                        .await?
                        .and_then(|c| c.customer_code)
                    {
                        return Ok(Assignment::Existing(code));
                    }

                    if allocations >= max_allocations {
                        return Err(e);
                    }

                    debug!(
                        "Code write collided (allocation {}/{}), refreshing snapshot...",
                        allocations, max_allocations
                    );

                    let delay = collision_delay(self.config.collision_backoff, allocations);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Award points for a purchase and store the transaction.
    ///
    /// `Purchase` applies the class cap only. `Referral` also adds the class
    /// referral bonus. Invalid amounts earn zero points but are still recorded;
    /// NaN and infinite amounts are stored as `0.0`.
    ///
    /// The record and its credit are written by one store call, so an `Err`
    /// leaves the balance untouched.
    ///
    /// # Errors
    ///
    /// - `Error::CustomerNotFound`: unknown customer
    /// - `Error::MissingBusinessAssignment`: customer has no business
    /// - `Error::ClassNotFound`: customer's class no longer exists
    pub async fn record_purchase(
        &self,
        customer_id: &str,
        amount: f64,
        source: PointsSource,
    ) -> Result<PurchaseRecord> {
        let customer = self.require_customer(customer_id).await?;
        let business_id = customer
            .business_id
            .clone()
            .ok_or_else(|| Error::MissingBusinessAssignment(customer_id.to_string()))?;

        let amount = if amount.is_finite() {
            amount
        } else {
            warn!(
                "Non-finite amount {} for customer {} recorded as 0",
                amount, customer_id
            );
            0.0
        };

        let features = match &customer.class_id {
            Some(class_id) => Some(self.require_class(class_id).await?.features),
            None => None,
        };
        let features = match source {
            PointsSource::Referral => features,
            PointsSource::Purchase => features.map(|f| ClassFeatures {
                referral_bonus: 0,
                ..f
            }),
        };

        let base_points = self.calculator.calculate_points_from_purchase(amount);
        let awarded_points = self
            .calculator
            .calculate_points_with_bonuses(amount, features.as_ref());

        let recorded_at = Utc::now();
        let record = PurchaseRecord {
            id: format!(
                "{}-{}-{}",
                customer_id,
                recorded_at.timestamp_millis(),
                self.sequence.fetch_add(1, Ordering::Relaxed)
            ),
            customer_id: customer_id.to_string(),
            business_id,
            amount,
            base_points,
            awarded_points,
            source,
            recorded_at,
        };
        self.store.record_purchase(&record).await?;

        self.metrics
            .record_points_awarded(customer_id, awarded_points);
        info!(
            "✓ Awarded {} points to {} for {:.2}",
            awarded_points, customer_id, amount
        );
        Ok(record)
    }

    /// Award points for a purchase made through a scanned QR payload.
    ///
    /// Referral payloads earn the referral bonus; class payloads do not.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidQrPayload`: unparsable payload, or one issued by a
    ///   business the customer does not belong to
    /// - `Error::QrPayloadExpired`: payload expired before `now`
    /// - any error of [`record_purchase`](Self::record_purchase)
    pub async fn record_purchase_from_qr(
        &self,
        customer_id: &str,
        qr_input: &str,
        amount: f64,
        now: DateTime<Utc>,
    ) -> Result<PurchaseRecord> {
        let payload = QrPayload::parse_and_validate(qr_input, now)?;
        let customer = self.require_customer(customer_id).await?;

        if customer.business_id.as_deref() != Some(payload.business_id.as_str()) {
            return Err(Error::InvalidQrPayload(format!(
                "payload for business {} scanned by customer {}",
                payload.business_id, customer_id
            )));
        }

        let source = match payload.kind {
            QrKind::Referral => PointsSource::Referral,
            QrKind::Class => PointsSource::Purchase,
        };
        self.record_purchase(customer_id, amount, source).await
    }

    /// Spend points on a reward from the customer's business catalog.
    ///
    /// # Errors
    ///
    /// - `Error::RewardNotFound`: unknown reward, or one from another business
    /// - `Error::CustomerNotFound`: unknown customer
    /// - `Error::InsufficientPoints`: balance below the reward cost
    pub async fn redeem_reward(&self, customer_id: &str, reward_id: &str) -> Result<Customer> {
        let reward = self
            .store
            .fetch_reward(reward_id)
            .await?
            .ok_or_else(|| Error::RewardNotFound(reward_id.to_string()))?;
        let customer = self.require_customer(customer_id).await?;

        if customer.business_id.as_deref() != Some(reward.business_id.as_str()) {
            return Err(Error::RewardNotFound(reward_id.to_string()));
        }

        let updated = self
            .store
            .apply_points(customer_id, PointsDelta::Redeem(reward.cost_points))
            .await?;

        self.metrics
            .record_redemption(customer_id, reward_id, reward.cost_points);
        info!(
            "✓ Customer {} redeemed {} for {} points",
            customer_id, reward.name, reward.cost_points
        );
        Ok(updated)
    }

    /// Create the default class for a business that has none.
    ///
    /// Returns the created class, or `None` when the business already has
    /// at least one class.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the class registry fails.
    pub async fn ensure_default_class(&self, business_id: &str) -> Result<Option<CustomerClass>> {
        if !self.store.classes_for_business(business_id).await?.is_empty() {
            debug!("Business {} already has classes", business_id);
            return Ok(None);
        }

        let class = CustomerClass::default_for(business_id);
        self.store.insert_class(class.clone()).await?;
        info!("✓ Created default class {} for {}", class.id, business_id);
        Ok(Some(class))
    }

    /// Assign codes to every customer of a business that lacks one.
    ///
    /// Per-customer failures are collected in the report; the batch goes on.
    ///
    /// # Errors
    ///
    /// - `Error::MissingBusinessPrefix`: the business has no prefix, so no
    ///   customer could be assigned
    /// - `Error::NotImplemented`: the store cannot list customers
    pub async fn backfill_missing_codes(&self, business_id: &str) -> Result<BackfillReport> {
        if self.store.business_prefix(business_id).await?.is_none() {
            return Err(Error::MissingBusinessPrefix(business_id.to_string()));
        }

        let mut report = BackfillReport::default();
        for customer in self.store.customers_for_business(business_id).await? {
            if customer.has_existing_code() {
                report.skipped += 1;
                continue;
            }

            match self.assign_customer_code(&customer.id).await {
                Ok(Assignment::Assigned { .. }) => report.assigned += 1,
                Ok(Assignment::Existing(_)) => report.skipped += 1,
                Err(e) => {
                    warn!("Backfill failed for customer {}: {}", customer.id, e);
                    report.failed.push((customer.id, e));
                }
            }
        }

        info!(
            "Backfill for {}: {} assigned, {} skipped, {} failed",
            business_id,
            report.assigned,
            report.skipped,
            report.failed.len()
        );
        Ok(report)
    }

    /// Transactions whose stored base points disagree with the current rate.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotImplemented` if the store cannot list purchases.
    pub async fn audit_purchases(&self, business_id: &str) -> Result<Vec<PurchaseRecord>> {
        let stale: Vec<PurchaseRecord> = self
            .store
            .purchases_for_business(business_id)
            .await?
            .into_iter()
            .filter(|r| {
                !self
                    .calculator
                    .validate_points_calculation(r.base_points, r.amount)
            })
            .collect();

        if !stale.is_empty() {
            warn!(
                "{} purchase(s) in {} do not match {}",
                stale.len(),
                business_id,
                self.calculator.rate_display()
            );
        }
        Ok(stale)
    }

    fn draw_code(
        &self,
        business_id: &str,
        prefix: &str,
        existing: &HashSet<String>,
    ) -> Result<CustomerCode> {
        let mut source = self
            .source
            .lock()
            .map_err(|_| Error::Other("suffix source lock poisoned".to_string()))?;
        self.allocator
            .allocate(business_id, prefix, existing, source.as_mut())
    }

    async fn require_customer(&self, customer_id: &str) -> Result<Customer> {
        self.store
            .fetch_customer(customer_id)
            .await?
            .ok_or_else(|| Error::CustomerNotFound(customer_id.to_string()))
    }

    async fn require_class(&self, class_id: &str) -> Result<CustomerClass> {
        self.store
            .fetch_class(class_id)
            .await?
            .ok_or_else(|| Error::ClassNotFound(class_id.to_string()))
    }
}

/// Delay before the allocation following `allocation` collided.
fn collision_delay(base: Duration, allocation: u32) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    2_u32
        .checked_pow(allocation.saturating_sub(1))
        .and_then(|factor| base.checked_mul(factor))
        .map_or(MAX_COLLISION_BACKOFF, |delay| delay.min(MAX_COLLISION_BACKOFF))
}
