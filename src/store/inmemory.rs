//! In-memory store (default, thread-safe, async).
//!
//! Uses DashMap tables with per-key sharding. Clones share the same tables,
//! so one store can back a whole test or a single-process deployment.

use super::{BusinessRegistry, ClassRegistry, CustomerStore};
use crate::code::CustomerCode;
use crate::entity::{Business, Customer, CustomerClass, PointsDelta, PurchaseRecord, Reward};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

/// Thread-safe in-memory implementation of every persistence collaborator.
///
/// Code uniqueness is enforced per business on the issued-code table entry,
/// so concurrent [`write_customer_code`](CustomerStore::write_customer_code)
/// calls for the same code cannot both succeed.
///
/// # Example
///
/// ```no_run
/// use redeem_kit::entity::{Business, Customer};
/// use redeem_kit::store::{CustomerStore, InMemoryStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemoryStore::new();
///     store.insert_business(Business::new("biz_1", "Bakery").with_prefix("BAK"));
///     store.insert_customer(Customer::new("cust_1").with_business("biz_1"));
///
///     let customer = store.fetch_customer("cust_1").await?;
///     assert!(customer.is_some());
///     Ok(())
/// }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryStore {
    customers: Arc<DashMap<String, Customer>>,
    issued: Arc<DashMap<String, HashSet<String>>>,
    businesses: Arc<DashMap<String, Business>>,
    classes: Arc<DashMap<String, CustomerClass>>,
    rewards: Arc<DashMap<String, Reward>>,
    purchases: Arc<DashMap<String, PurchaseRecord>>,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a customer.
    ///
    /// A customer that already carries a code has it registered as issued.
    pub fn insert_customer(&self, customer: Customer) {
        if let (Some(business_id), Some(code)) = (&customer.business_id, &customer.customer_code) {
            self.issued
                .entry(business_id.clone())
                .or_default()
                .insert(code.as_str().to_string());
        }
        self.customers.insert(customer.id.clone(), customer);
    }

    pub fn insert_business(&self, business: Business) {
        self.businesses.insert(business.id.clone(), business);
    }

    pub fn insert_reward(&self, reward: Reward) {
        self.rewards.insert(reward.id.clone(), reward);
    }

    /// Mark a code as issued without attaching it to a customer.
    ///
    /// Returns `false` if the code was already issued.
    pub fn reserve_code(&self, business_id: &str, code: &str) -> bool {
        self.issued
            .entry(business_id.to_string())
            .or_default()
            .insert(code.to_string())
    }

    /// Number of customers stored.
    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    /// Table statistics.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            customers: self.customers.len(),
            customers_with_code: self
                .customers
                .iter()
                .filter(|c| c.has_existing_code())
                .count(),
            issued_codes: self.issued.iter().map(|e| e.len()).sum(),
            businesses: self.businesses.len(),
            classes: self.classes.len(),
            purchases: self.purchases.len(),
        }
    }

    /// Print store statistics to debug log.
    pub fn log_stats(&self) {
        let stats = self.stats();
        debug!(
            "Store Stats: {} customers ({} with code), {} issued codes, {} businesses, {} classes, {} purchases",
            stats.customers,
            stats.customers_with_code,
            stats.issued_codes,
            stats.businesses,
            stats.classes,
            stats.purchases
        );
    }

    /// Remove everything.
    pub fn clear_all(&self) {
        self.customers.clear();
        self.issued.clear();
        self.businesses.clear();
        self.classes.clear();
        self.rewards.clear();
        self.purchases.clear();
        warn!("⚠ InMemory CLEAR_ALL executed - all records removed!");
    }
}

impl CustomerStore for InMemoryStore {
    async fn fetch_customer(&self, customer_id: &str) -> Result<Option<Customer>> {
        Ok(self.customers.get(customer_id).map(|c| c.clone()))
    }

    async fn issued_codes(&self, business_id: &str) -> Result<HashSet<String>> {
        let codes = self
            .issued
            .get(business_id)
            .map(|set| set.clone())
            .unwrap_or_default();
        debug!(
            "✓ InMemory ISSUED_CODES {} -> {} codes",
            business_id,
            codes.len()
        );
        Ok(codes)
    }

    async fn write_customer_code(
        &self,
        customer_id: &str,
        business_id: &str,
        code: &CustomerCode,
        qr_code_url: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut customer = self
            .customers
            .get_mut(customer_id)
            .ok_or_else(|| Error::CustomerNotFound(customer_id.to_string()))?;

        if let Some(existing) = &customer.customer_code {
            return Err(Error::CodeCollision {
                business_id: business_id.to_string(),
                code: existing.as_str().to_string(),
            });
        }

        let mut issued = self.issued.entry(business_id.to_string()).or_default();
        if !issued.insert(code.as_str().to_string()) {
            debug!("✗ InMemory WRITE_CODE {} -> taken in {}", code, business_id);
            return Err(Error::CodeCollision {
                business_id: business_id.to_string(),
                code: code.as_str().to_string(),
            });
        }

        customer.customer_code = Some(code.clone());
        customer.qr_code_url = Some(qr_code_url.to_string());
        customer.updated_at = updated_at;
        debug!("✓ InMemory WRITE_CODE {} -> {}", customer_id, code);
        Ok(())
    }

    async fn apply_points(&self, customer_id: &str, delta: PointsDelta) -> Result<Customer> {
        let mut customer = self
            .customers
            .get_mut(customer_id)
            .ok_or_else(|| Error::CustomerNotFound(customer_id.to_string()))?;

        match delta {
            PointsDelta::Earn(points) => {
                customer.points = customer.points.saturating_add(points);
                customer.total_earned = customer.total_earned.saturating_add(points);
            }
            PointsDelta::Redeem(points) => {
                if customer.points < points {
                    return Err(Error::InsufficientPoints {
                        available: customer.points,
                        required: points,
                    });
                }
                customer.points -= points;
                customer.total_redeemed = customer.total_redeemed.saturating_add(points);
            }
        }
        customer.updated_at = Utc::now();

        debug!("✓ InMemory APPLY_POINTS {} {:?}", customer_id, delta);
        Ok(customer.clone())
    }

    async fn record_purchase(&self, record: &PurchaseRecord) -> Result<Customer> {
        // Customer entry stays locked until the record is in place
        let mut customer = self
            .customers
            .get_mut(&record.customer_id)
            .ok_or_else(|| Error::CustomerNotFound(record.customer_id.clone()))?;

        self.purchases.insert(record.id.clone(), record.clone());
        customer.points = customer.points.saturating_add(record.awarded_points);
        customer.total_earned = customer.total_earned.saturating_add(record.awarded_points);
        customer.updated_at = Utc::now();

        debug!(
            "✓ InMemory RECORD_PURCHASE {} -> +{} points",
            record.id, record.awarded_points
        );
        Ok(customer.clone())
    }

    async fn customers_for_business(&self, business_id: &str) -> Result<Vec<Customer>> {
        Ok(self
            .customers
            .iter()
            .filter(|c| c.business_id.as_deref() == Some(business_id))
            .map(|c| c.clone())
            .collect())
    }

    async fn purchases_for_business(&self, business_id: &str) -> Result<Vec<PurchaseRecord>> {
        let mut records: Vec<PurchaseRecord> = self
            .purchases
            .iter()
            .filter(|p| p.business_id == business_id)
            .map(|p| p.clone())
            .collect();
        records.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }
}

impl BusinessRegistry for InMemoryStore {
    async fn fetch_business(&self, business_id: &str) -> Result<Option<Business>> {
        Ok(self.businesses.get(business_id).map(|b| b.clone()))
    }

    async fn listed_businesses(&self) -> Result<Vec<Business>> {
        let mut listed: Vec<Business> = self
            .businesses
            .iter()
            .filter(|b| b.is_listed())
            .map(|b| b.clone())
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }
}

impl ClassRegistry for InMemoryStore {
    async fn fetch_class(&self, class_id: &str) -> Result<Option<CustomerClass>> {
        Ok(self.classes.get(class_id).map(|c| c.clone()))
    }

    async fn classes_for_business(&self, business_id: &str) -> Result<Vec<CustomerClass>> {
        Ok(self
            .classes
            .iter()
            .filter(|c| c.business_id == business_id)
            .map(|c| c.clone())
            .collect())
    }

    async fn insert_class(&self, class: CustomerClass) -> Result<()> {
        debug!("✓ InMemory INSERT_CLASS {}", class.id);
        self.classes.insert(class.id.clone(), class);
        Ok(())
    }

    async fn fetch_reward(&self, reward_id: &str) -> Result<Option<Reward>> {
        Ok(self.rewards.get(reward_id).map(|r| r.clone()))
    }
}

/// Store statistics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreStats {
    pub customers: usize,
    pub customers_with_code: usize,
    pub issued_codes: usize,
    pub businesses: usize,
    pub classes: usize,
    pub purchases: usize,
}
