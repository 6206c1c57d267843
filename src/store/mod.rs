//! Persistence collaborators.
//!
//! The loyalty core never talks to a database directly. Implement these traits
//! for your document store (Firestore, Postgres, DynamoDB, ...) and hand the
//! implementation to [`LoyaltyService`](crate::LoyaltyService).
//!
//! **IMPORTANT:** All methods take `&self`. Implementations should use interior
//! mutability or external storage so one store can serve concurrent requests.
//!
//! **UNIQUENESS:** [`CustomerStore::write_customer_code`] must be a conditional
//! write. The allocator only sees a snapshot of issued codes, so the store is
//! the last line that keeps codes unique within a business.

use crate::code::CustomerCode;
use crate::entity::{Business, Customer, CustomerClass, PointsDelta, PurchaseRecord, Reward};
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

#[cfg(feature = "inmemory")]
pub mod inmemory;

#[cfg(feature = "inmemory")]
pub use inmemory::{InMemoryStore, StoreStats};

/// Customer/user store.
#[allow(async_fn_in_trait)]
pub trait CustomerStore: Send + Sync {
    /// Fetch a customer by ID.
    ///
    /// # Returns
    /// - `Ok(Some(customer))` - Customer found
    /// - `Ok(None)` - Customer not found (not an error)
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable
    async fn fetch_customer(&self, customer_id: &str) -> Result<Option<Customer>>;

    /// Snapshot of every code already issued within a business.
    ///
    /// May be stale by the time the caller writes back.
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable
    async fn issued_codes(&self, business_id: &str) -> Result<HashSet<String>>;

    /// Atomically store `{customer_code, qr_code_url, updated_at}` on a customer.
    ///
    /// # Errors
    /// - `Error::CodeCollision` if the code is already issued within the
    ///   business, or the customer already holds a code
    /// - `Error::CustomerNotFound` if the customer does not exist
    /// - `Error::RepositoryError` on store failure
    async fn write_customer_code(
        &self,
        customer_id: &str,
        business_id: &str,
        code: &CustomerCode,
        qr_code_url: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Apply a balance change and return the updated customer.
    ///
    /// # Errors
    /// - `Error::CustomerNotFound` if the customer does not exist
    /// - `Error::InsufficientPoints` if a redemption exceeds the balance
    async fn apply_points(&self, customer_id: &str, delta: PointsDelta) -> Result<Customer>;

    /// Persist an awarded transaction and credit its `awarded_points` to the
    /// customer in the same write. Returns the updated customer.
    ///
    /// Either both the record and the credit land or neither does, so a
    /// failed call can be retried without double-awarding.
    ///
    /// # Errors
    /// - `Error::CustomerNotFound` if the customer does not exist
    /// - `Error::RepositoryError` if the store is unavailable
    async fn record_purchase(&self, record: &PurchaseRecord) -> Result<Customer>;

    /// All customers of a business (optional, used by batch jobs).
    ///
    /// # Errors
    /// Returns `Err` if not implemented or if the store fails
    async fn customers_for_business(&self, _business_id: &str) -> Result<Vec<Customer>> {
        Err(crate::error::Error::NotImplemented(
            "customers_for_business not implemented for this store".to_string(),
        ))
    }

    /// All recorded transactions of a business (optional, used by audits).
    ///
    /// # Errors
    /// Returns `Err` if not implemented or if the store fails
    async fn purchases_for_business(&self, _business_id: &str) -> Result<Vec<PurchaseRecord>> {
        Err(crate::error::Error::NotImplemented(
            "purchases_for_business not implemented for this store".to_string(),
        ))
    }

    /// Health check - verify the store is reachable.
    ///
    /// # Errors
    /// Returns `Err` if the store is not accessible
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Business registry.
#[allow(async_fn_in_trait)]
pub trait BusinessRegistry: Send + Sync {
    /// Fetch a business by ID.
    ///
    /// # Errors
    /// Returns `Err` if the registry is unavailable
    async fn fetch_business(&self, business_id: &str) -> Result<Option<Business>>;

    /// Customer-code prefix registered for a business.
    ///
    /// Default implementation reads [`Business::prefix`].
    ///
    /// # Errors
    /// Returns `Err` if the registry is unavailable
    async fn business_prefix(&self, business_id: &str) -> Result<Option<String>> {
        Ok(self
            .fetch_business(business_id)
            .await?
            .and_then(|b| b.prefix)
            .filter(|p| !p.is_empty()))
    }

    /// Businesses that are approved and visible.
    ///
    /// # Errors
    /// Returns `Err` if not implemented or if the registry fails
    async fn listed_businesses(&self) -> Result<Vec<Business>> {
        Err(crate::error::Error::NotImplemented(
            "listed_businesses not implemented for this registry".to_string(),
        ))
    }
}

/// Customer-class and reward catalog registry.
#[allow(async_fn_in_trait)]
pub trait ClassRegistry: Send + Sync {
    /// Fetch a class by ID.
    ///
    /// # Errors
    /// Returns `Err` if the registry is unavailable
    async fn fetch_class(&self, class_id: &str) -> Result<Option<CustomerClass>>;

    /// All classes defined by a business.
    ///
    /// # Errors
    /// Returns `Err` if the registry is unavailable
    async fn classes_for_business(&self, business_id: &str) -> Result<Vec<CustomerClass>>;

    /// Create or replace a class.
    ///
    /// # Errors
    /// Returns `Err` if the registry is unavailable
    async fn insert_class(&self, class: CustomerClass) -> Result<()>;

    /// Fetch a reward by ID.
    ///
    /// # Errors
    /// Returns `Err` if the registry is unavailable
    async fn fetch_reward(&self, reward_id: &str) -> Result<Option<Reward>>;
}
