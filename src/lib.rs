//! # redeem-kit
//!
//! Points accrual, customer code allocation and QR payloads for loyalty
//! programs, independent of any database or web framework.
//!
//! ## Features
//!
//! - **Pure Rules:** [`PointsCalculator`] and [`CodeAllocator`] are
//!   deterministic given their inputs, with the earning rate injected
//! - **Store Agnostic:** Plug in any document store via the
//!   [`CustomerStore`], [`BusinessRegistry`] and [`ClassRegistry`] traits
//! - **Race Aware:** Code writes are conditional; collisions are retried
//!   against a refreshed snapshot
//! - **Typed Errors:** Every failure is an [`Error`] variant the caller
//!   matches on
//!
//! ## Quick Start
//!
//! ### Pure calculation
//!
//! ```
//! use redeem_kit::{ClassFeatures, PointsCalculator};
//!
//! let calc = PointsCalculator::default();
//! assert_eq!(calc.calculate_points_from_purchase(19.99), 199);
//! assert_eq!(calc.rate_display(), "10 points per $1");
//!
//! let gold = ClassFeatures::default().with_referral_bonus(100).with_max_points(400);
//! assert_eq!(calc.calculate_points_with_bonuses(50.0, Some(&gold)), 400);
//! ```
//!
//! ### Service over a store
//!
//! ```ignore
//! use redeem_kit::{LoyaltyConfig, LoyaltyService, entity::PointsSource, store::InMemoryStore};
//!
//! let service = LoyaltyService::new(InMemoryStore::new(), LoyaltyConfig::from_env()?)?;
//!
//! let assignment = service.assign_customer_code("cust_1").await?;
//! println!("share {}", assignment.code());
//!
//! service.record_purchase("cust_1", 42.50, PointsSource::Purchase).await?;
//! service.redeem_reward("cust_1", "gift_card_5").await?;
//! ```

#[macro_use]
extern crate log;

pub mod code;
pub mod config;
pub mod entity;
pub mod error;
pub mod observability;
pub mod points;
pub mod qr;
pub mod service;
pub mod store;

// Re-exports for convenience
pub use code::{allocate_customer_code, CodeAllocator, CustomerCode, RngSource, SuffixSource};
pub use config::LoyaltyConfig;
pub use error::{Error, Result};
pub use points::{ClassFeatures, PointsCalculator};
pub use qr::{derive_qr_url, QrKind, QrPayload};
pub use service::{Assignment, BackfillReport, LoyaltyService};
pub use store::{BusinessRegistry, ClassRegistry, CustomerStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
