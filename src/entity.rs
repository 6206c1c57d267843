//! Domain records exchanged with the persistence collaborators.
//!
//! Field names serialize in camelCase so records round-trip with the
//! document store the web layer already writes.

use crate::code::CustomerCode;
use crate::points::ClassFeatures;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name given to the class created for businesses without one.
pub const DEFAULT_CLASS_NAME: &str = "Standard";

/// A customer enrolled (or about to be enrolled) with a business.
///
/// # Example
///
/// ```
/// use redeem_kit::entity::Customer;
///
/// let customer = Customer::new("cust_1").with_business("biz_1");
/// assert!(!customer.has_existing_code());
/// assert_eq!(customer.points, 0);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub business_id: Option<String>,
    #[serde(default)]
    pub class_id: Option<String>,
    #[serde(default)]
    pub customer_code: Option<CustomerCode>,
    #[serde(default)]
    pub qr_code_url: Option<String>,
    #[serde(default)]
    pub points: u64,
    #[serde(default)]
    pub total_earned: u64,
    #[serde(default)]
    pub total_redeemed: u64,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(id: impl Into<String>) -> Self {
        Customer {
            id: id.into(),
            business_id: None,
            class_id: None,
            customer_code: None,
            qr_code_url: None,
            points: 0,
            total_earned: 0,
            total_redeemed: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_business(mut self, business_id: impl Into<String>) -> Self {
        self.business_id = Some(business_id.into());
        self
    }

    pub fn with_class(mut self, class_id: impl Into<String>) -> Self {
        self.class_id = Some(class_id.into());
        self
    }

    pub fn with_points(mut self, points: u64) -> Self {
        self.points = points;
        self
    }

    /// Codes are issued once and never replaced.
    pub fn has_existing_code(&self) -> bool {
        self.customer_code.is_some()
    }
}

/// A business running a loyalty program.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Business {
    pub id: String,
    pub name: String,
    /// Prefix for this business's customer codes.
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub visible: bool,
}

impl Business {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Business {
            id: id.into(),
            name: name.into(),
            prefix: None,
            approved: false,
            visible: false,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn listed(mut self) -> Self {
        self.approved = true;
        self.visible = true;
        self
    }

    /// Shown in customer-facing business pickers.
    pub fn is_listed(&self) -> bool {
        self.approved && self.visible
    }
}

/// A customer class with its earning rules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerClass {
    pub id: String,
    pub business_id: String,
    pub name: String,
    /// Stored inline: `referralBonus` and `maxPointsPerTransaction` sit at
    /// class level next to `specialRewards`.
    #[serde(flatten)]
    pub features: ClassFeatures,
    /// Rate stored on old class documents. Never used for calculation.
    #[serde(default, rename = "pointsPerDollar", skip_serializing_if = "Option::is_none")]
    pub legacy_points_per_dollar: Option<u32>,
    #[serde(default)]
    pub special_rewards: Vec<String>,
}

impl CustomerClass {
    pub fn new(
        id: impl Into<String>,
        business_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        CustomerClass {
            id: id.into(),
            business_id: business_id.into(),
            name: name.into(),
            features: ClassFeatures::default(),
            legacy_points_per_dollar: None,
            special_rewards: Vec::new(),
        }
    }

    pub fn with_features(mut self, features: ClassFeatures) -> Self {
        self.features = features;
        self
    }

    /// The class every business starts with: no bonus, no cap.
    pub fn default_for(business_id: &str) -> Self {
        CustomerClass::new(
            format!("{}_default", business_id),
            business_id,
            DEFAULT_CLASS_NAME,
        )
    }
}

/// A gift-card style reward in a business catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    pub id: String,
    pub business_id: String,
    pub name: String,
    pub cost_points: u64,
}

impl Reward {
    pub fn new(
        id: impl Into<String>,
        business_id: impl Into<String>,
        name: impl Into<String>,
        cost_points: u64,
    ) -> Self {
        Reward {
            id: id.into(),
            business_id: business_id.into(),
            name: name.into(),
            cost_points,
        }
    }
}

/// How points were earned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointsSource {
    /// Regular purchase scanned from a class QR.
    Purchase,
    /// Purchase that arrived through a referral QR.
    Referral,
}

/// One awarded transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub id: String,
    pub customer_id: String,
    pub business_id: String,
    pub amount: f64,
    /// Points from the amount alone, before bonus and cap.
    pub base_points: u64,
    pub awarded_points: u64,
    pub source: PointsSource,
    pub recorded_at: DateTime<Utc>,
}

/// Change to a customer's balance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointsDelta {
    /// Adds to `points` and `total_earned`.
    Earn(u64),
    /// Moves from `points` to `total_redeemed`.
    Redeem(u64),
}
