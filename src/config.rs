//! Service configuration.
//!
//! Defaults match the standard deployment. Each value can be overridden in
//! code with the builder setters or from the environment with
//! [`LoyaltyConfig::from_env`].

use crate::code::DEFAULT_MAX_ATTEMPTS;
use crate::error::{Error, Result};
use crate::points::DEFAULT_POINTS_PER_DOLLAR;
use std::str::FromStr;
use std::time::Duration;

/// Default base for customer QR links.
pub const DEFAULT_QR_BASE_URL: &str = "https://example.com/customer";

/// Default number of write-conflict retries per assignment.
pub const DEFAULT_COLLISION_RETRIES: u32 = 3;

/// Upper bound on a single collision backoff, however many retries ran.
pub const MAX_COLLISION_BACKOFF: Duration = Duration::from_secs(5);

/// Configuration for [`LoyaltyService`](crate::LoyaltyService).
#[derive(Clone, Debug, PartialEq)]
pub struct LoyaltyConfig {
    /// Earning rate applied to every purchase.
    pub points_per_dollar: u32,

    /// Base URL customer codes are appended to.
    pub qr_base_url: String,

    /// Draws per allocation before `AllocationExhausted`.
    pub max_allocation_attempts: u32,

    /// Extra allocations after a `CodeCollision` (0 = no retry).
    pub collision_retries: u32,

    /// Base delay between collision retries, doubled on each retry up to
    /// [`MAX_COLLISION_BACKOFF`].
    pub collision_backoff: Duration,
}

impl Default for LoyaltyConfig {
    fn default() -> Self {
        LoyaltyConfig {
            points_per_dollar: DEFAULT_POINTS_PER_DOLLAR,
            qr_base_url: DEFAULT_QR_BASE_URL.to_string(),
            max_allocation_attempts: DEFAULT_MAX_ATTEMPTS,
            collision_retries: DEFAULT_COLLISION_RETRIES,
            collision_backoff: Duration::from_millis(50),
        }
    }
}

impl LoyaltyConfig {
    pub fn with_points_per_dollar(mut self, rate: u32) -> Self {
        self.points_per_dollar = rate;
        self
    }

    pub fn with_qr_base_url(mut self, url: impl Into<String>) -> Self {
        self.qr_base_url = url.into();
        self
    }

    pub fn with_max_allocation_attempts(mut self, attempts: u32) -> Self {
        self.max_allocation_attempts = attempts;
        self
    }

    pub fn with_collision_retries(mut self, retries: u32) -> Self {
        self.collision_retries = retries;
        self
    }

    pub fn with_collision_backoff(mut self, backoff: Duration) -> Self {
        self.collision_backoff = backoff;
        self
    }

    /// Defaults overridden by environment variables.
    ///
    /// - `REDEEM_POINTS_PER_DOLLAR`
    /// - `REDEEM_QR_BASE_URL`
    /// - `REDEEM_MAX_ALLOCATION_ATTEMPTS`
    /// - `REDEEM_COLLISION_RETRIES`
    /// - `REDEEM_COLLISION_BACKOFF_MS`
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if a variable is set but unparsable, or the
    /// resulting configuration fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = LoyaltyConfig::default();

        if let Some(rate) = parse_var(&lookup, "REDEEM_POINTS_PER_DOLLAR")? {
            config.points_per_dollar = rate;
        }
        if let Some(url) = lookup("REDEEM_QR_BASE_URL") {
            config.qr_base_url = url;
        }
        if let Some(attempts) = parse_var(&lookup, "REDEEM_MAX_ALLOCATION_ATTEMPTS")? {
            config.max_allocation_attempts = attempts;
        }
        if let Some(retries) = parse_var(&lookup, "REDEEM_COLLISION_RETRIES")? {
            config.collision_retries = retries;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "REDEEM_COLLISION_BACKOFF_MS")? {
            config.collision_backoff = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` for a zero rate, a zero attempt budget or
    /// a base URL that does not parse.
    pub fn validate(&self) -> Result<()> {
        if self.points_per_dollar == 0 {
            return Err(Error::ConfigError(
                "points_per_dollar must be greater than 0".to_string(),
            ));
        }
        if self.max_allocation_attempts == 0 {
            return Err(Error::ConfigError(
                "max_allocation_attempts must be greater than 0".to_string(),
            ));
        }
        url::Url::parse(&self.qr_base_url).map_err(|e| {
            Error::ConfigError(format!("invalid qr_base_url {}: {}", self.qr_base_url, e))
        })?;
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::ConfigError(format!("{} has invalid value {:?}", key, raw))),
    }
}
