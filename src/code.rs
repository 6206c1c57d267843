//! Customer code allocation.
//!
//! A customer code is a short, shareable identifier unique within one business.
//! New codes use the sequential scheme `{prefix}{5 digits}`, e.g. `ABC04217`.
//!
//! Some older records carry codes in the legacy `{id3}-{base36 ts}-{base36 rand}`
//! shape. Those are recognised by [`CodeScheme::detect`] but never issued.
//!
//! # Retry model
//!
//! The allocator draws candidates against a snapshot of the codes already
//! issued for the business. The snapshot can go stale before the caller writes
//! the result back, so the store's conditional write is the real uniqueness
//! check and reports [`Error::CodeCollision`] when a concurrent writer won.
//!
//! ```
//! use redeem_kit::code::{CodeAllocator, RngSource};
//! use std::collections::HashSet;
//!
//! let allocator = CodeAllocator::default();
//! let mut source = RngSource::seeded(7);
//! let code = allocator
//!     .allocate("biz_1", "ABC", &HashSet::new(), &mut source)
//!     .unwrap();
//! assert!(code.as_str().starts_with("ABC"));
//! assert_eq!(code.as_str().len(), 8);
//! ```

use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Default number of draws before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

/// Width of the numeric suffix.
pub const SUFFIX_DIGITS: usize = 5;

/// Largest numeric suffix. Suffixes are drawn from `1..=SUFFIX_SPACE`.
pub const SUFFIX_SPACE: u32 = 99_999;

/// A customer code, unique within its business.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerCode(String);

impl CustomerCode {
    /// Build a sequential-scheme code from a prefix and numeric suffix.
    pub fn sequential(prefix: &str, suffix: u32) -> Self {
        CustomerCode(format!("{}{:0width$}", prefix, suffix, width = SUFFIX_DIGITS))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CustomerCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CustomerCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Known customer code layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeScheme {
    /// `{prefix}{5 digits}`, the only scheme new codes are issued in.
    Sequential,

    /// `{id3}-{base36 timestamp}-{base36 random}`. Read-only.
    LegacyTimestamp,
}

impl CodeScheme {
    /// Identify the layout of a stored code, if it matches either scheme.
    pub fn detect(code: &str, prefix: &str) -> Option<CodeScheme> {
        if let Some(digits) = code.strip_prefix(prefix) {
            if !prefix.is_empty()
                && digits.len() == SUFFIX_DIGITS
                && digits.bytes().all(|b| b.is_ascii_digit())
            {
                return Some(CodeScheme::Sequential);
            }
        }

        let parts: Vec<&str> = code.split('-').collect();
        let is_base36 = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric());
        if parts.len() == 3
            && parts[0].chars().count() == 3
            && parts.iter().copied().all(is_base36)
        {
            return Some(CodeScheme::LegacyTimestamp);
        }

        None
    }

    /// Whether new codes may be issued in this scheme.
    pub fn is_issuable(&self) -> bool {
        matches!(self, CodeScheme::Sequential)
    }
}

impl fmt::Display for CodeScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeScheme::Sequential => write!(f, "Sequential"),
            CodeScheme::LegacyTimestamp => write!(f, "LegacyTimestamp"),
        }
    }
}

/// Source of numeric code suffixes.
///
/// Implementations return a value in `1..=upper`. Inject a deterministic
/// source in tests; production uses [`RngSource`].
pub trait SuffixSource {
    fn draw(&mut self, upper: u32) -> u32;
}

/// Adapts any `rand` generator into a [`SuffixSource`].
pub struct RngSource<R: RngCore>(pub R);

impl RngSource<StdRng> {
    /// Deterministic source for reproducible allocation.
    pub fn seeded(seed: u64) -> Self {
        RngSource(StdRng::seed_from_u64(seed))
    }

    /// Source seeded from the operating system.
    pub fn from_os_rng() -> Self {
        RngSource(StdRng::from_os_rng())
    }
}

impl<R: RngCore> SuffixSource for RngSource<R> {
    fn draw(&mut self, upper: u32) -> u32 {
        self.0.random_range(1..=upper.max(1))
    }
}

/// Draws collision-free customer codes against a snapshot of issued codes.
///
/// Holds no state between calls. Checking whether the customer already owns
/// a code is the caller's job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodeAllocator {
    max_attempts: u32,
}

impl CodeAllocator {
    pub fn new(max_attempts: u32) -> Self {
        CodeAllocator { max_attempts }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Draw a code for `business_id` that is absent from `existing`.
    ///
    /// # Errors
    ///
    /// - `Error::MissingBusinessPrefix`: `prefix` is empty
    /// - `Error::AllocationExhausted`: every draw within the budget was taken
    pub fn allocate<S: SuffixSource + ?Sized>(
        &self,
        business_id: &str,
        prefix: &str,
        existing: &HashSet<String>,
        source: &mut S,
    ) -> Result<CustomerCode> {
        if prefix.is_empty() {
            return Err(Error::MissingBusinessPrefix(business_id.to_string()));
        }

        for _ in 0..self.max_attempts {
            let candidate = CustomerCode::sequential(prefix, source.draw(SUFFIX_SPACE));
            if !existing.contains(candidate.as_str()) {
                return Ok(candidate);
            }
        }

        Err(Error::AllocationExhausted {
            business_id: business_id.to_string(),
            attempts: self.max_attempts,
        })
    }
}

impl Default for CodeAllocator {
    fn default() -> Self {
        CodeAllocator::new(DEFAULT_MAX_ATTEMPTS)
    }
}

/// Allocate with the default attempt budget and an OS-seeded source.
///
/// # Errors
///
/// Same as [`CodeAllocator::allocate`].
pub fn allocate_customer_code(
    business_id: &str,
    prefix: &str,
    existing: &HashSet<String>,
) -> Result<CustomerCode> {
    CodeAllocator::default().allocate(business_id, prefix, existing, &mut RngSource::from_os_rng())
}
