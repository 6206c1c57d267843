//! Error types for the loyalty core.

use std::fmt;

/// Result type for loyalty operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the loyalty core.
///
/// All fallible operations return `Result<T>`. The core never logs and drops
/// an error on the caller's behalf: each variant names a condition the caller
/// must decide how to recover from.
///
/// An invalid purchase amount is deliberately *not* an error. The points
/// calculator normalises non-positive and non-finite amounts to zero points.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// No free customer code was drawn within the attempt budget.
    ///
    /// Fatal for this allocation request. The caller may retry the whole
    /// operation later (e.g. on next login) but must not loop within one request.
    AllocationExhausted {
        /// Business whose code space was searched
        business_id: String,
        /// Number of draws made before giving up
        attempts: u32,
    },

    /// The customer has no business assignment, so no code can be scoped.
    MissingBusinessAssignment(String),

    /// The business has no registered code prefix.
    MissingBusinessPrefix(String),

    /// A concurrent writer issued the same code first.
    ///
    /// Raised by the persistence layer's conditional write.
    ///
    /// **Recovery:** refresh the issued-code snapshot and allocate again.
    CodeCollision {
        /// Business in which the code is already taken
        business_id: String,
        /// The contested code
        code: String,
    },

    /// Customer record not found.
    CustomerNotFound(String),

    /// Customer class record not found.
    ClassNotFound(String),

    /// Reward record not found.
    RewardNotFound(String),

    /// Balance too low for a redemption.
    InsufficientPoints {
        /// Current spendable balance
        available: u64,
        /// Cost of the reward
        required: u64,
    },

    /// QR payload could not be parsed or is missing fields.
    InvalidQrPayload(String),

    /// QR payload expiry lies in the past.
    QrPayloadExpired,

    /// Serialization of a payload or record failed.
    SerializationError(String),

    /// Persistence collaborator failed (connection, query, timeout).
    ///
    /// **Recovery:** retry after the store recovers.
    RepositoryError(String),

    /// Invalid configuration value.
    ConfigError(String),

    /// Operation not supported by this store.
    NotImplemented(String),

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// Whether the caller should refresh its snapshot and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::CodeCollision { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AllocationExhausted {
                business_id,
                attempts,
            } => write!(
                f,
                "Allocation exhausted: no free code for business {} after {} attempts",
                business_id, attempts
            ),
            Error::MissingBusinessAssignment(id) => {
                write!(f, "Missing business assignment for customer {}", id)
            }
            Error::MissingBusinessPrefix(id) => {
                write!(f, "Missing code prefix for business {}", id)
            }
            Error::CodeCollision { business_id, code } => {
                write!(
                    f,
                    "Code collision: {} already issued in business {}",
                    code, business_id
                )
            }
            Error::CustomerNotFound(id) => write!(f, "Customer not found: {}", id),
            Error::ClassNotFound(id) => write!(f, "Customer class not found: {}", id),
            Error::RewardNotFound(id) => write!(f, "Reward not found: {}", id),
            Error::InsufficientPoints {
                available,
                required,
            } => write!(
                f,
                "Insufficient points: {} available, {} required",
                available, required
            ),
            Error::InvalidQrPayload(msg) => write!(f, "Invalid QR payload: {}", msg),
            Error::QrPayloadExpired => write!(f, "QR payload expired"),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::RepositoryError(msg) => write!(f, "Repository error: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::InvalidQrPayload(format!("bad url: {}", e))
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}
