//! QR payload contract.
//!
//! Two things end up inside a scannable code:
//!
//! - a customer's personal link, `"<base>?code=<customer code>"`, built by
//!   [`derive_qr_url`] and stored next to the code itself;
//! - a [`QrPayload`] describing a class or referral offer, carried either as a
//!   query string or as JSON embedded in the image.
//!
//! Image encoding is out of scope here: this module only builds and parses the
//! text that goes into the image.

use crate::code::CustomerCode;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Build a customer's QR link from the configured base URL.
pub fn derive_qr_url(base: &str, code: &CustomerCode) -> String {
    format!("{}?code={}", base, code)
}

/// Extract the customer code from a link built by [`derive_qr_url`].
///
/// # Errors
///
/// Returns `Error::InvalidQrPayload` if the URL is malformed or has no `code`.
pub fn code_from_qr_url(input: &str) -> Result<String> {
    let url = Url::parse(input)?;
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::InvalidQrPayload("missing code parameter".to_string()))
}

/// What scanning the payload grants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QrKind {
    /// Join a customer class.
    Class,
    /// Join through a referral; earns the class referral bonus.
    Referral,
}

impl fmt::Display for QrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QrKind::Class => write!(f, "class"),
            QrKind::Referral => write!(f, "referral"),
        }
    }
}

impl FromStr for QrKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "class" => Ok(QrKind::Class),
            "referral" => Ok(QrKind::Referral),
            other => Err(Error::InvalidQrPayload(format!("unknown type: {}", other))),
        }
    }
}

/// Offer payload shown by a business and scanned by a customer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    pub business_id: String,
    pub class_id: String,
    pub business_name: String,
    pub class_name: String,
    #[serde(rename = "type")]
    pub kind: QrKind,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl QrPayload {
    pub fn new(
        business_id: impl Into<String>,
        class_id: impl Into<String>,
        business_name: impl Into<String>,
        class_name: impl Into<String>,
        kind: QrKind,
    ) -> Self {
        QrPayload {
            business_id: business_id.into(),
            class_id: class_id.into(),
            business_name: business_name.into(),
            class_name: class_name.into(),
            kind,
            expiry: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Reject payloads whose expiry lies before `now`.
    ///
    /// # Errors
    ///
    /// Returns `Error::QrPayloadExpired`.
    pub fn validate_at(&self, now: DateTime<Utc>) -> Result<()> {
        match self.expiry {
            Some(expiry) if expiry < now => Err(Error::QrPayloadExpired),
            _ => Ok(()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// # Errors
    ///
    /// Returns `Error::InvalidQrPayload` for malformed JSON or missing fields.
    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| Error::InvalidQrPayload(e.to_string()))
    }

    /// Encode as a query string on `base`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidQrPayload` if `base` is not a valid URL.
    pub fn to_url(&self, base: &str) -> Result<String> {
        let timestamp = self.timestamp.timestamp_millis().to_string();
        let expiry = self.expiry.map(|e| e.timestamp_millis().to_string());
        let kind = self.kind.to_string();

        let mut params: Vec<(&str, &str)> = vec![
            ("businessId", self.business_id.as_str()),
            ("classId", self.class_id.as_str()),
            ("businessName", self.business_name.as_str()),
            ("className", self.class_name.as_str()),
            ("type", kind.as_str()),
            ("timestamp", timestamp.as_str()),
        ];
        if let Some(expiry) = &expiry {
            params.push(("expiry", expiry.as_str()));
        }

        Ok(Url::parse_with_params(base, &params)?.to_string())
    }

    /// Decode a payload produced by [`QrPayload::to_url`].
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidQrPayload` for a malformed URL, a missing field,
    /// an unknown type or an unparsable timestamp.
    pub fn from_url(input: &str) -> Result<Self> {
        let url = Url::parse(input)?;
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        let field = |name: &str| -> Result<String> {
            params
                .get(name)
                .cloned()
                .ok_or_else(|| Error::InvalidQrPayload(format!("missing {}", name)))
        };

        let expiry = match params.get("expiry") {
            Some(raw) => Some(parse_millis(raw)?),
            None => None,
        };

        Ok(QrPayload {
            business_id: field("businessId")?,
            class_id: field("classId")?,
            business_name: field("businessName")?,
            class_name: field("className")?,
            kind: field("type")?.parse()?,
            expiry,
            timestamp: parse_millis(&field("timestamp")?)?,
        })
    }

    /// Parse either encoding and check expiry against `now`.
    ///
    /// # Errors
    ///
    /// Any parse error, or `Error::QrPayloadExpired`.
    pub fn parse_and_validate(input: &str, now: DateTime<Utc>) -> Result<Self> {
        let trimmed = input.trim();
        let payload = if trimmed.starts_with('{') {
            QrPayload::from_json(trimmed)?
        } else {
            QrPayload::from_url(trimmed)?
        };
        payload.validate_at(now)?;
        Ok(payload)
    }
}

fn parse_millis(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| Error::InvalidQrPayload(format!("bad timestamp: {}", raw)))
}
