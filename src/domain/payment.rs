use crate::domain::money::Money;
use crate::domain::order::OrderId;
use crate::error::{CheckoutError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    MobileMoney,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cash => f.write_str("Cash"),
            Self::MobileMoney => f.write_str("Mobile money"),
        }
    }
}

/// A phone number normalised to international digits without `+`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Accepts a local number (`0` + 9 digits) or an international one
    /// (optional `+`, 10 to 15 digits). Spaces and dashes are ignored.
    /// Local numbers get `country_code` in place of the leading zero.
    pub fn parse(input: &str, country_code: &str) -> Result<Self> {
        let invalid = || CheckoutError::InvalidPhoneNumber(input.to_string());
        let compact: String = input
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-'))
            .collect();
        let (international, digits) = match compact.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, compact.as_str()),
        };
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        if digits.starts_with('0') {
            if international || digits.len() != 10 {
                return Err(invalid());
            }
            return Ok(Self(format!("{country_code}{}", &digits[1..])));
        }
        if !(10..=15).contains(&digits.len()) {
            return Err(invalid());
        }
        Ok(Self(digits.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier the gateway assigns to one push; used to query its status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalRef(String);

impl ExternalRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Gateway result code. Gateways send it either as a string or a number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResultCode(String);

impl<'de> Deserialize<'de> for ResultCode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(code) => Self(code.trim().to_string()),
            Raw::Number(code) => Self(code.to_string()),
        })
    }
}

/// What a result code means for the push it was returned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Pending,
    Declined,
    TimedOut,
    /// Not in the table. Handled like `Pending`.
    Unrecognised,
}

impl ResultCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn verdict(&self) -> Verdict {
        match self.0.as_str() {
            "0" => Verdict::Success,
            "4999" | "500.001.1001" => Verdict::Pending,
            "1037" => Verdict::TimedOut,
            // cancelled by user, insufficient funds, wrong PIN, expired, system errors
            "1032" | "1" | "2001" | "1019" | "1025" | "9999" | "1001" => Verdict::Declined,
            _ => Verdict::Unrecognised,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One status query answer from the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayStatus {
    #[serde(alias = "ResultCode", alias = "errorCode")]
    pub result_code: ResultCode,
    #[serde(alias = "ResultDesc", alias = "errorMessage", default)]
    pub result_description: String,
}

impl GatewayStatus {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            result_code: ResultCode::new(code),
            result_description: description.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum AttemptState {
    Pending,
    Settled,
    Failed,
    Abandoned,
}

/// How the customer paid, with the method-specific details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Tender {
    Cash {
        tendered: Money,
        change: Money,
    },
    MobileMoney {
        phone: PhoneNumber,
        external_ref: ExternalRef,
    },
}

/// One try at collecting payment for an order.
///
/// Retrying mobile money after a failure creates a new attempt for the same
/// order; only one attempt per order can end up `Settled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub order_id: OrderId,
    pub amount: Money,
    pub tender: Tender,
    pub state: AttemptState,
    pub started_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
}

impl PaymentAttempt {
    pub fn method(&self) -> PaymentMethod {
        match self.tender {
            Tender::Cash { .. } => PaymentMethod::Cash,
            Tender::MobileMoney { .. } => PaymentMethod::MobileMoney,
        }
    }

    pub fn external_ref(&self) -> Option<&ExternalRef> {
        match &self.tender {
            Tender::MobileMoney { external_ref, .. } => Some(external_ref),
            Tender::Cash { .. } => None,
        }
    }
}
