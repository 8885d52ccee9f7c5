//! Human-readable order numbers.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SUFFIX_LEN: usize = 8;

/// A globally unique, time-prefixed order number: `YYYYMMDD` followed by
/// eight upper-case alphanumerics, e.g. `20240131K7Q2ZP0A`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Total length of a generated order number.
    pub const LEN: usize = 8 + SUFFIX_LEN;

    /// Wraps an existing order number without validation.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generates a new order number for today's date (UTC).
    pub fn generate() -> Self {
        Self::generate_on(Utc::now().date_naive())
    }

    /// Generates a new order number for the given date.
    pub fn generate_on(date: NaiveDate) -> Self {
        let entropy = Uuid::new_v4();
        let mut value = date.format("%Y%m%d").to_string();
        value.reserve(SUFFIX_LEN);
        for byte in entropy.as_bytes().iter().take(SUFFIX_LEN) {
            value.push(ALPHABET[*byte as usize % ALPHABET.len()] as char);
        }
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderNumber {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for OrderNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
