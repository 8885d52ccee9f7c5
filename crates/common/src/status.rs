//! Cart checkout status.

use serde::{Deserialize, Serialize};

/// The checkout status of a cart.
///
/// A cart without a status (`None`) is open. State transitions:
/// ```text
/// (open) ──► OrderProcessing ──► OrderCreated
///    └────────────────────────────────▲
/// ```
/// The synchronous checkout path skips `OrderProcessing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CartStatus {
    /// Checkout has been requested and the create-order event published.
    OrderProcessing,

    /// An order exists for the cart (terminal state).
    OrderCreated,
}

impl CartStatus {
    /// Returns true if a cart with this status may no longer be checked out.
    ///
    /// Every status counts as checked out; only a cart without status is open.
    pub fn excludes_checkout(&self) -> bool {
        matches!(self, CartStatus::OrderProcessing | CartStatus::OrderCreated)
    }

    /// Returns the wire/database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CartStatus::OrderProcessing => "ORDER_PROCESSING",
            CartStatus::OrderCreated => "ORDER_CREATED",
        }
    }
}

impl std::fmt::Display for CartStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown cart status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCartStatus(pub String);

impl std::fmt::Display for UnknownCartStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown cart status '{}'", self.0)
    }
}

impl std::error::Error for UnknownCartStatus {}

impl std::str::FromStr for CartStatus {
    type Err = UnknownCartStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ORDER_PROCESSING" => Ok(CartStatus::OrderProcessing),
            "ORDER_CREATED" => Ok(CartStatus::OrderCreated),
            other => Err(UnknownCartStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_status_excludes_checkout() {
        assert!(CartStatus::OrderProcessing.excludes_checkout());
        assert!(CartStatus::OrderCreated.excludes_checkout());
    }

    #[test]
    fn test_parse_and_display_agree() {
        for status in [CartStatus::OrderProcessing, CartStatus::OrderCreated] {
            assert_eq!(status.to_string().parse::<CartStatus>().unwrap(), status);
        }
        assert!("SHIPPED".parse::<CartStatus>().is_err());
    }

    #[test]
    fn test_serialization_uses_wire_names() {
        let json = serde_json::to_string(&CartStatus::OrderCreated).unwrap();
        assert_eq!(json, "\"ORDER_CREATED\"");
        let parsed: Option<CartStatus> = serde_json::from_str("null").unwrap();
        assert_eq!(parsed, None);
    }
}
