//! Business event types
//!
//! An [`Event`] is created by the ingress once a payload passes validation
//! and is read-only from then on. The same type is what travels over the
//! broker (as JSON) and what the committer writes to the `events` table.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of event kinds accepted by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PageView,
    AddToCart,
    Purchase,
}

impl EventType {
    /// All accepted event types
    pub const ALL: [EventType; 3] = [EventType::PageView, EventType::AddToCart, EventType::Purchase];

    /// Wire/database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PageView => "page_view",
            EventType::AddToCart => "add_to_cart",
            EventType::Purchase => "purchase",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "page_view" => Ok(EventType::PageView),
            "add_to_cart" => Ok(EventType::AddToCart),
            "purchase" => Ok(EventType::Purchase),
            other => Err(ValidationError::UnknownEventType(other.to_string())),
        }
    }
}

/// A validated business event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub order_amount: Option<f64>,
}

/// Raw request body, before the event type is checked against the enumeration
///
/// Kept separate from [`Event`] so an unknown `event_type` is reported as
/// such rather than as a generic deserialization failure.
#[derive(Debug, Deserialize)]
struct EventPayload {
    event_type: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    product_id: Option<String>,
    #[serde(default)]
    order_amount: Option<f64>,
}

impl Event {
    /// Create an event with no product or amount
    pub fn new(event_type: EventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type,
            timestamp,
            product_id: None,
            order_amount: None,
        }
    }

    /// Builder: attach a product id
    pub fn with_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    /// Builder: attach an order amount
    pub fn with_amount(mut self, amount: f64) -> Self {
        self.order_amount = Some(amount);
        self
    }

    /// Parse and validate an ingress request body
    pub fn from_json_slice(body: &[u8]) -> Result<Self, ValidationError> {
        let payload: EventPayload = serde_json::from_slice(body)
            .map_err(|e| ValidationError::MalformedPayload(e.to_string()))?;

        let event_type = payload.event_type.parse::<EventType>()?;

        if let Some(amount) = payload.order_amount {
            if !amount.is_finite() {
                return Err(ValidationError::InvalidField {
                    field: "order_amount",
                    reason: "must be a finite number".into(),
                });
            }
        }

        Ok(Self {
            event_type,
            timestamp: payload.timestamp,
            product_id: payload.product_id,
            order_amount: payload.order_amount,
        })
    }

    /// Serialize for the broker topic
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialize a broker message
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_type_round_trip_names() {
        for ty in EventType::ALL {
            assert_eq!(ty.as_str().parse::<EventType>().unwrap(), ty);
        }
        assert!("refund".parse::<EventType>().is_err());
        assert!("PageView".parse::<EventType>().is_err());
    }

    #[test]
    fn test_parse_valid_purchase() {
        let body = br#"{"event_type":"purchase","timestamp":"2025-10-02T10:30:00Z","product_id":"prod-1","order_amount":49.99}"#;
        let event = Event::from_json_slice(body).unwrap();

        assert_eq!(event.event_type, EventType::Purchase);
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2025, 10, 2, 10, 30, 0).unwrap());
        assert_eq!(event.product_id.as_deref(), Some("prod-1"));
        assert_eq!(event.order_amount, Some(49.99));
    }

    #[test]
    fn test_parse_optional_fields_absent() {
        let body = br#"{"event_type":"page_view","timestamp":"2025-10-02T10:30:00+02:00"}"#;
        let event = Event::from_json_slice(body).unwrap();

        assert_eq!(event.event_type, EventType::PageView);
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2025, 10, 2, 8, 30, 0).unwrap());
        assert!(event.product_id.is_none());
        assert!(event.order_amount.is_none());
    }

    #[test]
    fn test_parse_unknown_event_type() {
        let body = br#"{"event_type":"refund","timestamp":"2025-10-02T10:30:00Z"}"#;
        let err = Event::from_json_slice(body).unwrap_err();
        assert_eq!(err, ValidationError::UnknownEventType("refund".into()));
    }

    #[test]
    fn test_parse_missing_timestamp() {
        let body = br#"{"event_type":"page_view"}"#;
        assert!(matches!(
            Event::from_json_slice(body),
            Err(ValidationError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_parse_bad_timestamp_and_truncated_json() {
        let bad_ts = br#"{"event_type":"page_view","timestamp":"yesterday"}"#;
        assert!(Event::from_json_slice(bad_ts).is_err());

        let truncated = br#"{"event_type": "page_view", "timestamp": "invalid""#;
        assert!(Event::from_json_slice(truncated).is_err());
    }

    #[test]
    fn test_broker_json_shape() {
        let ts = Utc.with_ymd_and_hms(2025, 10, 2, 10, 30, 0).unwrap();
        let event = Event::new(EventType::AddToCart, ts).with_product("sku-9");

        let json = event.to_json().unwrap();
        assert!(json.contains(r#""event_type":"add_to_cart""#));

        let decoded = Event::from_json(&json).unwrap();
        assert_eq!(decoded, event);
    }
}
