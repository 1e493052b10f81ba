//! Integration events announced by the order service.

use common::{OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::order::Order;

/// Event type tag for [`OrderEvent`].
pub const ORDER_CREATED: &str = "ORDER_CREATED";

/// Fact emitted once an order has been committed locally.
///
/// Serialized as a flat JSON object so consumers in other services only need
/// the field names to read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub event_type: String,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub total_price: Money,
}

impl OrderEvent {
    /// Builds the `ORDER_CREATED` event for a committed order.
    pub fn order_created(order: &Order) -> Self {
        Self {
            event_type: ORDER_CREATED.to_string(),
            order_id: order.id,
            user_id: order.user_id,
            product_id: order.product_id,
            quantity: order.quantity,
            total_price: order.total_price,
        }
    }

    /// Serializes the event for transport.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decodes a transport payload.
    ///
    /// Payloads carrying any other `event_type` are returned as
    /// [`DecodedEvent::Other`] without requiring the order fields, so newer
    /// event kinds on the same topic do not fail to parse.
    pub fn decode(bytes: &[u8]) -> serde_json::Result<DecodedEvent> {
        #[derive(Deserialize)]
        struct Probe {
            event_type: String,
        }

        let probe: Probe = serde_json::from_slice(bytes)?;
        if probe.event_type != ORDER_CREATED {
            return Ok(DecodedEvent::Other(probe.event_type));
        }
        Ok(DecodedEvent::OrderCreated(serde_json::from_slice(bytes)?))
    }
}

/// Result of decoding a payload from the order events topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    OrderCreated(OrderEvent),
    /// An event type this build does not handle.
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderStatus;

    fn sample_order() -> Order {
        Order {
            id: OrderId::new(11),
            user_id: UserId::new(2),
            product_id: ProductId::new(5),
            quantity: 3,
            total_price: Money::from_cents(2997),
            status: OrderStatus::Created,
        }
    }

    #[test]
    fn order_created_copies_order_fields() {
        let event = OrderEvent::order_created(&sample_order());
        assert_eq!(event.event_type, ORDER_CREATED);
        assert_eq!(event.order_id, OrderId::new(11));
        assert_eq!(event.quantity, 3);
        assert_eq!(event.total_price, Money::from_cents(2997));
    }

    #[test]
    fn decoded_payload_matches_published_event() {
        let event = OrderEvent::order_created(&sample_order());
        let bytes = event.to_bytes().unwrap();
        assert_eq!(
            OrderEvent::decode(&bytes).unwrap(),
            DecodedEvent::OrderCreated(event)
        );
    }

    #[test]
    fn wire_format_uses_flat_snake_case_fields() {
        let bytes = OrderEvent::order_created(&sample_order()).to_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["event_type"], "ORDER_CREATED");
        assert_eq!(value["product_id"], 5);
        assert_eq!(value["total_price"], 2997);
    }

    #[test]
    fn unknown_event_types_decode_without_order_fields() {
        let decoded = OrderEvent::decode(br#"{"event_type":"ORDER_CANCELLED","order_id":1}"#);
        assert_eq!(
            decoded.unwrap(),
            DecodedEvent::Other("ORDER_CANCELLED".to_string())
        );
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(OrderEvent::decode(b"not json").is_err());
        assert!(OrderEvent::decode(br#"{"event_type":"ORDER_CREATED"}"#).is_err());
    }
}
