use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Rejected,
    Delivered,
}

impl OrderStatus {
    /// Tab order of the order list.
    pub const ALL: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Delivered,
        OrderStatus::Rejected,
    ];

    /// Only confirmed orders are in transit and can be followed live.
    pub fn is_trackable(self) -> bool {
        self == OrderStatus::Confirmed
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Confirmed)
                | (OrderStatus::Pending, OrderStatus::Rejected)
                | (OrderStatus::Confirmed, OrderStatus::Delivered)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Delivered => "DELIVERED",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Waiting for seller confirmation",
            OrderStatus::Confirmed => "Order confirmed, on its way",
            OrderStatus::Rejected => "Order rejected by seller",
            OrderStatus::Delivered => "Order delivered",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown order status {s:?}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRef {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub product: Option<ProductRef>,
    pub quantity: u32,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerRef {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub products: Vec<LineItem>,
    #[serde(default)]
    pub total_amount: f64,
    #[serde(default)]
    pub seller: Option<SellerRef>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Short reference shown to shoppers: last 8 characters, upper-cased.
    pub fn display_ref(&self) -> String {
        let start = self
            .id
            .char_indices()
            .rev()
            .nth(7)
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        self.id[start..].to_uppercase()
    }

    pub fn seller_name(&self) -> &str {
        self.seller
            .as_ref()
            .and_then(|s| s.name.as_deref())
            .unwrap_or("Unknown Seller")
    }
}

/// Payload of an inbound `order-status-updated` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub order_id: String,
    pub status: OrderStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_from_backend_json() {
        let order: Order = serde_json::from_str(
            r#"{
                "_id": "65f1c0ffee0000000000abcd",
                "status": "CONFIRMED",
                "products": [
                    {"product": {"name": "Kettle"}, "quantity": 2, "price": 450},
                    {"product": null, "quantity": 1, "price": 99.5}
                ],
                "totalAmount": 999.5,
                "seller": {"name": "Acme"},
                "createdAt": "2024-03-13T10:00:00.000Z"
            }"#,
        )
        .unwrap();

        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.display_ref(), "0000ABCD");
        assert_eq!(order.products[0].quantity, 2);
        assert!(order.products[1].product.is_none());
        assert_eq!(order.seller_name(), "Acme");
        assert!(order.created_at.is_some());
    }

    #[test]
    fn test_display_ref_short_id() {
        let order: Order = serde_json::from_str(r#"{"_id":"ab12","status":"PENDING"}"#).unwrap();
        assert_eq!(order.display_ref(), "AB12");
        assert_eq!(order.seller_name(), "Unknown Seller");
    }

    #[test]
    fn test_only_confirmed_is_trackable() {
        for status in OrderStatus::ALL {
            assert_eq!(status.is_trackable(), status == OrderStatus::Confirmed);
        }
    }

    #[test]
    fn test_transitions() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Confirmed));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Rejected));
        assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Rejected.can_transition_to(OrderStatus::Confirmed));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("confirmed".parse::<OrderStatus>(), Ok(OrderStatus::Confirmed));
        assert!("SHIPPED".parse::<OrderStatus>().is_err());
    }
}
