use crate::domain::order::{OrderId, OrderStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of an order's append-only tracking log.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct OrderTracking {
    pub order_id: OrderId,
    /// Order status at the time the entry was written.
    pub status: OrderStatus,
    pub description: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OrderTracking {
    pub fn new(order_id: OrderId, status: OrderStatus, created_at: DateTime<Utc>) -> Self {
        Self {
            order_id,
            status,
            description: None,
            location: None,
            created_at,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }
}
