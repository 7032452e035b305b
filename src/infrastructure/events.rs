use crate::domain::events::OrderEvent;
use crate::domain::ports::EventSink;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Publishes events as structured log records for downstream log shippers.
#[derive(Default, Clone)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, event: OrderEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => {
                tracing::info!(target: "marketpay::events", order_id = event.order_id(), %payload, "order event")
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode order event"),
        }
    }
}

/// Keeps every published event in memory.
#[derive(Default, Clone)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<OrderEvent>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OrderEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(&self, event: OrderEvent) {
        self.events.lock().push(event);
    }
}
