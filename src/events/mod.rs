use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the order/payment flows. Consumed in-process by a
/// logging processor task; downstream integrations subscribe there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderPaid {
        order_id: Uuid,
        transaction_id: String,
    },
    OrderCancelled(Uuid),
    ShippingStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    PaymentInitiated {
        order_id: Uuid,
        provider: String,
    },
    PaymentRefunded {
        order_id: Uuid,
        transaction_id: String,
    },
    CouponRedeemed {
        coupon_id: Uuid,
        user_id: Uuid,
    },
    CartCleared(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event; delivery failures are reported, never fatal to the
    /// originating request.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!("Failed to publish event: {}", e);
        }
    }
}

/// Drains the event channel, logging each event. Spawned once at startup.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderPaid {
                order_id,
                transaction_id,
            } => info!(%order_id, %transaction_id, "event: order paid"),
            Event::OrderCancelled(order_id) => info!(%order_id, "event: order cancelled"),
            other => info!(event = ?other, "event"),
        }
    }
    info!("Event channel closed; processor exiting");
}
