use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the cart, checkout and production services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded {
        cart_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
    },
    CartItemRemoved {
        cart_id: Uuid,
        item_id: Uuid,
    },
    CartAbandoned(Uuid),

    // Checkout events
    CheckoutStarted {
        cart_id: Uuid,
        intent_id: String,
    },
    CheckoutCompleted {
        cart_id: Uuid,
        order_id: Uuid,
    },

    // Order and payment events
    OrderCreated(Uuid),
    PaymentCaptured {
        order_id: Uuid,
        transaction_id: String,
    },
    PaymentFailed {
        intent_id: String,
    },

    // Production events
    ProductionJobCreated {
        order_id: Uuid,
        job_id: Uuid,
    },
    ProductionStepCompleted {
        job_id: Uuid,
        step_id: Uuid,
    },
    ProductionJobCompleted(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Event delivery is advisory; state mutations never depend on it.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Event dropped: {}", e);
        }
    }
}

/// Builds an event channel with a bounded buffer.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Consumes events off the channel and logs them. Runs until every sender
/// is dropped.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::CartCreated(cart_id) => info!("Cart created: {}", cart_id),
            Event::CartItemAdded {
                cart_id,
                variant_id,
                quantity,
            } => info!(
                "Cart {} item added: variant {} x{}",
                cart_id, variant_id, quantity
            ),
            Event::CartAbandoned(cart_id) => info!("Cart abandoned: {}", cart_id),
            Event::CheckoutStarted { cart_id, intent_id } => {
                info!("Checkout started: cart {} intent {}", cart_id, intent_id)
            }
            Event::CheckoutCompleted { cart_id, order_id } => {
                info!("Checkout completed: cart {} order {}", cart_id, order_id)
            }
            Event::OrderCreated(order_id) => info!("Order created: {}", order_id),
            Event::PaymentCaptured {
                order_id,
                transaction_id,
            } => info!(
                "Payment captured for order {}: {}",
                order_id, transaction_id
            ),
            Event::PaymentFailed { intent_id } => warn!("Payment failed: intent {}", intent_id),
            Event::ProductionJobCreated { order_id, job_id } => {
                info!("Production job {} created for order {}", job_id, order_id)
            }
            Event::ProductionJobCompleted(job_id) => info!("Production job completed: {}", job_id),
            _ => info!("Event: {:?}", event),
        }
    }

    warn!("Event processing loop has ended");
}
