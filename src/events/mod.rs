use crate::entities::{MovementType, OrderStatus};
use crate::metrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Event channel closed")]
    ChannelClosed,
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Bounded channel plus the receiver to hand to [`process_events`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub async fn send(&self, event: Event) -> Result<(), EventError> {
        self.sender
            .send(event)
            .await
            .map_err(|_| EventError::ChannelClosed)
    }

    /// Sends without failing the caller; a closed channel is only logged.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "Dropping event");
        }
    }
}

/// Domain events emitted by the services once their transaction committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CompanyRegistered {
        company_id: Uuid,
        admin_id: Uuid,
    },
    UserCreated {
        company_id: Uuid,
        user_id: Uuid,
    },
    UserUpdated {
        company_id: Uuid,
        user_id: Uuid,
    },
    UserDeleted {
        company_id: Uuid,
        user_id: Uuid,
    },
    SignedIn {
        user_id: Uuid,
        method: String,
    },
    SignInFailed {
        method: String,
    },
    PinVerified {
        user_id: Uuid,
    },
    PinRejected {
        user_id: Uuid,
        locked: bool,
    },
    PasswordChanged {
        user_id: Uuid,
    },
    ProductCreated {
        company_id: Uuid,
        product_id: Uuid,
    },
    ProductUpdated {
        company_id: Uuid,
        product_id: Uuid,
    },
    ProductDeleted {
        company_id: Uuid,
        product_id: Uuid,
    },
    StockMoved {
        company_id: Uuid,
        movement_id: Uuid,
        movement_type: MovementType,
        product_id: Uuid,
        quantity: i32,
    },
    InventoryReserved {
        company_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    },
    InventoryReleased {
        company_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    },
    OrderCreated {
        company_id: Uuid,
        order_id: Uuid,
    },
    OrderStatusChanged {
        company_id: Uuid,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::CompanyRegistered { .. } => "company_registered",
            Event::UserCreated { .. } => "user_created",
            Event::UserUpdated { .. } => "user_updated",
            Event::UserDeleted { .. } => "user_deleted",
            Event::SignedIn { .. } => "signed_in",
            Event::SignInFailed { .. } => "sign_in_failed",
            Event::PinVerified { .. } => "pin_verified",
            Event::PinRejected { .. } => "pin_rejected",
            Event::PasswordChanged { .. } => "password_changed",
            Event::ProductCreated { .. } => "product_created",
            Event::ProductUpdated { .. } => "product_updated",
            Event::ProductDeleted { .. } => "product_deleted",
            Event::StockMoved { .. } => "stock_moved",
            Event::InventoryReserved { .. } => "inventory_reserved",
            Event::InventoryReleased { .. } => "inventory_released",
            Event::OrderCreated { .. } => "order_created",
            Event::OrderStatusChanged { .. } => "order_status_changed",
        }
    }
}

/// Applies the side effects of one event: structured log line and counters.
pub fn handle_event(event: &Event) {
    match event {
        Event::SignedIn { user_id, method } => {
            metrics::record_login(method);
            info!(%user_id, %method, "User signed in");
        }
        Event::SignInFailed { method } => {
            metrics::record_failed_login(method);
            debug!(%method, "Sign-in rejected");
        }
        Event::PinRejected { user_id, locked } => {
            metrics::record_pin_rejection(if *locked { "locked" } else { "mismatch" });
            warn!(%user_id, locked, "PIN rejected");
        }
        Event::StockMoved {
            company_id,
            movement_id,
            movement_type,
            product_id,
            quantity,
        } => {
            metrics::record_stock_movement(*movement_type, *quantity);
            info!(
                %company_id,
                %movement_id,
                %product_id,
                movement_type = %movement_type,
                quantity,
                "Stock moved"
            );
        }
        Event::OrderStatusChanged {
            company_id,
            order_id,
            from,
            to,
            ..
        } => {
            metrics::record_order_transition(*to);
            info!(%company_id, %order_id, from = %from, to = %to, "Order status changed");
        }
        other => {
            debug!(event = other.name(), payload = ?other, "Event processed");
        }
    }
}

/// Consumes events until every sender is dropped. Returns how many were handled.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) -> u64 {
    info!("Starting event processing loop");
    let mut handled = 0;
    while let Some(event) = rx.recv().await {
        handle_event(&event);
        handled += 1;
    }
    info!(handled, "Event processing loop stopped");
    handled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn processes_until_senders_drop() {
        let (sender, rx) = EventSender::channel(8);
        let worker = tokio::spawn(process_events(rx));

        sender
            .send(Event::ProductCreated {
                company_id: Uuid::new_v4(),
                product_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
        sender
            .send_or_log(Event::StockMoved {
                company_id: Uuid::new_v4(),
                movement_id: Uuid::new_v4(),
                movement_type: MovementType::Inbound,
                product_id: Uuid::new_v4(),
                quantity: 4,
            })
            .await;
        drop(sender);

        assert_eq!(worker.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn closed_channel_does_not_fail_send_or_log() {
        let (sender, rx) = EventSender::channel(1);
        drop(rx);
        assert!(sender
            .send(Event::SignInFailed { method: "pwd".into() })
            .await
            .is_err());
        sender
            .send_or_log(Event::SignInFailed { method: "pwd".into() })
            .await;
    }

    #[test]
    fn sign_in_events_update_counters() {
        let before = metrics::METRICS.value(metrics::LOGINS_TOTAL, &[("method", "otp")]);
        handle_event(&Event::SignedIn {
            user_id: Uuid::new_v4(),
            method: "otp".into(),
        });
        assert!(metrics::METRICS.value(metrics::LOGINS_TOTAL, &[("method", "otp")]) > before);
    }
}
