//! Deposit Lifecycle Events
//!
//! Notification and audit consumers subscribe to a tokio broadcast channel.
//! Publishing never blocks the pipeline: with no subscribers the event is
//! dropped, and slow subscribers observe `Lagged`.

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::{DepositOrder, Network};

/// Lifecycle event of an order or a sweep
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DepositEvent {
    OrderCreated {
        order_no: String,
        user_id: String,
        network: Network,
        tx_hash: String,
        amount: Decimal,
    },
    OrderConfirming {
        order_no: String,
        confirmations: u64,
        required: u64,
    },
    OrderCompleted {
        order_no: String,
        user_id: String,
        network: Network,
        net_amount: Decimal,
    },
    OrderFailed {
        order_no: String,
        reason: String,
    },
    OrderExpired {
        order_no: String,
    },
    OrderCancelled {
        order_no: String,
        reason: String,
    },
    SweepSucceeded {
        network: Network,
        address: String,
        amount: Decimal,
        tx_hash: String,
    },
    SweepFailed {
        network: Network,
        address: String,
        error: String,
    },
}

impl DepositEvent {
    pub fn order_created(order: &DepositOrder) -> Self {
        DepositEvent::OrderCreated {
            order_no: order.order_no.clone(),
            user_id: order.user_id.clone(),
            network: order.network,
            tx_hash: order.tx_hash.clone(),
            amount: order.amount,
        }
    }

    pub fn order_completed(order: &DepositOrder) -> Self {
        DepositEvent::OrderCompleted {
            order_no: order.order_no.clone(),
            user_id: order.user_id.clone(),
            network: order.network,
            net_amount: order.net_amount,
        }
    }
}

/// Publisher side of the lifecycle event channel
#[derive(Debug, Clone)]
pub struct DepositEventPublisher {
    sender: broadcast::Sender<DepositEvent>,
}

impl DepositEventPublisher {
    /// Create a publisher with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DepositEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: DepositEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }
}

impl Default for DepositEventPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}
