//! Event bus: broadcast fan-out of state-change notifications to external
//! subscribers (the SSE stream, tests). No replay, no backpressure; a slow
//! subscriber drops events rather than blocking the engine.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::domain::entities::account::AccountKind;
use crate::domain::entities::order::Order;
use crate::domain::entities::position::{CloseReason, Position};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TradingEvent {
    OrderCreated(Order),
    PositionOpened(Position),
    PositionUpdated(Position),
    PositionClosed {
        #[serde(rename = "positionId")]
        position_id: String,
        reason: CloseReason,
        #[serde(rename = "closePrice")]
        close_price: f64,
        pnl: f64,
    },
    WalletUpdated {
        #[serde(rename = "userId")]
        user_id: String,
        kind: AccountKind,
        amount: f64,
    },
    PriceUpdated {
        symbol: String,
        price: f64,
    },
    TriggerFailed {
        #[serde(rename = "positionId")]
        position_id: String,
        symbol: String,
        error: String,
    },
}

impl TradingEvent {
    /// Event name used as the SSE event tag.
    pub fn kind(&self) -> &'static str {
        match self {
            TradingEvent::OrderCreated(_) => "order_created",
            TradingEvent::PositionOpened(_) => "position_opened",
            TradingEvent::PositionUpdated(_) => "position_updated",
            TradingEvent::PositionClosed { .. } => "position_closed",
            TradingEvent::WalletUpdated { .. } => "wallet_updated",
            TradingEvent::PriceUpdated { .. } => "price_updated",
            TradingEvent::TriggerFailed { .. } => "trigger_failed",
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TradingEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish to all current subscribers. Sending with no subscribers is
    /// normal and not an error.
    pub fn emit(&self, event: TradingEvent) {
        match self.tx.send(event) {
            Ok(n) => trace!(receivers = n, "event published"),
            Err(_) => trace!("no event subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TradingEvent> {
        self.tx.subscribe()
    }
}
