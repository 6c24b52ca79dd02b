use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::entities::account::AccountKind;
use crate::domain::entities::order::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum CloseReason {
    Manual,
    Tp,
    Sl,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Manual => write!(f, "manual"),
            CloseReason::Tp => write!(f, "tp"),
            CloseReason::Sl => write!(f, "sl"),
        }
    }
}

/// The mutable unit of risk. Transitions open -> closed exactly once;
/// closed is terminal. While open, `margin_reserved` is exactly the amount
/// withheld from the owning wallet row.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: String,
    pub order_id: String,
    pub user_id: String,
    pub symbol: String,
    pub side: Side,
    pub lots: f64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub status: PositionStatus,
    pub close_price: Option<f64>,
    pub close_reason: Option<CloseReason>,
    pub margin_reserved: f64,
    pub account_kind: AccountKind,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Evaluate a tick against the protective levels. Take-profit is checked
    /// before stop-loss for both sides: a gapped price that qualifies for
    /// both resolves to tp. Boundary equality counts as a hit.
    pub fn trigger_hit(&self, price: f64) -> Option<CloseReason> {
        match self.side {
            Side::Buy => {
                if let Some(tp) = self.take_profit {
                    if price >= tp {
                        return Some(CloseReason::Tp);
                    }
                }
                if let Some(sl) = self.stop_loss {
                    if price <= sl {
                        return Some(CloseReason::Sl);
                    }
                }
            }
            Side::Sell => {
                if let Some(tp) = self.take_profit {
                    if price <= tp {
                        return Some(CloseReason::Tp);
                    }
                }
                if let Some(sl) = self.stop_loss {
                    if price >= sl {
                        return Some(CloseReason::Sl);
                    }
                }
            }
        }
        None
    }

    /// Realized pnl at `close_price`: `(close - entry) * lots * contract_size`
    /// for buy, sign-flipped for sell.
    pub fn pnl_at(&self, close_price: f64, contract_size: f64) -> f64 {
        let qty = self.lots * contract_size;
        let diff = match self.side {
            Side::Buy => close_price - self.entry_price,
            Side::Sell => self.entry_price - close_price,
        };
        diff * qty
    }
}
