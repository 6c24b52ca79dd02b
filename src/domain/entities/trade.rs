use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::domain::entities::order::Side;

/// Append-only settlement record: exactly one row per position close.
/// Never mutated or deleted by the core.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TradeHistory {
    pub id: i64,
    pub user_id: String,
    pub order_id: String,
    pub position_id: String,
    pub symbol: String,
    pub side: Side,
    pub lots: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    pub created_at: DateTime<Utc>,
}
