//! Database Models
//!
//! Insert inputs for the repositories. Read models live in
//! `domain::entities`, which derive `FromRow` directly.

use chrono::{DateTime, Utc};

use crate::domain::entities::account::AccountKind;
use crate::domain::entities::order::Side;

/// Create order input
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub side: Side,
    pub lots: f64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Create position input
#[derive(Debug, Clone)]
pub struct CreatePosition {
    pub id: String,
    pub order_id: String,
    pub user_id: String,
    pub symbol: String,
    pub side: Side,
    pub lots: f64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub margin_reserved: f64,
    pub account_kind: AccountKind,
    pub opened_at: DateTime<Utc>,
}

/// Create trade history input
#[derive(Debug, Clone)]
pub struct CreateTradeHistory {
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
