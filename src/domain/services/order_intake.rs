//! Order intake: validate a market order, reserve margin, and create the
//! order/position pair in one atomic unit.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::domain::entities::account::AccountKind;
use crate::domain::entities::order::{Order, OrderWithPnl, Side};
use crate::domain::entities::position::Position;
use crate::domain::errors::EngineError;
use crate::domain::services::margin::MarginPolicy;
use crate::events::{EventBus, TradingEvent};
use crate::persistence::models::{CreateOrder, CreatePosition};
use crate::persistence::repository::{OrderRepository, PositionRepository, WalletRepository};
use crate::persistence::{DatabaseError, DbPool};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub side: Side,
    pub lots: f64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub account_kind: AccountKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrder {
    pub order: Order,
    pub position: Position,
}

#[derive(Clone)]
pub struct OrderIntake {
    pool: DbPool,
    orders: OrderRepository,
    positions: PositionRepository,
    wallets: WalletRepository,
    margin: Arc<dyn MarginPolicy>,
    demo_initial_balance: f64,
    events: EventBus,
}

impl OrderIntake {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: DbPool,
        orders: OrderRepository,
        positions: PositionRepository,
        wallets: WalletRepository,
        margin: Arc<dyn MarginPolicy>,
        demo_initial_balance: f64,
        events: EventBus,
    ) -> Self {
        Self {
            pool,
            orders,
            positions,
            wallets,
            margin,
            demo_initial_balance,
            events,
        }
    }

    /// Fill a market order. The balance check, margin debit, and the
    /// order/position inserts run in one transaction: two simultaneous
    /// orders from the same user cannot both pass the check against the
    /// same pre-debit balance.
    pub async fn place_order(
        &self,
        user_id: &str,
        req: PlaceOrderRequest,
    ) -> Result<PlacedOrder, EngineError> {
        let symbol = req.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(EngineError::validation("symbol_required"));
        }
        if !req.lots.is_finite() || req.lots <= 0.0 {
            return Err(EngineError::validation("lots_invalid"));
        }
        if !req.entry_price.is_finite() || req.entry_price <= 0.0 {
            return Err(EngineError::validation("entryPrice_invalid"));
        }
        // A position may not exist without protective levels.
        let stop_loss = match req.stop_loss {
            Some(v) if v.is_finite() && v > 0.0 => v,
            _ => return Err(EngineError::validation("stopLoss_required")),
        };
        let take_profit = match req.take_profit {
            Some(v) if v.is_finite() && v > 0.0 => v,
            _ => return Err(EngineError::validation("takeProfit_required")),
        };

        let margin = self
            .margin
            .required_margin(&symbol, req.lots, req.entry_price);
        if !margin.is_finite() || margin <= 0.0 {
            return Err(EngineError::validation("margin_invalid"));
        }

        let order_id = uid("ord");
        let position_id = uid("pos");
        let now = Utc::now();
        let initial = match req.account_kind {
            AccountKind::Demo => self.demo_initial_balance,
            AccountKind::Real => 0.0,
        };

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;

        self.wallets
            .ensure(&mut *tx, user_id, req.account_kind, initial)
            .await?;
        if !self
            .wallets
            .try_debit(&mut *tx, user_id, req.account_kind, margin)
            .await?
        {
            let available = self
                .wallets
                .balance_in(&mut *tx, user_id, req.account_kind)
                .await?;
            return Err(EngineError::InsufficientFunds {
                required: margin,
                available,
            });
        }

        let order = self
            .orders
            .insert(
                &mut *tx,
                CreateOrder {
                    id: order_id,
                    user_id: user_id.to_string(),
                    symbol: symbol.clone(),
                    side: req.side,
                    lots: req.lots,
                    entry_price: req.entry_price,
                    stop_loss: Some(stop_loss),
                    take_profit: Some(take_profit),
                    created_at: now,
                },
            )
            .await?;

        let position = self
            .positions
            .insert(
                &mut *tx,
                CreatePosition {
                    id: position_id,
                    order_id: order.id.clone(),
                    user_id: user_id.to_string(),
                    symbol: symbol.clone(),
                    side: order.side,
                    lots: order.lots,
                    entry_price: order.entry_price,
                    stop_loss: order.stop_loss,
                    take_profit: order.take_profit,
                    margin_reserved: margin,
                    account_kind: req.account_kind,
                    opened_at: now,
                },
            )
            .await?;

        let balance = self
            .wallets
            .balance_in(&mut *tx, user_id, req.account_kind)
            .await?;

        tx.commit().await.map_err(DatabaseError::from)?;

        info!(
            "filled {} {} {} lots @ {} for {} (margin {:.2})",
            order.side, symbol, order.lots, order.entry_price, user_id, margin
        );

        self.events.emit(TradingEvent::WalletUpdated {
            user_id: user_id.to_string(),
            kind: req.account_kind,
            amount: balance,
        });
        self.events.emit(TradingEvent::OrderCreated(order.clone()));
        self.events
            .emit(TradingEvent::PositionOpened(position.clone()));

        Ok(PlacedOrder { order, position })
    }

    /// Orders for a user, newest first, with realized pnl where closed.
    pub async fn history(&self, user_id: &str) -> Result<Vec<OrderWithPnl>, EngineError> {
        Ok(self.orders.history_for_user(user_id).await?)
    }
}

fn uid(prefix: &str) -> String {
    format!(
        "{}_{}_{:08x}",
        prefix,
        Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_has_prefix_and_is_unique() {
        let a = uid("ord");
        let b = uid("ord");
        assert!(a.starts_with("ord_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_place_order_request_defaults_to_demo() {
        let req: PlaceOrderRequest = serde_json::from_str(
            r#"{"symbol":"BTCUSDT","side":"buy","lots":1.0,"entryPrice":100.0,
                "stopLoss":90.0,"takeProfit":110.0}"#,
        )
        .unwrap();
        assert_eq!(req.account_kind, AccountKind::Demo);
    }
}
