//! Position manager: user-facing position queries, stop updates, and
//! manual closes (delegated to settlement).

use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

use crate::domain::entities::position::{CloseReason, Position};
use crate::domain::errors::EngineError;
use crate::domain::services::price_store::PriceStore;
use crate::domain::services::settlement::{ClosedPosition, SettlementService};
use crate::domain::services::symbols::SymbolSpecs;
use crate::events::{EventBus, TradingEvent};
use crate::persistence::repository::PositionRepository;
use crate::persistence::{DatabaseError, DbPool};

/// Open position enriched with the latest price and live pnl figures.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPositionView {
    #[serde(flatten)]
    pub position: Position,
    pub last_price: f64,
    pub qty: f64,
    pub pnl: f64,
    pub pnl_percent: f64,
}

/// Stop update with tri-state fields: absent keeps the current level,
/// explicit null clears it, a value replaces it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStopsRequest {
    #[serde(default, deserialize_with = "some_if_present")]
    pub stop_loss: Option<Option<f64>>,
    #[serde(default, deserialize_with = "some_if_present")]
    pub take_profit: Option<Option<f64>>,
}

fn some_if_present<'de, D>(deserializer: D) -> Result<Option<Option<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<f64>::deserialize(deserializer).map(Some)
}

#[derive(Clone)]
pub struct PositionManager {
    pool: DbPool,
    positions: PositionRepository,
    prices: Arc<dyn PriceStore>,
    specs: SymbolSpecs,
    settlement: Arc<SettlementService>,
    events: EventBus,
}

impl PositionManager {
    pub fn new(
        pool: DbPool,
        positions: PositionRepository,
        prices: Arc<dyn PriceStore>,
        specs: SymbolSpecs,
        settlement: Arc<SettlementService>,
        events: EventBus,
    ) -> Self {
        Self {
            pool,
            positions,
            prices,
            specs,
            settlement,
            events,
        }
    }

    /// Open positions newest-first, marked to the latest cached price.
    /// Before the first tick for a symbol, the entry price stands in and
    /// pnl reads as zero.
    pub async fn list_open(&self, user_id: &str) -> Result<Vec<OpenPositionView>, EngineError> {
        let open = self.positions.open_for_user(user_id).await?;

        let mut views = Vec::with_capacity(open.len());
        for position in open {
            let last_price = self
                .prices
                .get(&position.symbol)
                .await
                .unwrap_or(position.entry_price);
            let contract_size = self.specs.contract_size(&position.symbol);
            let qty = position.lots * contract_size;
            let pnl = position.pnl_at(last_price, contract_size);
            let notional = (position.entry_price * qty).abs();
            let pnl_percent = if notional > 0.0 {
                pnl / notional * 100.0
            } else {
                0.0
            };
            views.push(OpenPositionView {
                position,
                last_price,
                qty,
                pnl,
                pnl_percent,
            });
        }

        Ok(views)
    }

    /// Update protective levels on an open, owned position. No margin
    /// effect.
    pub async fn update_stops(
        &self,
        user_id: &str,
        position_id: &str,
        req: UpdateStopsRequest,
    ) -> Result<Position, EngineError> {
        if let Some(Some(v)) = req.stop_loss {
            if !v.is_finite() || v <= 0.0 {
                return Err(EngineError::validation("stopLoss_invalid"));
            }
        }
        if let Some(Some(v)) = req.take_profit {
            if !v.is_finite() || v <= 0.0 {
                return Err(EngineError::validation("takeProfit_invalid"));
            }
        }

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;

        let Some(current) = self.positions.find_in(&mut *tx, position_id).await? else {
            return Err(EngineError::PositionNotFound(position_id.to_string()));
        };
        if current.user_id != user_id {
            return Err(EngineError::PositionNotFound(position_id.to_string()));
        }
        if !current.is_open() {
            return Err(EngineError::PositionNotOpen(position_id.to_string()));
        }

        let stop_loss = req.stop_loss.unwrap_or(current.stop_loss);
        let take_profit = req.take_profit.unwrap_or(current.take_profit);

        let Some(updated) = self
            .positions
            .update_stops(&mut *tx, position_id, user_id, stop_loss, take_profit)
            .await?
        else {
            // Closed between the read and the update.
            return Err(EngineError::PositionNotOpen(position_id.to_string()));
        };

        tx.commit().await.map_err(DatabaseError::from)?;

        self.events
            .emit(TradingEvent::PositionUpdated(updated.clone()));
        Ok(updated)
    }

    /// Manual close at the latest cached price for the symbol (entry price
    /// when no tick has ever arrived). Returns `None` for a missing or
    /// already-closed position — a benign no-op, and what the loser of a
    /// close race observes.
    pub async fn close(
        &self,
        user_id: &str,
        position_id: &str,
    ) -> Result<Option<ClosedPosition>, EngineError> {
        let Some(position) = self.positions.find(position_id).await? else {
            return Ok(None);
        };

        let close_price = self
            .prices
            .get(&position.symbol)
            .await
            .unwrap_or(position.entry_price);

        self.settlement
            .close(position_id, close_price, CloseReason::Manual, Some(user_id))
            .await
    }
}
