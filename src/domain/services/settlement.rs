//! Settlement: the single close path shared by manual closes and the
//! trigger engine. Marks the position closed, appends the trade-history
//! record, and returns reserved margin plus realized pnl to the wallet,
//! all in one transaction.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::entities::position::CloseReason;
use crate::domain::errors::EngineError;
use crate::domain::services::symbols::SymbolSpecs;
use crate::events::{EventBus, TradingEvent};
use crate::persistence::models::CreateTradeHistory;
use crate::persistence::repository::{
    PositionRepository, TradeHistoryRepository, WalletRepository,
};
use crate::persistence::{DatabaseError, DbPool};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedPosition {
    pub position_id: String,
    pub pnl: f64,
    pub close_price: f64,
    pub reason: CloseReason,
}

#[derive(Clone)]
pub struct SettlementService {
    pool: DbPool,
    positions: PositionRepository,
    history: TradeHistoryRepository,
    wallets: WalletRepository,
    specs: SymbolSpecs,
    events: EventBus,
}

impl SettlementService {
    pub fn new(
        pool: DbPool,
        positions: PositionRepository,
        history: TradeHistoryRepository,
        wallets: WalletRepository,
        specs: SymbolSpecs,
        events: EventBus,
    ) -> Self {
        Self {
            pool,
            positions,
            history,
            wallets,
            specs,
            events,
        }
    }

    /// Close a position. Returns `None`, with no side effects, when the
    /// position is missing, already closed, or (for manual closes) not
    /// owned by `requesting_user` — the losing side of a simultaneous
    /// manual-close and trigger-close lands here and no-ops.
    ///
    /// A loss larger than the reserved margin drives the settled balance
    /// negative rather than being dropped; the wallet always moves by
    /// exactly `margin_reserved + pnl`.
    pub async fn close(
        &self,
        position_id: &str,
        close_price: f64,
        reason: CloseReason,
        requesting_user: Option<&str>,
    ) -> Result<Option<ClosedPosition>, EngineError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;

        let Some(position) = self.positions.find_in(&mut *tx, position_id).await? else {
            return Ok(None);
        };
        if !position.is_open() {
            return Ok(None);
        }
        if let Some(user) = requesting_user {
            if user != position.user_id {
                return Ok(None);
            }
        }

        let closed_at = Utc::now();
        // The status-gated update is the exactly-once guard; a concurrent
        // close that committed after our read leaves zero rows here.
        if !self
            .positions
            .mark_closed(&mut *tx, position_id, close_price, reason, closed_at)
            .await?
        {
            return Ok(None);
        }

        let pnl = position.pnl_at(close_price, self.specs.contract_size(&position.symbol));

        self.history
            .append(
                &mut *tx,
                CreateTradeHistory {
                    user_id: position.user_id.clone(),
                    order_id: position.order_id.clone(),
                    position_id: position.id.clone(),
                    symbol: position.symbol.clone(),
                    side: position.side,
                    lots: position.lots,
                    entry_price: position.entry_price,
                    exit_price: close_price,
                    pnl,
                    created_at: closed_at,
                },
            )
            .await?;

        let net = position.margin_reserved + pnl;
        let balance = self
            .wallets
            .apply_net(&mut *tx, &position.user_id, position.account_kind, net)
            .await?;

        tx.commit().await.map_err(DatabaseError::from)?;

        if balance < 0.0 {
            warn!(
                "loss on {} exceeded reserved margin; {}/{} settled balance is {:.2}",
                position.id, position.user_id, position.account_kind, balance
            );
        }
        info!(
            "closed {} ({}) @ {} pnl {:.2}",
            position.id, reason, close_price, pnl
        );

        self.events.emit(TradingEvent::PositionClosed {
            position_id: position.id.clone(),
            reason,
            close_price,
            pnl,
        });
        self.events.emit(TradingEvent::WalletUpdated {
            user_id: position.user_id.clone(),
            kind: position.account_kind,
            amount: balance,
        });

        Ok(Some(ClosedPosition {
            position_id: position.id,
            pnl,
            close_price,
            reason,
        }))
    }
}
