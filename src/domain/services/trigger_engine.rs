//! Trigger engine: on each tick, scan the symbol's open positions and close
//! any whose protective levels the price has crossed.

use std::sync::Arc;
use tracing::{debug, error, info};

use crate::domain::services::settlement::SettlementService;
use crate::events::{EventBus, TradingEvent};
use crate::persistence::repository::PositionRepository;

#[derive(Clone)]
pub struct TriggerEngine {
    positions: PositionRepository,
    settlement: Arc<SettlementService>,
    events: EventBus,
}

impl TriggerEngine {
    pub fn new(
        positions: PositionRepository,
        settlement: Arc<SettlementService>,
        events: EventBus,
    ) -> Self {
        Self {
            positions,
            settlement,
            events,
        }
    }

    /// Evaluate every open position on the symbol against the tick.
    /// Failure to close one position must not prevent evaluating the rest
    /// of the batch; there is no caller to report to, so failures are
    /// logged and emitted as `trigger_failed`.
    pub async fn on_price_tick(&self, symbol: &str, price: f64) {
        let open = match self.positions.open_for_symbol(symbol).await {
            Ok(positions) => positions,
            Err(e) => {
                error!("failed to load open positions for {}: {}", symbol, e);
                return;
            }
        };

        for position in open {
            let Some(reason) = position.trigger_hit(price) else {
                continue;
            };

            match self
                .settlement
                .close(&position.id, price, reason, None)
                .await
            {
                Ok(Some(closed)) => {
                    info!(
                        "trigger closed {} ({}) on {} @ {} pnl {:.2}",
                        closed.position_id, closed.reason, symbol, price, closed.pnl
                    );
                }
                Ok(None) => {
                    // Lost the race to a manual close; nothing to do.
                    debug!("position {} was already closed", position.id);
                }
                Err(e) => {
                    error!("failed to close position {} on {}: {}", position.id, symbol, e);
                    self.events.emit(TradingEvent::TriggerFailed {
                        position_id: position.id.clone(),
                        symbol: symbol.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }
}
