//! Market data ingress: validate a tick, cache it, publish it, and hand it
//! to the trigger engine.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::errors::EngineError;
use crate::domain::services::price_store::PriceStore;
use crate::domain::services::trigger_engine::TriggerEngine;
use crate::events::{EventBus, TradingEvent};

#[derive(Debug, Clone, Serialize)]
pub struct PriceTick {
    pub symbol: String,
    pub price: f64,
}

#[derive(Clone)]
pub struct MarketService {
    prices: Arc<dyn PriceStore>,
    trigger: Arc<TriggerEngine>,
    events: EventBus,
}

impl MarketService {
    pub fn new(prices: Arc<dyn PriceStore>, trigger: Arc<TriggerEngine>, events: EventBus) -> Self {
        Self {
            prices,
            trigger,
            events,
        }
    }

    /// Feed ingress. Ticks for different symbols never contend; each tick
    /// runs trigger evaluation for its own symbol only.
    pub async fn set_price(&self, symbol: &str, price: f64) -> Result<PriceTick, EngineError> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(EngineError::validation("symbol_required"));
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(EngineError::validation("price_invalid"));
        }

        self.prices.set(&symbol, price).await;
        self.events.emit(TradingEvent::PriceUpdated {
            symbol: symbol.clone(),
            price,
        });

        self.trigger.on_price_tick(&symbol, price).await;

        Ok(PriceTick { symbol, price })
    }

    pub async fn price(&self, symbol: &str) -> Option<f64> {
        self.prices.get(&symbol.to_uppercase()).await
    }

    pub async fn all_prices(&self) -> HashMap<String, f64> {
        self.prices.snapshot().await
    }
}
