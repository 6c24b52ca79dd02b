//! Latest-price cache. Process-lifetime state behind an injected
//! abstraction with explicit reset semantics; a multi-instance deployment
//! can substitute a shared implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Latest observed price for the symbol, if any tick has arrived.
    async fn get(&self, symbol: &str) -> Option<f64>;

    /// Record a tick; last write wins.
    async fn set(&self, symbol: &str, price: f64);

    /// Snapshot of every known symbol.
    async fn snapshot(&self) -> HashMap<String, f64>;

    /// Drop all cached prices.
    async fn reset(&self);
}

/// In-memory implementation; state is lost on restart.
#[derive(Default)]
pub struct InMemoryPriceStore {
    prices: RwLock<HashMap<String, f64>>,
}

impl InMemoryPriceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PriceStore for InMemoryPriceStore {
    async fn get(&self, symbol: &str) -> Option<f64> {
        self.prices.read().await.get(symbol).copied()
    }

    async fn set(&self, symbol: &str, price: f64) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    async fn snapshot(&self) -> HashMap<String, f64> {
        self.prices.read().await.clone()
    }

    async fn reset(&self) {
        self.prices.write().await.clear();
    }
}
