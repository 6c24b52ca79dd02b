//! Service graph wiring, shared by `main` and the integration tests.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::domain::services::ledger::Ledger;
use crate::domain::services::margin::policy_from_config;
use crate::domain::services::market::MarketService;
use crate::domain::services::order_intake::OrderIntake;
use crate::domain::services::position_manager::PositionManager;
use crate::domain::services::price_store::{InMemoryPriceStore, PriceStore};
use crate::domain::services::settlement::SettlementService;
use crate::domain::services::symbols::SymbolSpecs;
use crate::domain::services::trigger_engine::TriggerEngine;
use crate::events::EventBus;
use crate::persistence::repository::{
    OrderRepository, PositionRepository, TradeHistoryRepository, WalletRepository,
};
use crate::persistence::DbPool;

pub struct AppState {
    pub config: EngineConfig,
    pub events: EventBus,
    pub prices: Arc<dyn PriceStore>,
    pub ledger: Ledger,
    pub orders: OrderIntake,
    pub positions: PositionManager,
    pub settlement: Arc<SettlementService>,
    pub market: MarketService,
}

impl AppState {
    pub fn build(config: EngineConfig, pool: DbPool) -> Arc<AppState> {
        let events = EventBus::new(config.event_capacity);
        let prices: Arc<dyn PriceStore> = Arc::new(InMemoryPriceStore::new());
        let specs = SymbolSpecs::new(config.fx_contract_size);

        let order_repo = OrderRepository::new(pool.clone());
        let position_repo = PositionRepository::new(pool.clone());
        let history_repo = TradeHistoryRepository::new(pool.clone());
        let wallet_repo = WalletRepository::new(pool.clone());

        let ledger = Ledger::new(
            pool.clone(),
            wallet_repo.clone(),
            config.demo_initial_balance,
            events.clone(),
        );

        let settlement = Arc::new(SettlementService::new(
            pool.clone(),
            position_repo.clone(),
            history_repo,
            wallet_repo.clone(),
            specs.clone(),
            events.clone(),
        ));

        let trigger = Arc::new(TriggerEngine::new(
            position_repo.clone(),
            settlement.clone(),
            events.clone(),
        ));

        let orders = OrderIntake::new(
            pool.clone(),
            order_repo,
            position_repo.clone(),
            wallet_repo,
            policy_from_config(&config.margin).into(),
            config.demo_initial_balance,
            events.clone(),
        );

        let positions = PositionManager::new(
            pool,
            position_repo,
            prices.clone(),
            specs,
            settlement.clone(),
            events.clone(),
        );

        let market = MarketService::new(prices.clone(), trigger, events.clone());

        Arc::new(AppState {
            config,
            events,
            prices,
            ledger,
            orders,
            positions,
            settlement,
            market,
        })
    }
}
