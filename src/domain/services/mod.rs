pub mod ledger;
pub mod margin;
pub mod market;
pub mod order_intake;
pub mod position_manager;
pub mod price_store;
pub mod settlement;
pub mod symbols;
pub mod trigger_engine;
