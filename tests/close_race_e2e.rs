//! Race-safety and trigger-policy tests: a position closes exactly once no
//! matter how many callers try, take-profit outranks stop-loss, and one
//! failing position never blocks the rest of a tick's batch.

use std::sync::Arc;

use tradesim::app::AppState;
use tradesim::config::{EngineConfig, MarginConfig, MarginMode};
use tradesim::domain::entities::account::AccountKind;
use tradesim::domain::entities::order::Side;
use tradesim::domain::entities::position::{CloseReason, PositionStatus};
use tradesim::domain::services::order_intake::PlaceOrderRequest;
use tradesim::events::TradingEvent;
use tradesim::persistence::repository::{PositionRepository, TradeHistoryRepository};
use tradesim::persistence::{init_database, DatabaseConfig, DbPool};

async fn test_app(demo_initial_balance: f64) -> (Arc<AppState>, DbPool) {
    let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();
    let config = EngineConfig {
        demo_initial_balance,
        margin: MarginConfig {
            mode: MarginMode::Flat,
            flat_amount: 1.0,
            leverage: 100.0,
        },
        ..EngineConfig::default()
    };
    let state = AppState::build(config, pool.clone());
    (state, pool)
}

fn buy_order(symbol: &str, stop_loss: f64, take_profit: f64) -> PlaceOrderRequest {
    PlaceOrderRequest {
        symbol: symbol.to_string(),
        side: Side::Buy,
        lots: 1.0,
        entry_price: 100.0,
        stop_loss: Some(stop_loss),
        take_profit: Some(take_profit),
        account_kind: AccountKind::Demo,
    }
}

#[tokio::test]
async fn test_second_close_is_a_noop() {
    let (app, pool) = test_app(10.0).await;

    let placed = app
        .orders
        .place_order("u1", buy_order("BTCUSDT", 90.0, 110.0))
        .await
        .unwrap();

    let first = app.positions.close("u1", &placed.position.id).await.unwrap();
    assert!(first.is_some());

    // Any later close attempt, from any actor, observes "already closed".
    let manual_again = app.positions.close("u1", &placed.position.id).await.unwrap();
    assert!(manual_again.is_none());

    let trigger_again = app
        .settlement
        .close(&placed.position.id, 110.0, CloseReason::Tp, None)
        .await
        .unwrap();
    assert!(trigger_again.is_none());

    // Exactly one settlement record and one ledger movement.
    let history = TradeHistoryRepository::new(pool.clone());
    assert_eq!(history.count_for_position(&placed.position.id).await.unwrap(), 1);
    assert_eq!(app.ledger.balance("u1", AccountKind::Demo).await.unwrap(), 10.0);
}

#[tokio::test]
async fn test_simultaneous_manual_and_trigger_close_settles_once() {
    let (app, pool) = test_app(10.0).await;

    let placed = app
        .orders
        .place_order("u1", buy_order("BTCUSDT", 90.0, 110.0))
        .await
        .unwrap();
    let position_id = placed.position.id.clone();

    // Manual close and a tp-hitting tick race; whichever transaction
    // commits second must observe the closed status and no-op.
    let (manual, tick) = tokio::join!(
        app.positions.close("u1", &position_id),
        app.market.set_price("BTCUSDT", 110.0),
    );
    manual.unwrap();
    tick.unwrap();

    let position = PositionRepository::new(pool.clone())
        .find(&position_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(position.status, PositionStatus::Closed);
    let reason = position.close_reason.expect("exactly one close reason");
    assert!(matches!(reason, CloseReason::Manual | CloseReason::Tp));

    let history = TradeHistoryRepository::new(pool.clone());
    assert_eq!(history.count_for_position(&position_id).await.unwrap(), 1);

    // Whichever side won, the wallet moved by exactly margin + pnl.
    let pnl: f64 = sqlx::query_scalar("SELECT pnl FROM trade_history WHERE position_id = ?1")
        .bind(&position_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    let balance = app.ledger.balance("u1", AccountKind::Demo).await.unwrap();
    assert_eq!(balance, 9.0 + placed.position.margin_reserved + pnl);
}

#[tokio::test]
async fn test_take_profit_outranks_stop_loss_on_gapped_tick() {
    let (app, pool) = test_app(10.0).await;

    // Levels arranged so a single tick at 115 qualifies for both: above the
    // take-profit and below the stop-loss. The declared policy resolves to tp.
    let placed = app
        .orders
        .place_order("u1", buy_order("BTCUSDT", 120.0, 110.0))
        .await
        .unwrap();

    app.market.set_price("BTCUSDT", 115.0).await.unwrap();

    let position = PositionRepository::new(pool.clone())
        .find(&placed.position.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(position.close_reason, Some(CloseReason::Tp));
}

#[tokio::test]
async fn test_boundary_price_counts_as_hit() {
    let (app, pool) = test_app(10.0).await;

    let placed = app
        .orders
        .place_order("u1", buy_order("BTCUSDT", 90.0, 110.0))
        .await
        .unwrap();

    // One tick short of the level leaves the position open.
    app.market.set_price("BTCUSDT", 109.99).await.unwrap();
    let positions = PositionRepository::new(pool.clone());
    assert!(positions
        .find(&placed.position.id)
        .await
        .unwrap()
        .unwrap()
        .is_open());

    // Exact equality hits.
    app.market.set_price("BTCUSDT", 110.0).await.unwrap();
    let position = positions.find(&placed.position.id).await.unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::Closed);
    assert_eq!(position.close_reason, Some(CloseReason::Tp));
}

#[tokio::test]
async fn test_tick_only_touches_its_own_symbol() {
    let (app, pool) = test_app(10.0).await;

    let placed = app
        .orders
        .place_order("u1", buy_order("BTCUSDT", 90.0, 110.0))
        .await
        .unwrap();

    // A qualifying price on a different symbol must not close it.
    app.market.set_price("ETHUSDT", 110.0).await.unwrap();

    let position = PositionRepository::new(pool.clone())
        .find(&placed.position.id)
        .await
        .unwrap()
        .unwrap();
    assert!(position.is_open());
}

#[tokio::test]
async fn test_manual_close_by_non_owner_is_a_noop() {
    let (app, pool) = test_app(10.0).await;

    let placed = app
        .orders
        .place_order("u1", buy_order("BTCUSDT", 90.0, 110.0))
        .await
        .unwrap();

    let closed = app.positions.close("u2", &placed.position.id).await.unwrap();
    assert!(closed.is_none());

    let position = PositionRepository::new(pool.clone())
        .find(&placed.position.id)
        .await
        .unwrap()
        .unwrap();
    assert!(position.is_open());

    let history = TradeHistoryRepository::new(pool.clone());
    assert_eq!(history.count_for_position(&placed.position.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_one_tick_closes_every_qualifying_position() {
    let (app, pool) = test_app(10.0).await;

    // Two positions hit at 110, one (tp 120) does not.
    let hit_a = app
        .orders
        .place_order("u1", buy_order("BTCUSDT", 90.0, 110.0))
        .await
        .unwrap();
    let hit_b = app
        .orders
        .place_order("u2", buy_order("BTCUSDT", 95.0, 108.0))
        .await
        .unwrap();
    let untouched = app
        .orders
        .place_order("u3", buy_order("BTCUSDT", 90.0, 120.0))
        .await
        .unwrap();

    app.market.set_price("BTCUSDT", 110.0).await.unwrap();

    let positions = PositionRepository::new(pool.clone());
    for id in [&hit_a.position.id, &hit_b.position.id] {
        let position = positions.find(id).await.unwrap().unwrap();
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.close_reason, Some(CloseReason::Tp));
    }
    let position = positions.find(&untouched.position.id).await.unwrap().unwrap();
    assert!(position.is_open());

    // Each owner settled independently, both at the tick price.
    assert_eq!(app.ledger.balance("u1", AccountKind::Demo).await.unwrap(), 20.0);
    assert_eq!(app.ledger.balance("u2", AccountKind::Demo).await.unwrap(), 20.0);
    assert_eq!(app.ledger.balance("u3", AccountKind::Demo).await.unwrap(), 9.0);
}

#[tokio::test]
async fn test_trigger_failure_does_not_abort_the_batch() {
    let (app, pool) = test_app(10.0).await;

    let a = app
        .orders
        .place_order("u1", buy_order("BTCUSDT", 90.0, 110.0))
        .await
        .unwrap();
    let b = app
        .orders
        .place_order("u2", buy_order("BTCUSDT", 95.0, 108.0))
        .await
        .unwrap();

    // Break settlement for every position in the batch: the history append
    // fails, each close rolls back, and evaluation still reaches the end.
    sqlx::query("DROP TABLE trade_history")
        .execute(&pool)
        .await
        .unwrap();

    let mut rx = app.events.subscribe();
    app.market.set_price("BTCUSDT", 110.0).await.unwrap();

    let mut failed = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let TradingEvent::TriggerFailed { position_id, .. } = event {
            failed.push(position_id);
        }
    }
    assert_eq!(failed.len(), 2, "every qualifying position must be evaluated");
    assert!(failed.contains(&a.position.id));
    assert!(failed.contains(&b.position.id));

    // A failed close leaves no trace: positions stay open, wallets untouched.
    let positions = PositionRepository::new(pool.clone());
    for id in [&a.position.id, &b.position.id] {
        assert!(positions.find(id).await.unwrap().unwrap().is_open());
    }
    assert_eq!(app.ledger.balance("u1", AccountKind::Demo).await.unwrap(), 9.0);
    assert_eq!(app.ledger.balance("u2", AccountKind::Demo).await.unwrap(), 9.0);
}

#[tokio::test]
async fn test_close_emits_position_closed_and_wallet_updated() {
    let (app, _pool) = test_app(10.0).await;

    let placed = app
        .orders
        .place_order("u1", buy_order("BTCUSDT", 90.0, 110.0))
        .await
        .unwrap();

    let mut rx = app.events.subscribe();
    app.market.set_price("BTCUSDT", 110.0).await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let TradingEvent::PositionClosed {
            position_id,
            reason,
            close_price,
            pnl,
        } = &event
        {
            assert_eq!(position_id, &placed.position.id);
            assert_eq!(*reason, CloseReason::Tp);
            assert_eq!(*close_price, 110.0);
            assert_eq!(*pnl, 10.0);
        }
        kinds.push(event.kind());
    }

    assert!(kinds.contains(&"price_updated"));
    assert!(kinds.contains(&"position_closed"));
    assert!(kinds.contains(&"wallet_updated"));
}

#[tokio::test]
async fn test_order_placement_emits_lifecycle_events() {
    let (app, _pool) = test_app(10.0).await;

    let mut rx = app.events.subscribe();
    app.orders
        .place_order("u1", buy_order("BTCUSDT", 90.0, 110.0))
        .await
        .unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind());
    }
    assert_eq!(kinds, vec!["wallet_updated", "order_created", "position_opened"]);
}
