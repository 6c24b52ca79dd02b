//! Database Repository
//!
//! Data access for orders, positions, trade history, and wallet rows.
//! Methods that must participate in a caller-owned transaction take a
//! `&mut SqliteConnection`; plain reads go through the pool.

use sqlx::SqliteConnection;

use super::models::{CreateOrder, CreatePosition, CreateTradeHistory};
use super::{DatabaseError, DbPool};
use crate::domain::entities::account::AccountKind;
use crate::domain::entities::order::{Order, OrderWithPnl};
use crate::domain::entities::position::{CloseReason, Position};
use crate::domain::entities::trade::TradeHistory;
use crate::domain::entities::wallet::Wallet;
use chrono::{DateTime, Utc};
use tracing::{debug, error};

/// Order repository
#[derive(Clone)]
pub struct OrderRepository {
    pool: DbPool,
}

impl OrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a filled order inside the caller's transaction.
    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        order: CreateOrder,
    ) -> Result<Order, DatabaseError> {
        let record = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (
                id, user_id, symbol, side, lots, entry_price,
                stop_loss, take_profit, status, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'filled', ?9)
            RETURNING *
            "#,
        )
        .bind(&order.id)
        .bind(&order.user_id)
        .bind(&order.symbol)
        .bind(order.side)
        .bind(order.lots)
        .bind(order.entry_price)
        .bind(order.stop_loss)
        .bind(order.take_profit)
        .bind(order.created_at)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            error!("Failed to insert order: {}", e);
            DatabaseError::QueryError(format!("Failed to insert order: {}", e))
        })?;

        debug!("Inserted order: {} for {}", record.id, record.symbol);
        Ok(record)
    }

    /// Orders for a user, newest first, each with the realized pnl of its
    /// settled close where one exists.
    pub async fn history_for_user(&self, user_id: &str) -> Result<Vec<OrderWithPnl>, DatabaseError> {
        let records = sqlx::query_as::<_, OrderWithPnl>(
            r#"
            SELECT o.*, th.pnl AS realized_pnl
            FROM orders o
            LEFT JOIN trade_history th ON th.order_id = o.id
            WHERE o.user_id = ?1
            ORDER BY o.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load order history for {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to load order history: {}", e))
        })?;

        Ok(records)
    }
}

/// Position repository
#[derive(Clone)]
pub struct PositionRepository {
    pool: DbPool,
}

impl PositionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert an open position inside the caller's transaction.
    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        position: CreatePosition,
    ) -> Result<Position, DatabaseError> {
        let record = sqlx::query_as::<_, Position>(
            r#"
            INSERT INTO positions (
                id, order_id, user_id, symbol, side, lots, entry_price,
                stop_loss, take_profit, status, close_price, close_reason,
                margin_reserved, account_kind, opened_at, closed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'open', NULL, NULL, ?10, ?11, ?12, NULL)
            RETURNING *
            "#,
        )
        .bind(&position.id)
        .bind(&position.order_id)
        .bind(&position.user_id)
        .bind(&position.symbol)
        .bind(position.side)
        .bind(position.lots)
        .bind(position.entry_price)
        .bind(position.stop_loss)
        .bind(position.take_profit)
        .bind(position.margin_reserved)
        .bind(position.account_kind)
        .bind(position.opened_at)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            error!("Failed to insert position: {}", e);
            DatabaseError::QueryError(format!("Failed to insert position: {}", e))
        })?;

        debug!("Inserted position: {} for {}", record.id, record.symbol);
        Ok(record)
    }

    /// Get position by ID
    pub async fn find(&self, id: &str) -> Result<Option<Position>, DatabaseError> {
        let record = sqlx::query_as::<_, Position>("SELECT * FROM positions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to get position {}: {}", id, e);
                DatabaseError::QueryError(format!("Failed to get position: {}", e))
            })?;

        Ok(record)
    }

    /// Get position by ID inside the caller's transaction.
    pub async fn find_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<Option<Position>, DatabaseError> {
        let record = sqlx::query_as::<_, Position>("SELECT * FROM positions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| {
                error!("Failed to get position {}: {}", id, e);
                DatabaseError::QueryError(format!("Failed to get position: {}", e))
            })?;

        Ok(record)
    }

    /// All open positions for a symbol (trigger evaluation input).
    pub async fn open_for_symbol(&self, symbol: &str) -> Result<Vec<Position>, DatabaseError> {
        let records = sqlx::query_as::<_, Position>(
            "SELECT * FROM positions WHERE symbol = ?1 AND status = 'open'",
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get open positions for {}: {}", symbol, e);
            DatabaseError::QueryError(format!("Failed to get open positions: {}", e))
        })?;

        Ok(records)
    }

    /// All open positions for a user, newest first.
    pub async fn open_for_user(&self, user_id: &str) -> Result<Vec<Position>, DatabaseError> {
        let records = sqlx::query_as::<_, Position>(
            "SELECT * FROM positions WHERE user_id = ?1 AND status = 'open' ORDER BY opened_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get open positions for user {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to get open positions: {}", e))
        })?;

        Ok(records)
    }

    /// Close a position. The `status = 'open'` guard makes this the
    /// exactly-once gate: the losing side of a close race affects zero rows
    /// and gets `false`.
    pub async fn mark_closed(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        close_price: f64,
        reason: CloseReason,
        closed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE positions
            SET status = 'closed', close_price = ?1, close_reason = ?2, closed_at = ?3
            WHERE id = ?4 AND status = 'open'
            "#,
        )
        .bind(close_price)
        .bind(reason)
        .bind(closed_at)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            error!("Failed to close position {}: {}", id, e);
            DatabaseError::QueryError(format!("Failed to close position: {}", e))
        })?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    /// Replace the protective levels of an open position owned by `user_id`.
    /// Returns the updated row, or `None` when the position is missing, not
    /// owned, or no longer open.
    pub async fn update_stops(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        user_id: &str,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<Option<Position>, DatabaseError> {
        let record = sqlx::query_as::<_, Position>(
            r#"
            UPDATE positions
            SET stop_loss = ?1, take_profit = ?2
            WHERE id = ?3 AND user_id = ?4 AND status = 'open'
            RETURNING *
            "#,
        )
        .bind(stop_loss)
        .bind(take_profit)
        .bind(id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            error!("Failed to update stops for position {}: {}", id, e);
            DatabaseError::QueryError(format!("Failed to update stops: {}", e))
        })?;

        Ok(record)
    }
}

/// Trade history repository
#[derive(Clone)]
pub struct TradeHistoryRepository {
    pool: DbPool,
}

impl TradeHistoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append a settlement record inside the caller's transaction.
    pub async fn append(
        &self,
        conn: &mut SqliteConnection,
        trade: CreateTradeHistory,
    ) -> Result<TradeHistory, DatabaseError> {
        let record = sqlx::query_as::<_, TradeHistory>(
            r#"
            INSERT INTO trade_history (
                user_id, order_id, position_id, symbol, side,
                lots, entry_price, exit_price, pnl, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            RETURNING *
            "#,
        )
        .bind(&trade.user_id)
        .bind(&trade.order_id)
        .bind(&trade.position_id)
        .bind(&trade.symbol)
        .bind(trade.side)
        .bind(trade.lots)
        .bind(trade.entry_price)
        .bind(trade.exit_price)
        .bind(trade.pnl)
        .bind(trade.created_at)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            error!("Failed to append trade history: {}", e);
            DatabaseError::QueryError(format!("Failed to append trade history: {}", e))
        })?;

        debug!(
            "Appended trade history {} for position {}",
            record.id, record.position_id
        );
        Ok(record)
    }

    /// Count of settlement records for a position.
    pub async fn count_for_position(&self, position_id: &str) -> Result<i64, DatabaseError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM trade_history WHERE position_id = ?1")
                .bind(position_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to count trade history for {}: {}", position_id, e);
                    DatabaseError::QueryError(format!("Failed to count trade history: {}", e))
                })?;

        Ok(count)
    }
}

/// Wallet repository: the atomic ledger primitives. Every mutation is a
/// single SQL statement, so concurrent reservation and settlement on one
/// row cannot interleave into a lost update.
#[derive(Clone)]
pub struct WalletRepository {
    pool: DbPool,
}

impl WalletRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Lazily create the wallet row at `initial` if it does not exist yet.
    pub async fn ensure(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        kind: AccountKind,
        initial: f64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO wallets (user_id, kind, amount)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id, kind) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .bind(initial)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            error!("Failed to ensure wallet for {}/{}: {}", user_id, kind, e);
            DatabaseError::QueryError(format!("Failed to ensure wallet: {}", e))
        })?;

        Ok(())
    }

    /// Current balance inside the caller's transaction; zero for a missing row.
    pub async fn balance_in(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        kind: AccountKind,
    ) -> Result<f64, DatabaseError> {
        let amount: Option<f64> =
            sqlx::query_scalar("SELECT amount FROM wallets WHERE user_id = ?1 AND kind = ?2")
                .bind(user_id)
                .bind(kind)
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    error!("Failed to get balance for {}/{}: {}", user_id, kind, e);
                    DatabaseError::QueryError(format!("Failed to get balance: {}", e))
                })?;

        Ok(amount.unwrap_or(0.0))
    }

    /// Subtract `amount` if and only if the row holds at least that much.
    /// The balance guard lives in the statement itself, so two concurrent
    /// debits cannot both pass the check against the same pre-debit balance.
    /// Returns false for a missing row, an insufficient balance, or a
    /// non-positive or non-finite amount. Never drives a balance below zero.
    pub async fn try_debit(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        kind: AccountKind,
        amount: f64,
    ) -> Result<bool, DatabaseError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Ok(false);
        }

        let rows_affected = sqlx::query(
            r#"
            UPDATE wallets
            SET amount = amount - ?1
            WHERE user_id = ?2 AND kind = ?3 AND amount >= ?1
            "#,
        )
        .bind(amount)
        .bind(user_id)
        .bind(kind)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            error!("Failed to debit wallet for {}/{}: {}", user_id, kind, e);
            DatabaseError::QueryError(format!("Failed to debit wallet: {}", e))
        })?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    /// Add a signed delta to the wallet row, creating it at zero first if
    /// needed, and return the new balance. The balance may go negative;
    /// settlement is the only caller allowed to use that.
    pub async fn apply_net(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        kind: AccountKind,
        delta: f64,
    ) -> Result<f64, DatabaseError> {
        self.ensure(&mut *conn, user_id, kind, 0.0).await?;

        sqlx::query("UPDATE wallets SET amount = amount + ?1 WHERE user_id = ?2 AND kind = ?3")
            .bind(delta)
            .bind(user_id)
            .bind(kind)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                error!("Failed to settle wallet for {}/{}: {}", user_id, kind, e);
                DatabaseError::QueryError(format!("Failed to settle wallet: {}", e))
            })?;

        self.balance_in(conn, user_id, kind).await
    }

    /// All wallet rows for a user.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Wallet>, DatabaseError> {
        let records =
            sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE user_id = ?1 ORDER BY kind")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to list wallets for {}: {}", user_id, e);
                    DatabaseError::QueryError(format!("Failed to list wallets: {}", e))
                })?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{init_database, DatabaseConfig};

    async fn pool() -> DbPool {
        init_database(&DatabaseConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_wallet_ensure_is_lazy_and_idempotent() {
        let pool = pool().await;
        let wallets = WalletRepository::new(pool.clone());
        let mut conn = pool.acquire().await.unwrap();

        wallets
            .ensure(&mut conn, "u1", AccountKind::Demo, 25_000.0)
            .await
            .unwrap();
        // Second ensure must not reset the row.
        wallets
            .try_debit(&mut conn, "u1", AccountKind::Demo, 100.0)
            .await
            .unwrap();
        wallets
            .ensure(&mut conn, "u1", AccountKind::Demo, 25_000.0)
            .await
            .unwrap();

        let balance = wallets
            .balance_in(&mut conn, "u1", AccountKind::Demo)
            .await
            .unwrap();
        assert_eq!(balance, 24_900.0);
    }

    #[tokio::test]
    async fn test_try_debit_refuses_overdraft() {
        let pool = pool().await;
        let wallets = WalletRepository::new(pool.clone());
        let mut conn = pool.acquire().await.unwrap();

        wallets
            .ensure(&mut conn, "u1", AccountKind::Demo, 0.5)
            .await
            .unwrap();

        let ok = wallets
            .try_debit(&mut conn, "u1", AccountKind::Demo, 1.0)
            .await
            .unwrap();
        assert!(!ok);

        let balance = wallets
            .balance_in(&mut conn, "u1", AccountKind::Demo)
            .await
            .unwrap();
        assert_eq!(balance, 0.5);
    }

    #[tokio::test]
    async fn test_try_debit_rejects_invalid_amounts() {
        let pool = pool().await;
        let wallets = WalletRepository::new(pool.clone());
        let mut conn = pool.acquire().await.unwrap();

        wallets
            .ensure(&mut conn, "u1", AccountKind::Demo, 100.0)
            .await
            .unwrap();

        for amount in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let ok = wallets
                .try_debit(&mut conn, "u1", AccountKind::Demo, amount)
                .await
                .unwrap();
            assert!(!ok, "debit of {} must be refused", amount);
        }
    }

    #[tokio::test]
    async fn test_debit_missing_wallet_returns_false() {
        let pool = pool().await;
        let wallets = WalletRepository::new(pool.clone());
        let mut conn = pool.acquire().await.unwrap();

        let ok = wallets
            .try_debit(&mut conn, "ghost", AccountKind::Real, 1.0)
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_apply_net_may_go_negative() {
        let pool = pool().await;
        let wallets = WalletRepository::new(pool.clone());
        let mut conn = pool.acquire().await.unwrap();

        wallets
            .ensure(&mut conn, "u1", AccountKind::Real, 0.0)
            .await
            .unwrap();

        let balance = wallets
            .apply_net(&mut conn, "u1", AccountKind::Real, -3.5)
            .await
            .unwrap();
        assert_eq!(balance, -3.5);
    }

    #[tokio::test]
    async fn test_mark_closed_second_call_affects_nothing() {
        let pool = pool().await;
        let orders = OrderRepository::new(pool.clone());
        let positions = PositionRepository::new(pool.clone());
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();

        orders
            .insert(
                &mut conn,
                CreateOrder {
                    id: "ord_1".to_string(),
                    user_id: "u1".to_string(),
                    symbol: "BTCUSDT".to_string(),
                    side: crate::domain::entities::order::Side::Buy,
                    lots: 1.0,
                    entry_price: 100.0,
                    stop_loss: Some(90.0),
                    take_profit: Some(110.0),
                    created_at: now,
                },
            )
            .await
            .unwrap();
        positions
            .insert(
                &mut conn,
                CreatePosition {
                    id: "pos_1".to_string(),
                    order_id: "ord_1".to_string(),
                    user_id: "u1".to_string(),
                    symbol: "BTCUSDT".to_string(),
                    side: crate::domain::entities::order::Side::Buy,
                    lots: 1.0,
                    entry_price: 100.0,
                    stop_loss: Some(90.0),
                    take_profit: Some(110.0),
                    margin_reserved: 1.0,
                    account_kind: AccountKind::Demo,
                    opened_at: now,
                },
            )
            .await
            .unwrap();

        let first = positions
            .mark_closed(&mut conn, "pos_1", 110.0, CloseReason::Tp, now)
            .await
            .unwrap();
        let second = positions
            .mark_closed(&mut conn, "pos_1", 120.0, CloseReason::Manual, now)
            .await
            .unwrap();
        assert!(first);
        assert!(!second);

        drop(conn);
        let position = positions.find("pos_1").await.unwrap().unwrap();
        assert_eq!(position.close_price, Some(110.0));
        assert_eq!(
            position.close_reason,
            Some(crate::domain::entities::position::CloseReason::Tp)
        );
    }
}
