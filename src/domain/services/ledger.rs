//! Ledger service: the wallet-facing credit/debit/balance API over the
//! atomic repository primitives. Deposit confirmations from the payment
//! collaborator land here as a single `credit` call.

use tracing::info;

use crate::domain::entities::account::AccountKind;
use crate::domain::entities::wallet::Wallet;
use crate::domain::errors::EngineError;
use crate::events::{EventBus, TradingEvent};
use crate::persistence::repository::WalletRepository;
use crate::persistence::{DatabaseError, DbPool};

#[derive(Clone)]
pub struct Ledger {
    pool: DbPool,
    wallets: WalletRepository,
    demo_initial_balance: f64,
    events: EventBus,
}

impl Ledger {
    pub fn new(
        pool: DbPool,
        wallets: WalletRepository,
        demo_initial_balance: f64,
        events: EventBus,
    ) -> Self {
        Self {
            pool,
            wallets,
            demo_initial_balance,
            events,
        }
    }

    pub fn initial_for(&self, kind: AccountKind) -> f64 {
        match kind {
            AccountKind::Demo => self.demo_initial_balance,
            AccountKind::Real => 0.0,
        }
    }

    /// Balance for one partition, lazily creating the wallet row on first
    /// touch.
    pub async fn balance(&self, user_id: &str, kind: AccountKind) -> Result<f64, EngineError> {
        let mut conn = self.pool.acquire().await.map_err(DatabaseError::from)?;
        self.wallets
            .ensure(&mut conn, user_id, kind, self.initial_for(kind))
            .await?;
        let amount = self.wallets.balance_in(&mut conn, user_id, kind).await?;
        Ok(amount)
    }

    /// Both wallet rows for a user, creating missing ones lazily.
    pub async fn balances(&self, user_id: &str) -> Result<Vec<Wallet>, EngineError> {
        {
            let mut conn = self.pool.acquire().await.map_err(DatabaseError::from)?;
            for kind in [AccountKind::Demo, AccountKind::Real] {
                self.wallets
                    .ensure(&mut conn, user_id, kind, self.initial_for(kind))
                    .await?;
            }
        }
        Ok(self.wallets.list_for_user(user_id).await?)
    }

    /// Credit a finite positive amount; anything else is a no-op that
    /// returns the unchanged balance. Emits `wallet_updated` on success.
    pub async fn credit(
        &self,
        user_id: &str,
        amount: f64,
        kind: AccountKind,
    ) -> Result<f64, EngineError> {
        if !amount.is_finite() || amount <= 0.0 {
            return self.balance(user_id, kind).await;
        }

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        self.wallets
            .ensure(&mut *tx, user_id, kind, self.initial_for(kind))
            .await?;
        let balance = self
            .wallets
            .apply_net(&mut *tx, user_id, kind, amount)
            .await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        info!("credited {:.2} USD to {}/{}", amount, user_id, kind);
        self.events.emit(TradingEvent::WalletUpdated {
            user_id: user_id.to_string(),
            kind,
            amount: balance,
        });
        Ok(balance)
    }

    /// Debit with the non-negative guarantee: false when the balance does
    /// not cover the amount, and the balance is untouched.
    pub async fn debit(
        &self,
        user_id: &str,
        amount: f64,
        kind: AccountKind,
    ) -> Result<bool, EngineError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        self.wallets
            .ensure(&mut *tx, user_id, kind, self.initial_for(kind))
            .await?;
        let debited = self
            .wallets
            .try_debit(&mut *tx, user_id, kind, amount)
            .await?;
        let balance = self.wallets.balance_in(&mut *tx, user_id, kind).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        if debited {
            self.events.emit(TradingEvent::WalletUpdated {
                user_id: user_id.to_string(),
                kind,
                amount: balance,
            });
        }
        Ok(debited)
    }
}
