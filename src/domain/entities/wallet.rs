use serde::Serialize;
use sqlx::FromRow;

use crate::domain::entities::account::AccountKind;

/// One ledger row per (user, account kind). Created lazily; the demo
/// partition starts at the configured initial balance, real at zero.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: i64,
    pub user_id: String,
    pub kind: AccountKind,
    pub amount: f64,
}
