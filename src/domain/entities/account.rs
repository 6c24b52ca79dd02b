use serde::{Deserialize, Serialize};

/// Ledger partition a position settles against. Every user has at most one
/// wallet row per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AccountKind {
    #[default]
    Demo,
    Real,
}

impl std::fmt::Display for AccountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountKind::Demo => write!(f, "demo"),
            AccountKind::Real => write!(f, "real"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_kind_default_is_demo() {
        assert_eq!(AccountKind::default(), AccountKind::Demo);
    }

    #[test]
    fn test_account_kind_serde_lowercase() {
        assert_eq!(serde_json::to_string(&AccountKind::Real).unwrap(), "\"real\"");
        let kind: AccountKind = serde_json::from_str("\"demo\"").unwrap();
        assert_eq!(kind, AccountKind::Demo);
    }
}
