use crate::persistence::DatabaseConfig;

/// How the margin withheld at order open is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarginMode {
    /// Fixed USD amount per trade regardless of size.
    Flat,
    /// `lots * entry_price / leverage`.
    Leverage,
}

#[derive(Debug, Clone)]
pub struct MarginConfig {
    pub mode: MarginMode,
    pub flat_amount: f64,
    pub leverage: f64,
}

impl Default for MarginConfig {
    fn default() -> Self {
        Self {
            mode: MarginMode::Flat,
            flat_amount: 1.0,
            leverage: 100.0,
        }
    }
}

/// Engine configuration, environment-driven with working defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bind_addr: String,
    pub database: DatabaseConfig,
    /// Starting balance for lazily created demo wallets.
    pub demo_initial_balance: f64,
    pub margin: MarginConfig,
    /// Contract size applied to FX-style symbols.
    pub fx_contract_size: f64,
    /// Broadcast buffer per event-bus subscriber.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            database: DatabaseConfig::default(),
            demo_initial_balance: 25_000.0,
            margin: MarginConfig::default(),
            fx_contract_size: 100_000.0,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = EngineConfig::default();

        let margin_mode = match std::env::var("MARGIN_MODE").as_deref() {
            Ok("leverage") => MarginMode::Leverage,
            _ => MarginMode::Flat,
        };

        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database: DatabaseConfig::from_env(),
            demo_initial_balance: env_f64("DEMO_INITIAL_BALANCE", defaults.demo_initial_balance),
            margin: MarginConfig {
                mode: margin_mode,
                flat_amount: env_f64("MARGIN_FLAT_AMOUNT", defaults.margin.flat_amount),
                leverage: env_f64("MARGIN_LEVERAGE", defaults.margin.leverage),
            },
            fx_contract_size: env_f64("FX_CONTRACT_SIZE", defaults.fx_contract_size),
            event_capacity: std::env::var("EVENT_BUS_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.event_capacity),
        }
    }
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|v: &f64| v.is_finite())
        .unwrap_or(default)
}
