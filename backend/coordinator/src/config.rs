//! Application configuration loaded from environment variables.

use std::time::Duration;

use crate::amount::Wei;
use crate::errors::{CoordinatorError, Result};
use crate::validate;

#[derive(Debug, Clone)]
pub struct Config {
    /// EVM JSON-RPC endpoint (e.g. https://sepolia.base.org)
    pub rpc_url: String,
    /// Address of the deployed BountyEscrow contract
    pub escrow_address: String,
    /// SQLite database URL
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    pub pool: PoolConfig,
    pub confirmation: ConfirmationConfig,
    pub policy: Policy,
}

/// Bounds of the shared connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_connections: 20,
            idle_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(2),
        }
    }
}

/// How long, and how deep, to wait for a transaction to be final enough.
#[derive(Debug, Clone)]
pub struct ConfirmationConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Blocks including the transaction's own block.
    pub required_confirmations: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        ConfirmationConfig {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            required_confirmations: 1,
        }
    }
}

/// Deployment policy. Read-only inputs to the coordinator.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Platform fee in basis points (250 = 2.5%).
    pub platform_fee_bps: u32,
    pub min_bounty_amount: Wei,
    pub max_bounty_amount: Wei,
    pub min_deadline_lead: Duration,
    pub max_deadline_horizon: Duration,
    pub refund_grace_period: Duration,
    /// Reputation credited to a submitter per confirmed win.
    pub reputation_per_win: i64,
}

const HOUR: u64 = 3600;
const DAY: u64 = 24 * HOUR;

impl Default for Policy {
    fn default() -> Self {
        Policy {
            platform_fee_bps: 250,
            min_bounty_amount: Wei(1_000_000_000_000_000),
            max_bounty_amount: Wei(10 * Wei::ONE_ETH.0),
            min_deadline_lead: Duration::from_secs(HOUR),
            max_deadline_horizon: Duration::from_secs(30 * DAY),
            refund_grace_period: Duration::from_secs(7 * DAY),
            reputation_per_win: 10,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Policy::default();
        let policy = Policy {
            platform_fee_bps: parsed("PLATFORM_FEE_BPS", defaults.platform_fee_bps)?,
            min_bounty_amount: eth_var("MIN_BOUNTY_ETH", defaults.min_bounty_amount)?,
            max_bounty_amount: eth_var("MAX_BOUNTY_ETH", defaults.max_bounty_amount)?,
            min_deadline_lead: Duration::from_secs(
                parsed::<u64>("MIN_DEADLINE_HOURS", 1)? * HOUR,
            ),
            max_deadline_horizon: Duration::from_secs(
                parsed::<u64>("MAX_DEADLINE_DAYS", 30)? * DAY,
            ),
            refund_grace_period: Duration::from_secs(
                parsed::<u64>("REFUND_GRACE_PERIOD_DAYS", 7)? * DAY,
            ),
            reputation_per_win: parsed("REPUTATION_PER_WIN", defaults.reputation_per_win)?,
        };
        if policy.platform_fee_bps > 10_000 {
            return Err(CoordinatorError::Config(
                "PLATFORM_FEE_BPS must be at most 10000".to_string(),
            ));
        }
        if policy.min_bounty_amount > policy.max_bounty_amount {
            return Err(CoordinatorError::Config(
                "MIN_BOUNTY_ETH must not exceed MAX_BOUNTY_ETH".to_string(),
            ));
        }

        let pool_defaults = PoolConfig::default();
        let pool = PoolConfig {
            max_connections: parsed("DB_MAX_CONNECTIONS", pool_defaults.max_connections)?,
            idle_timeout: Duration::from_secs(parsed("DB_IDLE_TIMEOUT_SECS", 30)?),
            acquire_timeout: Duration::from_secs(parsed("DB_ACQUIRE_TIMEOUT_SECS", 2)?),
        };

        let confirmation = ConfirmationConfig {
            timeout: Duration::from_secs(parsed("CONFIRMATION_TIMEOUT_SECS", 120)?),
            poll_interval: Duration::from_millis(parsed("CONFIRMATION_POLL_MS", 2000)?),
            required_confirmations: parsed("REQUIRED_CONFIRMATIONS", 1u64)?.max(1),
        };

        let escrow_address = env_var("ESCROW_ADDRESS").map_err(|_| {
            CoordinatorError::Config("ESCROW_ADDRESS environment variable is required".to_string())
        })?;
        let escrow_address = validate::address(&escrow_address)
            .map_err(|e| CoordinatorError::Config(format!("Invalid ESCROW_ADDRESS: {e}")))?;

        Ok(Config {
            rpc_url: env_var("RPC_URL").unwrap_or_else(|_| "https://sepolia.base.org".to_string()),
            escrow_address,
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./bounties.db".to_string()),
            api_port: parsed("API_PORT", 3001)?,
            pool,
            confirmation,
            policy,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| CoordinatorError::Config(format!("Missing env var: {key}")))
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env_var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| CoordinatorError::Config(format!("Invalid {key}"))),
        Err(_) => Ok(default),
    }
}

fn eth_var(key: &str, default: Wei) -> Result<Wei> {
    match env_var(key) {
        Ok(raw) => Wei::from_eth_str(&raw)
            .map_err(|_| CoordinatorError::Config(format!("Invalid {key}"))),
        Err(_) => Ok(default),
    }
}
