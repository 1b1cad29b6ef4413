use thiserror::Error;

/// Rejections at the engine boundary. These are never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Market {0} not found")]
    MarketNotFound(i64),

    #[error("Market {0} is already resolved")]
    MarketAlreadyResolved(i64),

    #[error("Market {market_id} is not open (status: {status})")]
    MarketNotOpen { market_id: i64, status: String },

    #[error("Insufficient balance for user {user_id}: need {needed:.2}")]
    InsufficientBalance { user_id: String, needed: f64 },

    #[error("Invalid stake: {0}")]
    InvalidStake(f64),

    #[error("Position {0} is already settled")]
    PositionAlreadySettled(i64),

    #[error("Insufficient candidates: {available} unique-fixture legs available, {required} required")]
    InsufficientCandidates { available: usize, required: usize },

    #[error("Locked legs reference fixture {0} more than once")]
    DuplicateLockedFixture(i64),

    #[error("No finished result for fixture {0}")]
    ResultMissing(i64),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid job options: {0}")]
    InvalidOptions(String),
}
