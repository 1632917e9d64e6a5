//! Error types for the rebalancer.
//!
//! Construction problems are fatal and surface as [`ConfigError`].
//! Instruction failures reported by the host surface as [`BrokerError`] and
//! are recorded against the instruction, never retried.

use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Fatal configuration errors raised while building a strategy.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("target weights are not configured")]
    MissingTargetWeights,

    #[error("trigger configuration is missing")]
    MissingTriggers,

    #[error("weight for {symbol} must be within [0, 1], got {weight}")]
    InvalidWeight { symbol: String, weight: Decimal },

    #[error("target weights sum to {0}, which exceeds 1")]
    WeightSumExceeded(Decimal),

    #[error("symbol {0} is configured more than once")]
    DuplicateSymbol(String),

    #[error("ranking trigger selects {expected} symbols but has {actual} weights")]
    RankingWeightCount { expected: usize, actual: usize },

    #[error("ranking weights must sum to 1, got {0}")]
    RankingWeightSum(Decimal),

    #[error("pairwise trigger needs exactly two symbols, got {0}")]
    PairwiseSymbols(usize),

    #[error("period day must be non-zero and within 31, got {0}")]
    InvalidPeriodDay(i32),

    #[error("close date {close} precedes open date {open}")]
    InvalidDateRange { open: NaiveDate, close: NaiveDate },

    #[error("threshold for {symbol} must not be negative")]
    NegativeThreshold { symbol: String },

    #[error("financing ratio for {symbol} must be positive, got {ratio}")]
    InvalidFinancingRatio { symbol: String, ratio: Decimal },

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Reasons the host refuses or fails to execute an instruction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BrokerError {
    #[error("no price for {symbol} on {date}")]
    NoPrice { symbol: String, date: NaiveDate },

    #[error("insufficient cash for {symbol}: need {required}, have {available}")]
    InsufficientCash {
        symbol: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("instruction for {0} has zero size")]
    ZeroSize(String),

    #[error("no position in {0} to sell")]
    NoPosition(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
