use thiserror::Error;

#[derive(Error, Debug)]
pub enum SalesAuditError {
    #[error("ABC thresholds must sum to 100 (got {sum:.2} from A={a}, B={b}, C={c}, D={d})")]
    InvalidThresholds {
        a: f64,
        b: f64,
        c: f64,
        d: f64,
        sum: f64,
    },

    #[error("Classification impossible: total value for {0} is zero")]
    ZeroTotal(String),

    #[error("Invalid tolerance {0}: must be a finite, non-negative number")]
    InvalidTolerance(f64),

    #[error("Invalid period length {0}: a custom period needs at least one day")]
    InvalidPeriodLength(u32),

    #[error("Invalid top-N size {0}: must be at least 1")]
    InvalidTopN(usize),

    #[error("Invalid stock settings: {0}")]
    InvalidStockSettings(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SalesAuditError>;
