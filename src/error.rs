use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PairTradeError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("data error: {0}")]
    Data(String),
    #[error("numeric error at step {step}: {reason}")]
    Numeric { step: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, PairTradeError>;

impl PairTradeError {
    pub fn config(msg: impl Into<String>) -> Self {
        PairTradeError::Configuration(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        PairTradeError::Data(msg.into())
    }

    pub fn numeric(step: usize, reason: impl Into<String>) -> Self {
        PairTradeError::Numeric {
            step,
            reason: reason.into(),
        }
    }
}
