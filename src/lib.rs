// src/lib.rs
pub mod ports {
    pub mod replay_file;
}
pub mod backtest;
pub mod config;
pub mod error;
pub mod kalman;
pub mod pairtrade;
pub mod series;
pub mod signal;

pub use error::{PairTradeError, Result};
