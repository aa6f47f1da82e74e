pub mod config;
pub mod error;
pub mod types;

pub use config::AskgateConfig;
pub use error::{AskgateError, Result};
pub use types::*;
