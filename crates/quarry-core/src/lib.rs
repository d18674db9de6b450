pub mod cancel;
pub mod config;
pub mod error;
pub mod logging;
pub mod retry;
pub mod types;

pub use cancel::CancellationToken;
pub use config::PipelineConfig;
pub use error::{ItemFailure, QuarryError, Result};
pub use retry::RetryPolicy;
pub use types::*;
