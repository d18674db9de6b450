pub mod error;
pub mod orchestrator;
pub mod summary;

pub use error::{PartialRun, PipelineError, Stage};
pub use orchestrator::{Pipeline, PipelineRun};
pub use summary::{RunReport, RunSummary, StageCount};
