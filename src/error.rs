use std::path::PathBuf;
use thiserror::Error;

/// Structural failures of a pipeline run.
///
/// Per-country provider failures never surface here, they end up as
/// [`crate::forecast::collector::SkipReason`] instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to load {path}: {reason}")]
    DataLoad { path: PathBuf, reason: String },
    #[error("None of the columns {aliases:?} found in {source_name} (available: {available:?})")]
    Schema {
        source_name: String,
        aliases: Vec<String>,
        available: Vec<String>,
    },
    #[error("No forecast data available")]
    EmptyDataset,
}

impl PipelineError {
    pub fn data_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::DataLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
