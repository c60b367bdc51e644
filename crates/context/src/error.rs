//! Pipeline failure taxonomy

use thiserror::Error;
use wizsearch_common::AppError;

/// A stage of the pipeline failed.
///
/// An empty retrieval result is not an error; it is the `NoResults` branch of
/// the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("intent classification failed: {0}")]
    Classification(#[source] AppError),

    #[error("query rewrite failed: {0}")]
    Rewrite(#[source] AppError),

    #[error("retrieval failed: {0}")]
    Retrieval(#[source] AppError),

    #[error("follow-up generation failed: {0}")]
    Followup(#[source] AppError),

    #[error("answer stream failed: {0}")]
    Stream(#[source] AppError),
}

impl PipelineError {
    /// Name of the failing stage
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Classification(_) => "classification",
            PipelineError::Rewrite(_) => "rewrite",
            PipelineError::Retrieval(_) => "retrieval",
            PipelineError::Followup(_) => "followup",
            PipelineError::Stream(_) => "stream",
        }
    }

    /// The underlying failure
    pub fn source_error(&self) -> &AppError {
        match self {
            PipelineError::Classification(e)
            | PipelineError::Rewrite(e)
            | PipelineError::Retrieval(e)
            | PipelineError::Followup(e)
            | PipelineError::Stream(e) => e,
        }
    }

    /// Raw failure detail shown to the user and recorded on the trace
    pub fn detail(&self) -> String {
        self.source_error().to_string()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Classification(e)
            | PipelineError::Rewrite(e)
            | PipelineError::Retrieval(e)
            | PipelineError::Followup(e)
            | PipelineError::Stream(e) => e,
        }
    }
}
