use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::extract::ExtractionFailure;
use crate::generation::GenerationError;
use crate::merge::ValidationError;
use crate::render::RenderError;

/// Pipeline stages in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LoadInputs,
    InvokeGeneration,
    Extract,
    MergeValidate,
    Render,
    PersistStatus,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::LoadInputs => "load_inputs",
            Stage::InvokeGeneration => "invoke_generation",
            Stage::Extract => "extract",
            Stage::MergeValidate => "merge_validate",
            Stage::Render => "render",
            Stage::PersistStatus => "persist_status",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a pipeline run. Every variant ends the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to load inputs: {0}")]
    InputLoad(String),

    #[error("Generation service failed: {0}")]
    GenerationInvocation(#[from] GenerationError),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionFailure),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Rendering failed: {0}")]
    Rendering(#[from] RenderError),

    /// The document exists but the sheet was not updated. Needs manual reconciliation.
    #[error("Status write failed after rendering {}: {reason}", .artifact.display())]
    Persistence { artifact: PathBuf, reason: String },

    /// Ctrl-C arrived. `stage` is the stage that was about to start or was running.
    #[error("Interrupted at {stage}")]
    Interrupted { stage: Stage },
}

impl PipelineError {
    pub fn input_load(err: impl fmt::Display) -> Self {
        PipelineError::InputLoad(err.to_string())
    }

    /// Stage the run was in when it stopped.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::InputLoad(_) => Stage::LoadInputs,
            PipelineError::GenerationInvocation(_) => Stage::InvokeGeneration,
            PipelineError::Extraction(_) => Stage::Extract,
            PipelineError::Validation(_) => Stage::MergeValidate,
            PipelineError::Rendering(_) => Stage::Render,
            PipelineError::Persistence { .. } => Stage::PersistStatus,
            PipelineError::Interrupted { stage } => *stage,
        }
    }

    /// Interrupted runs exit 0, everything else exits 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Interrupted { .. } => 0,
            _ => 1,
        }
    }
}
