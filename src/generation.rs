//! The three chained LLM calls: analyze the posting, draft tailored content,
//! review the draft. The caller only sees the final `RawResult`.

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::ai::{AIProvider, CompletionOptions};
use crate::extract::{extract, RawResult, StageOutput};
use crate::models::{JobAnalysis, MasterResume, ReviewReport};
use crate::prompts::{
    fill, JOB_ANALYSIS_TEMPLATE, RESUME_DRAFT_TEMPLATE, RESUME_REVIEW_TEMPLATE, SYSTEM,
};

const ANALYSIS: CompletionOptions = CompletionOptions {
    max_tokens: 4096,
    temperature: 0.1,
};
const DRAFTING: CompletionOptions = CompletionOptions {
    max_tokens: 8192,
    temperature: 0.4,
};
const REVIEW: CompletionOptions = CompletionOptions {
    max_tokens: 8192,
    temperature: 0.2,
};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{task} call failed: {source:#}")]
    Call {
        task: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{task} returned unusable output: {reason}")]
    Output { task: &'static str, reason: String },
}

/// Opaque text-generation step: job description + master résumé in,
/// loosely structured résumé content out.
pub trait GenerationService {
    fn generate(
        &self,
        job_description: &str,
        master: &MasterResume,
    ) -> Result<RawResult, GenerationError>;
}

pub struct ResumeWriter {
    provider: Box<dyn AIProvider>,
}

impl ResumeWriter {
    pub fn new(provider: Box<dyn AIProvider>) -> Self {
        Self { provider }
    }

    fn call(
        &self,
        task: &'static str,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, GenerationError> {
        info!(task, model = self.provider.model_name(), "Running generation task");
        self.provider
            .complete(SYSTEM, prompt, options)
            .map_err(|source| GenerationError::Call { task, source })
    }

    fn analyze_job(&self, job_description: &str) -> Result<JobAnalysis, GenerationError> {
        const TASK: &str = "job_analysis";
        let prompt = fill(JOB_ANALYSIS_TEMPLATE, &[("job_description", job_description)]);
        let text = self.call(TASK, &prompt, &ANALYSIS)?;

        let map = extract(RawResult::Text(text)).map_err(|e| GenerationError::Output {
            task: TASK,
            reason: e.to_string(),
        })?;
        let mut analysis: JobAnalysis =
            serde_json::from_value(Value::Object(map)).map_err(|e| GenerationError::Output {
                task: TASK,
                reason: e.to_string(),
            })?;
        analysis.skills.dedup();
        if analysis.skills.is_empty() {
            warn!("Job analysis found no skills in the posting");
        }
        Ok(analysis)
    }

    fn review(&self, prompt: &str, draft: String) -> Result<RawResult, GenerationError> {
        const TASK: &str = "resume_review";
        let text = self.call(TASK, prompt, &REVIEW)?;

        let map = extract(RawResult::Text(text)).map_err(|e| GenerationError::Output {
            task: TASK,
            reason: e.to_string(),
        })?;
        let report: ReviewReport =
            serde_json::from_value(Value::Object(map)).map_err(|e| GenerationError::Output {
                task: TASK,
                reason: e.to_string(),
            })?;

        for issue in &report.issues {
            warn!(task = TASK, "{issue}");
        }

        let raw = match report.revised {
            Some(revised) => {
                info!(approved = report.approved, "Review revised the draft");
                Value::Object(revised)
            }
            None => {
                info!(approved = report.approved, "Review kept the draft");
                Value::String(draft)
            }
        };
        Ok(RawResult::Wrapped(StageOutput {
            task: TASK.to_string(),
            raw,
        }))
    }
}

impl GenerationService for ResumeWriter {
    fn generate(
        &self,
        job_description: &str,
        master: &MasterResume,
    ) -> Result<RawResult, GenerationError> {
        let analysis = self.analyze_job(job_description)?;
        let analysis_json = to_json(&analysis, "job_analysis")?;
        let master_json = to_json(&master.content, "resume_tailoring")?;

        let draft_prompt = fill(
            RESUME_DRAFT_TEMPLATE,
            &[
                ("job_analysis", &analysis_json),
                ("master_resume", &master_json),
            ],
        );
        let draft = self.call("resume_tailoring", &draft_prompt, &DRAFTING)?;

        let review_prompt = fill(
            RESUME_REVIEW_TEMPLATE,
            &[
                ("job_analysis", &analysis_json),
                ("master_resume", &master_json),
                ("draft", &draft),
            ],
        );
        self.review(&review_prompt, draft)
    }
}

fn to_json<T: serde::Serialize>(value: &T, task: &'static str) -> Result<String, GenerationError> {
    serde_json::to_string_pretty(value).map_err(|e| GenerationError::Output {
        task,
        reason: e.to_string(),
    })
}
