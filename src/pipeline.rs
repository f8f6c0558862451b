//! One résumé run, start to finish:
//! load inputs → generate → extract → merge/validate → render → mark the row done.
//!
//! Every stage either advances or ends the run. The sheet is only written
//! after the document is on disk.

use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::errors::{PipelineError, Stage};
use crate::extract::extract;
use crate::generation::GenerationService;
use crate::interrupt::Interrupt;
use crate::merge::merge;
use crate::models::{ContactHeader, JobPosting, MasterResume};
use crate::render::{output_file_name, Renderer};
use crate::sheets::{
    job_posting_from_row, status_column, SheetError, Spreadsheet, COL_DATE_APPLIED, DATE_FORMAT,
    STATUS_DONE,
};
use crate::store::ResumeStore;

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub row: usize,
    pub artifact: PathBuf,
}

struct Inputs {
    row: usize,
    cells: Vec<String>,
    status_col: usize,
    posting: JobPosting,
    header: ContactHeader,
    master: MasterResume,
}

pub struct Pipeline<'a> {
    sheet: &'a mut dyn Spreadsheet,
    generator: &'a dyn GenerationService,
    renderer: &'a dyn Renderer,
    store: &'a ResumeStore,
    template: &'a Path,
    output_dir: &'a Path,
    interrupt: &'a Interrupt,
    job: Option<(usize, JobPosting)>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        sheet: &'a mut dyn Spreadsheet,
        generator: &'a dyn GenerationService,
        renderer: &'a dyn Renderer,
        store: &'a ResumeStore,
        template: &'a Path,
        output_dir: &'a Path,
        interrupt: &'a Interrupt,
    ) -> Self {
        Self {
            sheet,
            generator,
            renderer,
            store,
            template,
            output_dir,
            interrupt,
            job: None,
        }
    }

    /// Sheet row and posting of the last run, once they were loaded.
    pub fn job(&self) -> Option<&(usize, JobPosting)> {
        self.job.as_ref()
    }

    /// Runs the given sheet row, or the last filled row when `row` is `None`.
    ///
    /// A stage that fails after Ctrl-C was pressed counts as interrupted: the
    /// signal also reaches child processes such as the `claude` CLI. A failed
    /// status write is still reported as such, since the document exists.
    pub fn run(&mut self, row: Option<usize>) -> Result<RunReport, PipelineError> {
        self.job = None;
        let result = self.run_stages(row).map_err(|e| match e {
            PipelineError::Interrupted { .. } | PipelineError::Persistence { .. } => e,
            e if self.interrupt.is_set() => PipelineError::Interrupted { stage: e.stage() },
            e => e,
        });
        if let Err(e) = &result {
            match e {
                PipelineError::Interrupted { .. } => info!("{e}"),
                _ => error!(stage = %e.stage(), "{e}"),
            }
        }
        result
    }

    fn run_stages(&mut self, row: Option<usize>) -> Result<RunReport, PipelineError> {
        self.checkpoint(Stage::LoadInputs)?;
        let inputs = self.load_inputs(row)?;
        self.job = Some((inputs.row, inputs.posting.clone()));
        info!(
            row = inputs.row,
            company = %inputs.posting.company_name,
            title = %inputs.posting.job_title,
            "Tailoring résumé"
        );

        self.checkpoint(Stage::InvokeGeneration)?;
        let raw = self
            .generator
            .generate(inputs.posting.job_description(), &inputs.master)?;

        self.checkpoint(Stage::Extract)?;
        let candidate = extract(raw)?;

        self.checkpoint(Stage::MergeValidate)?;
        let record = merge(&inputs.header, &inputs.posting, candidate)?;

        self.checkpoint(Stage::Render)?;
        let output = self
            .output_dir
            .join(output_file_name(&inputs.header.name, &inputs.posting));
        let artifact = self
            .renderer
            .render(self.template, &record.to_context(), &output)?;

        self.checkpoint(Stage::PersistStatus)?;
        self.persist_status(&inputs, &artifact)?;

        info!(row = inputs.row, artifact = %artifact.display(), "Run complete");
        Ok(RunReport {
            row: inputs.row,
            artifact,
        })
    }

    fn checkpoint(&self, next: Stage) -> Result<(), PipelineError> {
        if self.interrupt.is_set() {
            return Err(PipelineError::Interrupted { stage: next });
        }
        Ok(())
    }

    fn load_inputs(&self, row: Option<usize>) -> Result<Inputs, PipelineError> {
        let (row, cells) = match row {
            Some(row) => (row, self.sheet.get_row(row).map_err(PipelineError::input_load)?),
            None => self.sheet.get_last_row().map_err(PipelineError::input_load)?,
        };
        if row == 1 {
            return Err(PipelineError::input_load("row 1 is the header row, not a job"));
        }
        let status_col = self
            .sheet
            .get_row(1)
            .and_then(|header| status_column(&header))
            .map_err(PipelineError::input_load)?;
        let posting = job_posting_from_row(row, &cells).map_err(PipelineError::input_load)?;
        let header = self.store.load_header().map_err(PipelineError::input_load)?;
        let master = self
            .store
            .load_master_resume()
            .map_err(PipelineError::input_load)?;

        Ok(Inputs {
            row,
            cells,
            status_col,
            posting,
            header,
            master,
        })
    }

    /// Date applied (when blank) and then the completion marker.
    fn persist_status(&mut self, inputs: &Inputs, artifact: &Path) -> Result<(), PipelineError> {
        let persistence = |e: SheetError| PipelineError::Persistence {
            artifact: artifact.to_path_buf(),
            reason: e.to_string(),
        };

        let date_blank = inputs
            .cells
            .get(COL_DATE_APPLIED - 1)
            .is_none_or(|d| d.trim().is_empty());
        if date_blank && inputs.status_col != COL_DATE_APPLIED {
            let date = inputs.posting.date_applied.format(DATE_FORMAT).to_string();
            self.sheet
                .update_cell(inputs.row, COL_DATE_APPLIED, &date)
                .map_err(persistence)?;
        }
        self.sheet
            .update_cell(inputs.row, inputs.status_col, STATUS_DONE)
            .map_err(persistence)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{RawResult, StageOutput};
    use crate::generation::tests::{master, ScriptedProvider};
    use crate::generation::{GenerationError, ResumeWriter};
    use crate::render::tests::{write_template, DOCUMENT_XML};
    use crate::render::{DocxRenderer, RenderError};
    use crate::sheets::tests::MemorySheet;
    use crate::store::{HEADER_FILE, RESUME_FILE};
    use serde_json::{json, Value};
    use std::cell::{Cell, RefCell};
    use std::fs;

    const FENCED: &str = "Here is your résumé:\n```json\n{\"professional_summary\": {\"summary\": \"Rust engineer.\"}, \"work_experience\": [{\"title\": \"Engineer\", \"company\": \"Initech\", \"startDate\": \"2019\", \"endDate\": null, \"responsibilities\": [\"Built billing\"]}], \"education\": [], \"skills\": [{\"category\": \"Languages\", \"items\": [\"Rust\"]}], \"projects\": []}\n```\nGood luck!";

    struct FixedGenerator {
        output: RefCell<Option<Result<RawResult, GenerationError>>>,
        calls: Cell<usize>,
        interrupt_on_call: Option<Interrupt>,
    }

    impl FixedGenerator {
        fn new(output: Result<RawResult, GenerationError>) -> Self {
            Self {
                output: RefCell::new(Some(output)),
                calls: Cell::new(0),
                interrupt_on_call: None,
            }
        }
    }

    impl GenerationService for FixedGenerator {
        fn generate(&self, _jd: &str, _master: &MasterResume) -> Result<RawResult, GenerationError> {
            self.calls.set(self.calls.get() + 1);
            if let Some(interrupt) = &self.interrupt_on_call {
                interrupt.trigger();
            }
            self.output
                .borrow_mut()
                .take()
                .unwrap_or_else(|| Ok(RawResult::Text(String::new())))
        }
    }

    /// Records calls; fails when asked to.
    #[derive(Default)]
    struct RecordingRenderer {
        fail: bool,
        contexts: RefCell<Vec<Value>>,
    }

    impl Renderer for RecordingRenderer {
        fn render(&self, _template: &Path, context: &Value, output: &Path) -> Result<PathBuf, RenderError> {
            self.contexts.borrow_mut().push(context.clone());
            if self.fail {
                return Err(RenderError::TemplateNotFound(PathBuf::from("missing.docx")));
            }
            Ok(output.to_path_buf())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        store: ResumeStore,
        interrupt: Interrupt,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(HEADER_FILE),
            json!({
                "name": "Jane Doe",
                "phone": "555-0100",
                "email": "jane@example.com",
                "links": [{"platform": "GitHub", "url": "https://github.com/jane"}],
                "location": "NYC"
            })
            .to_string(),
        )
        .unwrap();
        let master = master();
        fs::write(
            dir.path().join(RESUME_FILE),
            json!({"content": master.content}).to_string(),
        )
        .unwrap();
        let store = ResumeStore::new(dir.path());
        Fixture {
            dir,
            store,
            interrupt: Interrupt::default(),
        }
    }

    const HEADER: [&str; 7] = [
        "Company",
        "Title",
        "Location",
        "Job ID",
        "Description",
        "Date Applied",
        "Resume Generated",
    ];
    const STATUS: usize = 7;

    fn sheet() -> MemorySheet {
        MemorySheet::with_rows(vec![
            HEADER.to_vec(),
            vec!["Acme", "Rust Engineer", "Remote", "R-1", "Write  Rust\\n at Acme."],
        ])
    }

    fn run(
        fx: &Fixture,
        sheet: &mut MemorySheet,
        generator: &dyn GenerationService,
        renderer: &dyn Renderer,
        row: Option<usize>,
    ) -> (Result<RunReport, PipelineError>, Option<(usize, JobPosting)>) {
        let template = fx.dir.path().join("template.docx");
        let out = fx.dir.path().join("out");
        let mut pipeline = Pipeline::new(
            sheet,
            generator,
            renderer,
            &fx.store,
            &template,
            &out,
            &fx.interrupt,
        );
        let result = pipeline.run(row);
        (result, pipeline.job().cloned())
    }

    #[test]
    fn test_fenced_json_runs_to_done() {
        let fx = fixture();
        let mut sheet = sheet();
        let generator = FixedGenerator::new(Ok(RawResult::Text(FENCED.into())));
        let renderer = RecordingRenderer::default();

        let (result, job) = run(&fx, &mut sheet, &generator, &renderer, None);
        let report = result.unwrap();

        assert_eq!(report.row, 2);
        assert_eq!(
            report.artifact,
            fx.dir.path().join("out").join("jane_doe_Acme_Rust_Engineer_R-1.docx")
        );
        assert_eq!(job.unwrap().1.job_description(), "Write Rust at Acme.");

        let contexts = renderer.contexts.borrow();
        assert_eq!(contexts[0]["header"]["location"], "Remote");
        assert_eq!(contexts[0]["content"]["skills"][0]["items"][0], "Rust");
        assert_eq!(contexts[0]["content"]["work_experience"][0]["endDate"], Value::Null);

        assert_eq!(sheet.cell(2, STATUS), Some("Done"));
        assert!(sheet.cell(2, COL_DATE_APPLIED).is_some_and(|d| !d.is_empty()));
        // Stored header is untouched by the location override.
        assert_eq!(fx.store.load_header().unwrap().location, "NYC");
    }

    #[test]
    fn test_short_row_fails_before_generation() {
        let fx = fixture();
        let mut sheet =
            MemorySheet::with_rows(vec![HEADER.to_vec(), vec!["Acme", "Engineer", "Remote", "R-1"]]);
        let generator = FixedGenerator::new(Ok(RawResult::Text(FENCED.into())));
        let renderer = RecordingRenderer::default();

        let (result, job) = run(&fx, &mut sheet, &generator, &renderer, None);
        let err = result.unwrap_err();

        assert!(matches!(&err, PipelineError::InputLoad(msg) if msg.contains("found 4")));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(generator.calls.get(), 0);
        assert!(job.is_none());
        assert_eq!(sheet.cell(2, STATUS), None);
    }

    #[test]
    fn test_header_row_is_not_a_job() {
        let fx = fixture();
        let mut sheet = MemorySheet::with_rows(vec![HEADER.to_vec()]);
        let generator = FixedGenerator::new(Ok(RawResult::Text(FENCED.into())));
        let renderer = RecordingRenderer::default();

        let err = run(&fx, &mut sheet, &generator, &renderer, None).0.unwrap_err();
        assert!(matches!(&err, PipelineError::InputLoad(msg) if msg.contains("header row")));
        assert_eq!(generator.calls.get(), 0);
    }

    #[test]
    fn test_status_is_written_under_its_header() {
        let fx = fixture();
        let mut sheet = MemorySheet::with_rows(vec![
            vec!["Company", "Title", "Location", "Job ID", "Description", "Date Applied", "Notes", "Resume Generated"],
            vec!["Acme", "Rust Engineer", "Remote", "R-1", "Write Rust.", "", "keep me"],
        ]);
        let generator = FixedGenerator::new(Ok(RawResult::Text(FENCED.into())));
        let renderer = RecordingRenderer::default();

        run(&fx, &mut sheet, &generator, &renderer, None).0.unwrap();
        assert_eq!(sheet.cell(2, 7), Some("keep me"));
        assert_eq!(sheet.cell(2, 8), Some("Done"));
    }

    #[test]
    fn test_missing_status_header_fails_before_generation() {
        let fx = fixture();
        let mut sheet = MemorySheet::with_rows(vec![
            vec!["Company", "Title", "Location", "Job ID", "Description", "Date", "Status"],
            vec!["Acme", "Rust Engineer", "Remote", "R-1", "Write Rust."],
        ]);
        let generator = FixedGenerator::new(Ok(RawResult::Text(FENCED.into())));
        let renderer = RecordingRenderer::default();

        let err = run(&fx, &mut sheet, &generator, &renderer, None).0.unwrap_err();
        assert!(matches!(&err, PipelineError::InputLoad(msg) if msg.contains("'Resume Generated'")));
        assert_eq!(generator.calls.get(), 0);
        assert_eq!(sheet.cell(2, 7), None);
    }

    #[test]
    fn test_explicit_row_is_used() {
        let fx = fixture();
        let mut sheet = sheet();
        sheet.rows.push(vec!["Other".into()]);
        let generator = FixedGenerator::new(Ok(RawResult::Text(FENCED.into())));
        let renderer = RecordingRenderer::default();

        let (result, _) = run(&fx, &mut sheet, &generator, &renderer, Some(2));
        assert_eq!(result.unwrap().row, 2);
        assert_eq!(sheet.cell(3, STATUS), None);
    }

    #[test]
    fn test_existing_date_is_kept() {
        let fx = fixture();
        let mut sheet = sheet();
        sheet.rows[1].push("2024-12-24".into());
        let generator = FixedGenerator::new(Ok(RawResult::Text(FENCED.into())));
        let renderer = RecordingRenderer::default();

        run(&fx, &mut sheet, &generator, &renderer, None).0.unwrap();
        assert_eq!(sheet.cell(2, COL_DATE_APPLIED), Some("2024-12-24"));
        assert_eq!(sheet.cell(2, STATUS), Some("Done"));
    }

    #[test]
    fn test_unparseable_output_is_an_extraction_error() {
        let fx = fixture();
        let mut sheet = sheet();
        let generator = FixedGenerator::new(Ok(RawResult::Text("Sorry, no.".into())));
        let renderer = RecordingRenderer::default();

        let err = run(&fx, &mut sheet, &generator, &renderer, None).0.unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(_)));
        assert_eq!(err.stage(), Stage::Extract);
        assert!(renderer.contexts.borrow().is_empty());
    }

    #[test]
    fn test_missing_field_is_a_validation_error() {
        let fx = fixture();
        let mut sheet = sheet();
        let generator = FixedGenerator::new(Ok(RawResult::Wrapped(StageOutput {
            task: "resume_review".into(),
            raw: json!({"professional_summary": {"summary": "x"}, "work_experience": []}),
        })));
        let renderer = RecordingRenderer::default();

        let err = run(&fx, &mut sheet, &generator, &renderer, None).0.unwrap_err();
        let PipelineError::Validation(validation) = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert_eq!(validation.path, "education");
        assert_eq!(sheet.cell(2, STATUS), None);
    }

    #[test]
    fn test_render_failure_leaves_status_unwritten() {
        let fx = fixture();
        let mut sheet = sheet();
        let generator = FixedGenerator::new(Ok(RawResult::Text(FENCED.into())));
        let renderer = RecordingRenderer {
            fail: true,
            ..Default::default()
        };

        let err = run(&fx, &mut sheet, &generator, &renderer, None).0.unwrap_err();
        assert!(matches!(err, PipelineError::Rendering(_)));
        assert_eq!(sheet.cell(2, STATUS), None);
        assert_eq!(sheet.cell(2, COL_DATE_APPLIED), None);
    }

    #[test]
    fn test_status_write_failure_names_the_artifact() {
        let fx = fixture();
        let mut sheet = sheet();
        sheet.fail_updates = true;
        let generator = FixedGenerator::new(Ok(RawResult::Text(FENCED.into())));
        let renderer = RecordingRenderer::default();

        let err = run(&fx, &mut sheet, &generator, &renderer, None).0.unwrap_err();
        let PipelineError::Persistence { artifact, reason } = &err else {
            panic!("expected persistence error, got {err:?}");
        };
        assert!(artifact.ends_with("jane_doe_Acme_Rust_Engineer_R-1.docx"));
        assert!(reason.contains("503"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_generation_failure() {
        let fx = fixture();
        let mut sheet = sheet();
        let generator = FixedGenerator::new(Err(GenerationError::Output {
            task: "job_analysis",
            reason: "empty".into(),
        }));
        let renderer = RecordingRenderer::default();

        let err = run(&fx, &mut sheet, &generator, &renderer, None).0.unwrap_err();
        assert_eq!(err.stage(), Stage::InvokeGeneration);
    }

    #[test]
    fn test_interrupt_before_start_touches_nothing() {
        let fx = fixture();
        fx.interrupt.trigger();
        let mut sheet = sheet();
        let generator = FixedGenerator::new(Ok(RawResult::Text(FENCED.into())));
        let renderer = RecordingRenderer::default();

        let err = run(&fx, &mut sheet, &generator, &renderer, None).0.unwrap_err();
        assert!(matches!(err, PipelineError::Interrupted { stage: Stage::LoadInputs }));
        assert_eq!(err.exit_code(), 0);
        assert_eq!(generator.calls.get(), 0);
    }

    #[test]
    fn test_interrupt_during_generation_stops_before_extract() {
        let fx = fixture();
        let mut sheet = sheet();
        let mut generator = FixedGenerator::new(Ok(RawResult::Text(FENCED.into())));
        generator.interrupt_on_call = Some(fx.interrupt.clone());
        let renderer = RecordingRenderer::default();

        let err = run(&fx, &mut sheet, &generator, &renderer, None).0.unwrap_err();
        assert!(matches!(err, PipelineError::Interrupted { stage: Stage::Extract }));
        assert!(renderer.contexts.borrow().is_empty());
        assert_eq!(sheet.cell(2, STATUS), None);
    }

    #[test]
    fn test_stage_failing_after_interrupt_counts_as_interrupted() {
        let fx = fixture();
        let mut sheet = sheet();
        let mut generator = FixedGenerator::new(Err(GenerationError::Call {
            task: "job_analysis",
            source: anyhow::anyhow!("claude CLI failed: killed by SIGINT"),
        }));
        generator.interrupt_on_call = Some(fx.interrupt.clone());
        let renderer = RecordingRenderer::default();

        let err = run(&fx, &mut sheet, &generator, &renderer, None).0.unwrap_err();
        assert!(matches!(err, PipelineError::Interrupted { stage: Stage::InvokeGeneration }));
        assert_eq!(err.exit_code(), 0);
        assert!(renderer.contexts.borrow().is_empty());
        assert_eq!(sheet.cell(2, STATUS), None);
    }

    #[test]
    fn test_end_to_end_with_llm_chain_and_docx() {
        let fx = fixture();
        write_template(&fx.dir.path().join("template.docx"), DOCUMENT_XML);
        let mut sheet = sheet();

        let analysis = json!({"job_details": {"company_name": "Acme"}, "skills": {"technical": ["Rust"]}});
        let draft = FENCED.to_string();
        let provider = ScriptedProvider::new(vec![
            Ok(analysis.to_string()),
            Ok(draft),
            Ok(json!({"approved": true, "issues": [], "revised": null}).to_string()),
        ]);
        let writer = ResumeWriter::new(Box::new(provider));

        let (result, _) = run(&fx, &mut sheet, &writer, &DocxRenderer, None);
        let report = result.unwrap();
        assert!(report.artifact.is_file());
        assert_eq!(sheet.cell(2, STATUS), Some("Done"));
    }
}
