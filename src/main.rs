mod ai;
mod config;
mod db;
mod errors;
mod extract;
mod generation;
mod interrupt;
mod merge;
mod models;
mod normalize;
mod pipeline;
mod prompts;
mod render;
mod sheets;
mod store;
mod template;

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::{Database, NewRun, OUTCOME_DONE, OUTCOME_FAILED, OUTCOME_INTERRUPTED};
use errors::PipelineError;
use generation::ResumeWriter;
use interrupt::Interrupt;
use models::JobPosting;
use normalize::NormalizePolicy;
use pipeline::Pipeline;
use render::DocxRenderer;
use sheets::{Spreadsheet, SheetsClient, Worksheet};
use store::ResumeStore;

#[derive(Parser)]
#[command(name = "tailor")]
#[command(about = "Tailor a résumé to a job posting from a Google Sheet")]
struct Cli {
    /// Directory holding header.json and resume.json
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Word template to render
    #[arg(long, global = true)]
    template: Option<PathBuf>,

    /// Where rendered résumés are written
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Model (deepseek, router-sonnet, sonnet, haiku, api-sonnet, api-haiku, gpt-4o, gpt-4o-mini)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Worksheet name inside the spreadsheet
    #[arg(long, global = true)]
    worksheet: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the run ledger
    Init,

    /// Generate a résumé for a sheet row
    Run {
        /// Sheet row (1-based); defaults to the last filled row
        #[arg(short, long)]
        row: Option<usize>,
    },

    /// List sheet rows without a generated résumé
    Pending,

    /// Append a job posting to the sheet
    Add {
        #[arg(long)]
        company: String,

        #[arg(long)]
        title: String,

        #[arg(long)]
        location: String,

        #[arg(long)]
        job_id: Option<String>,

        /// File containing the job description
        description: PathBuf,
    },

    /// Print a normalized copy of a text file
    Clean {
        /// Also drop characters that are unsafe in prompts
        #[arg(long)]
        prompt: bool,

        file: PathBuf,
    },

    /// Extract the structured record from saved generation output
    Extract { file: PathBuf },

    /// Show recent runs
    History {
        /// Number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Validate header.json, resume.json and the template
    Check,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    apply_overrides(&mut config, &cli);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Init => {
            let db = Database::open(config.db_path.as_deref())?;
            db.init()?;
            println!("Ledger initialized at {}", db.path().display());
        }

        Commands::Run { row } => {
            let code = run(&config, row)?;
            if code != 0 {
                std::process::exit(code);
            }
        }

        Commands::Pending => {
            let sheet = connect(&config)?;
            let rows = sheet.get_all_rows()?;
            let pending = sheets::pending_rows(&rows)?;
            if pending.is_empty() {
                println!("No pending rows.");
            } else {
                println!("{:<6} {:<25} {:<30} {:<15}", "ROW", "COMPANY", "TITLE", "LOCATION");
                println!("{}", "-".repeat(78));
                for (row, cells) in pending {
                    let cell = |i: usize| cells.get(i - 1).map(String::as_str).unwrap_or("");
                    println!(
                        "{:<6} {:<25} {:<30} {:<15}",
                        row,
                        truncate(cell(sheets::COL_COMPANY), 23),
                        truncate(cell(sheets::COL_TITLE), 28),
                        truncate(cell(sheets::COL_LOCATION), 15)
                    );
                }
            }
        }

        Commands::Add {
            company,
            title,
            location,
            job_id,
            description,
        } => {
            let raw = std::fs::read_to_string(&description)
                .with_context(|| format!("Failed to read {}", description.display()))?;
            let posting = JobPosting::new(
                &company,
                &title,
                &location,
                job_id.as_deref(),
                &raw,
                Local::now().date_naive(),
            );
            if posting.job_description().is_empty() {
                return Err(anyhow!("{} has no usable text", description.display()));
            }
            let mut sheet = connect(&config)?;
            sheet.append_row(&sheets::job_posting_to_row(&posting))?;
            println!("Added {} at {} to '{}'.", posting.job_title, posting.company_name, sheet.title());
        }

        Commands::Clean { prompt, file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let policy = if prompt {
                NormalizePolicy::Prompt
            } else {
                NormalizePolicy::Plain
            };
            println!("{}", normalize::normalize(&raw, policy));
        }

        Commands::Extract { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let record = extract::extract(extract::RawResult::from(raw))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::History { limit } => {
            let db = Database::open(config.db_path.as_deref())?;
            db.ensure_initialized()?;
            let runs = db.list_runs(limit)?;
            if runs.is_empty() {
                println!("No runs recorded.");
            } else {
                println!(
                    "{:<5} {:<20} {:<5} {:<12} {:<16} {:<20}",
                    "ID", "FINISHED", "ROW", "OUTCOME", "STAGE", "COMPANY"
                );
                println!("{}", "-".repeat(83));
                for run in runs {
                    println!(
                        "{:<5} {:<20} {:<5} {:<12} {:<16} {:<20}",
                        run.id,
                        run.finished_at,
                        run.sheet_row.map(|r| r.to_string()).unwrap_or_else(|| "-".into()),
                        run.outcome,
                        run.stage,
                        truncate(&run.company.unwrap_or_default(), 20)
                    );
                    if let Some(artifact) = run.artifact {
                        println!("      {}", artifact);
                    }
                    if let Some(message) = run.message.filter(|_| run.outcome != OUTCOME_DONE) {
                        println!("      {}", truncate(&message, 76));
                    }
                }
            }
        }

        Commands::Check => {
            let store = ResumeStore::new(&config.data_dir);
            let header = store.load_header()?;
            println!("Header OK: {} <{}>", header.name, header.email);
            let resume = store.load_master_resume()?;
            println!(
                "Résumé OK: {} positions, {} skill categories, {} projects",
                resume.content.work_experience.len(),
                resume.content.skills.len(),
                resume.content.projects.len()
            );
            if config.template.is_file() {
                println!("Template OK: {}", config.template.display());
            } else {
                return Err(anyhow!("Template not found: {}", config.template.display()));
            }
        }
    }

    Ok(())
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(template) = &cli.template {
        config.template = template.clone();
    }
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(worksheet) = &cli.worksheet {
        config.worksheet = worksheet.clone();
    }
}

fn connect(config: &Config) -> Result<Worksheet> {
    let mut client = SheetsClient::new(config.sheets_token()?)?;
    if let Some(url) = &config.sheets_api_url {
        client = client.with_api_url(url);
    }
    Ok(client.connect(config.sheet_id()?, &config.worksheet)?)
}

/// Runs the pipeline once and records it. Returns the process exit code.
fn run(config: &Config, row: Option<usize>) -> Result<i32> {
    let db = Database::open(config.db_path.as_deref())?;
    db.init()?;
    if let Some(row) = row {
        if let Some(previous) = db.last_done_for_row(row)? {
            warn!(
                "Row {} already produced {} on {}",
                row,
                previous.artifact.as_deref().unwrap_or("a résumé"),
                previous.finished_at
            );
        }
    }

    let spec = ai::resolve_model(&config.model)?;
    let writer = ResumeWriter::new(ai::create_provider(&spec)?);
    let store = ResumeStore::new(&config.data_dir);
    let interrupt = Interrupt::install()?;
    let mut sheet = connect(config)?;
    let started_at = db::now_timestamp();

    println!("Using {} to tailor against worksheet '{}'...", spec.short_name, sheet.title());
    let mut pipeline = Pipeline::new(
        &mut sheet,
        &writer,
        &DocxRenderer,
        &store,
        &config.template,
        &config.output_dir,
        &interrupt,
    );
    let result = pipeline.run(row);
    let job = pipeline.job().cloned();

    let (company, title) = match &job {
        Some((_, posting)) => (Some(posting.company_name.as_str()), Some(posting.job_title.as_str())),
        None => (None, None),
    };
    let mut entry = NewRun {
        sheet_row: job.as_ref().map(|(row, _)| *row).or(row),
        company,
        job_title: title,
        started_at: &started_at,
        ..Default::default()
    };

    let message;
    let code = match &result {
        Ok(report) => {
            entry.outcome = OUTCOME_DONE;
            entry.stage = "done";
            entry.artifact = Some(report.artifact.as_path());
            println!("Résumé written to {}", report.artifact.display());
            println!("Row {} marked {}.", report.row, sheets::STATUS_DONE);
            0
        }
        Err(e) => {
            message = e.to_string();
            entry.outcome = match e {
                PipelineError::Interrupted { .. } => OUTCOME_INTERRUPTED,
                _ => OUTCOME_FAILED,
            };
            entry.stage = e.stage().as_str();
            entry.message = Some(&message);
            if let PipelineError::Persistence { artifact, .. } = e {
                entry.artifact = Some(artifact.as_path());
            }
            match e {
                PipelineError::Interrupted { .. } => println!("{e}. Nothing was marked done."),
                PipelineError::Persistence { artifact, .. } => {
                    eprintln!("Error: {e}");
                    eprintln!("The résumé exists at {} but the sheet was not updated.", artifact.display());
                }
                _ => eprintln!("Error: {e}"),
            }
            e.exit_code()
        }
    };

    if let Err(e) = db.record_run(&entry) {
        warn!("Could not record run in ledger: {e:#}");
    } else {
        info!(outcome = entry.outcome, "Run recorded");
    }
    Ok(code)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
