use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

pub const DEFAULT_WORKSHEET: &str = "Sheet1";
pub const DEFAULT_MODEL: &str = "deepseek";
pub const TEMPLATE_FILE: &str = "resume_word_template.docx";

/// Settings from the environment (and `.env`). Command-line flags override
/// individual fields after loading.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub template: PathBuf,
    pub output_dir: PathBuf,
    pub sheet_id: Option<String>,
    pub worksheet: String,
    pub sheets_token: Option<String>,
    pub sheets_api_url: Option<String>,
    pub model: String,
    pub db_path: Option<PathBuf>,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // .env is optional
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let data_dir = match get("TAILOR_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };
        let template = get("TAILOR_TEMPLATE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join(TEMPLATE_FILE));
        let output_dir = get("TAILOR_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("resumes"));

        Ok(Config {
            template,
            output_dir,
            sheet_id: get("GOOGLE_SHEETS_ID"),
            worksheet: get("GOOGLE_SHEETS_WORKSHEET").unwrap_or_else(|| DEFAULT_WORKSHEET.to_string()),
            sheets_token: get("GOOGLE_SHEETS_TOKEN"),
            sheets_api_url: get("GOOGLE_SHEETS_API_URL"),
            model: get("TAILOR_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            db_path: get("TAILOR_DB").map(PathBuf::from),
            rust_log: get("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            data_dir,
        })
    }

    pub fn sheet_id(&self) -> Result<&str> {
        require(&self.sheet_id, "GOOGLE_SHEETS_ID")
    }

    pub fn sheets_token(&self) -> Result<&str> {
        require(&self.sheets_token, "GOOGLE_SHEETS_TOKEN")
    }
}

fn require<'a>(value: &'a Option<String>, key: &str) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| anyhow!("Required environment variable '{key}' is not set"))
}

fn default_data_dir() -> Result<PathBuf> {
    directories::ProjectDirs::from("", "", "tailor")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .context("Could not determine a data directory; set TAILOR_DATA_DIR")
}
