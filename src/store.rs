use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::merge::{validate_content, validate_header};
use crate::models::{ContactHeader, MasterResume};

pub const HEADER_FILE: &str = "header.json";
pub const RESUME_FILE: &str = "resume.json";

/// Read-only access to `header.json` and `resume.json` in the data directory.
#[derive(Debug, Clone)]
pub struct ResumeStore {
    dir: PathBuf,
}

impl ResumeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn header_path(&self) -> PathBuf {
        self.dir.join(HEADER_FILE)
    }

    pub fn resume_path(&self) -> PathBuf {
        self.dir.join(RESUME_FILE)
    }

    pub fn load_header(&self) -> Result<ContactHeader> {
        let path = self.header_path();
        let header: ContactHeader = serde_json::from_value(read_json(&path)?)
            .with_context(|| format!("{} does not match the contact header schema", path.display()))?;
        validate_header(&header).map_err(|e| anyhow!("{}: {}", path.display(), e))?;
        Ok(header)
    }

    pub fn load_master_resume(&self) -> Result<MasterResume> {
        let path = self.resume_path();
        let value = read_json(&path)?;

        let content = value
            .get("content")
            .and_then(Value::as_object)
            .ok_or_else(|| anyhow!("{}: missing 'content' object", path.display()))?;
        validate_content(content).map_err(|e| anyhow!("{}: content.{}", path.display(), e))?;

        serde_json::from_value(value)
            .with_context(|| format!("{} does not match the resume schema", path.display()))
    }
}

fn read_json(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Err(anyhow!("{} not found", path.display()));
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}
