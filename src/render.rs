use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::models::JobPosting;
use crate::template::{self, TemplateError};

/// Parts of a .docx that may hold placeholders.
static TEMPLATED_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^word/(document|header\d*|footer\d*|footnotes|endnotes)\.xml$")
        .expect("valid templated part regex")
});

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Template not found: {}", .0.display())]
    TemplateNotFound(PathBuf),

    #[error("Template {part} is invalid: {reason}")]
    InvalidTemplate { part: String, reason: String },

    #[error("Data does not fit the template: {0}")]
    InvalidData(String),

    #[error("Output directory {} is not writable: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write document: {0}")]
    Io(#[from] io::Error),

    #[error("Template is not a valid .docx archive: {0}")]
    Archive(#[from] zip::result::ZipError),
}

/// Fills a template with a plain nested mapping and writes the document.
pub trait Renderer {
    fn render(&self, template: &Path, context: &Value, output: &Path) -> Result<PathBuf, RenderError>;
}

/// Renders Word templates with Jinja-style placeholders.
#[derive(Debug, Default)]
pub struct DocxRenderer;

impl DocxRenderer {
    fn render_part(name: &str, xml: &str, context: &Value) -> Result<String, RenderError> {
        template::render(xml, context).map_err(|e| match e {
            TemplateError::Syntax(reason) => RenderError::InvalidTemplate {
                part: name.to_string(),
                reason,
            },
            TemplateError::Data(reason) => RenderError::InvalidData(format!("{name}: {reason}")),
        })
    }

    fn write_archive(template: &Path, context: &Value, dest: &Path) -> Result<(), RenderError> {
        let mut archive = ZipArchive::new(File::open(template)?)?;
        let mut writer = ZipWriter::new(File::create(dest)?);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for i in 0..archive.len() {
            let name = archive.by_index_raw(i)?.name().to_string();
            if !TEMPLATED_PART.is_match(&name) {
                writer.raw_copy_file(archive.by_index_raw(i)?)?;
                continue;
            }

            let mut xml = String::new();
            archive.by_index(i)?.read_to_string(&mut xml)?;
            let rendered = if template::has_tags(&xml) {
                debug!("Rendering {name}");
                Self::render_part(&name, &xml, context)?
            } else {
                xml
            };
            writer.start_file(name.as_str(), options)?;
            writer.write_all(rendered.as_bytes())?;
        }

        writer.finish()?;
        Ok(())
    }
}

impl Renderer for DocxRenderer {
    fn render(&self, template: &Path, context: &Value, output: &Path) -> Result<PathBuf, RenderError> {
        if !template.is_file() {
            return Err(RenderError::TemplateNotFound(template.to_path_buf()));
        }
        if !context.is_object() {
            return Err(RenderError::InvalidData("context must be a mapping".into()));
        }
        if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| RenderError::OutputDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        // Only a complete document ever appears at `output`.
        let partial = output.with_extension("docx.part");
        if let Err(e) = Self::write_archive(template, context, &partial) {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
        fs::rename(&partial, output)?;

        info!("Rendered {}", output.display());
        Ok(output.to_path_buf())
    }
}

/// `<candidate>_<company>_<title>[_<job id>].docx`, candidate lower-cased,
/// spaces and slashes replaced with underscores.
pub fn output_file_name(candidate: &str, posting: &JobPosting) -> String {
    let mut parts = vec![
        candidate.to_lowercase(),
        posting.company_name.clone(),
        posting.job_title.clone(),
    ];
    if let Some(job_id) = &posting.job_id {
        parts.push(job_id.clone());
    }
    let stem = parts
        .iter()
        .map(|p| p.trim().replace([' ', '/', '\\'], "_"))
        .collect::<Vec<_>>()
        .join("_");
    format!("{stem}.docx")
}
