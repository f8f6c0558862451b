//! Job-tracking spreadsheet access.
//!
//! Rows and columns are 1-based everywhere. A job row is laid out as
//! company, title, location, job id, description, date applied. The status
//! column can sit anywhere; it is found by its `Resume Generated` header in
//! row 1.

use chrono::{Local, NaiveDate};
use reqwest::blocking::Client;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::JobPosting;

pub const COL_COMPANY: usize = 1;
pub const COL_TITLE: usize = 2;
pub const COL_LOCATION: usize = 3;
pub const COL_JOB_ID: usize = 4;
pub const COL_DESCRIPTION: usize = 5;
pub const COL_DATE_APPLIED: usize = 6;

/// Header naming the column that records a generated résumé.
pub const STATUS_HEADER: &str = "Resume Generated";

/// Cells a row needs before it counts as a job.
pub const MIN_JOB_CELLS: usize = 5;

pub const STATUS_DONE: &str = "Done";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const DEFAULT_API_URL: &str = "https://sheets.googleapis.com";

#[derive(Error, Debug)]
pub enum SheetError {
    #[error("Spreadsheet request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Spreadsheet API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Worksheet '{0}' not found in spreadsheet")]
    WorksheetNotFound(String),

    #[error("Row {0} is empty or does not exist")]
    MissingRow(usize),

    #[error("Sheet has no rows")]
    Empty,

    #[error("Row {row} is not a job row: {reason}")]
    InvalidRow { row: usize, reason: String },

    #[error("Column '{0}' not found in header row")]
    MissingColumn(String),
}

/// Row-oriented view of the job sheet.
pub trait Spreadsheet {
    /// Last non-empty row and its cells.
    fn get_last_row(&self) -> Result<(usize, Vec<String>), SheetError>;
    fn get_row(&self, row: usize) -> Result<Vec<String>, SheetError>;
    fn get_all_rows(&self) -> Result<Vec<Vec<String>>, SheetError>;
    fn update_cell(&mut self, row: usize, col: usize, value: &str) -> Result<(), SheetError>;
    fn append_row(&mut self, values: &[String]) -> Result<(), SheetError>;
}

/// Builds a posting from a row's cells. Cells past the description are optional;
/// an unreadable or blank date falls back to today.
pub fn job_posting_from_row(row: usize, cells: &[String]) -> Result<JobPosting, SheetError> {
    if cells.len() < MIN_JOB_CELLS {
        return Err(SheetError::InvalidRow {
            row,
            reason: format!(
                "expected at least {MIN_JOB_CELLS} cells, found {}",
                cells.len()
            ),
        });
    }

    let cell = |col: usize| cells.get(col - 1).map(|c| c.trim()).unwrap_or("");
    for (col, name) in [
        (COL_COMPANY, "company name"),
        (COL_TITLE, "job title"),
        (COL_LOCATION, "location"),
        (COL_DESCRIPTION, "job description"),
    ] {
        if cell(col).is_empty() {
            return Err(SheetError::InvalidRow {
                row,
                reason: format!("{name} (column {col}) is empty"),
            });
        }
    }

    let date_applied = NaiveDate::parse_from_str(cell(COL_DATE_APPLIED), DATE_FORMAT)
        .unwrap_or_else(|_| Local::now().date_naive());

    Ok(JobPosting::new(
        cell(COL_COMPANY),
        cell(COL_TITLE),
        cell(COL_LOCATION),
        Some(cell(COL_JOB_ID)),
        cell(COL_DESCRIPTION),
        date_applied,
    ))
}

/// Cells for a new sheet row. Date and status are left for the pipeline.
pub fn job_posting_to_row(posting: &JobPosting) -> Vec<String> {
    vec![
        posting.company_name.clone(),
        posting.job_title.clone(),
        posting.location.clone(),
        posting.job_id.clone().unwrap_or_default(),
        posting.job_description().to_string(),
    ]
}

/// 1-based column whose header cell reads `Resume Generated`.
pub fn status_column(header: &[String]) -> Result<usize, SheetError> {
    header
        .iter()
        .position(|name| name.trim() == STATUS_HEADER)
        .map(|i| i + 1)
        .ok_or_else(|| SheetError::MissingColumn(STATUS_HEADER.to_string()))
}

/// Rows (1-based, header excluded) whose status column is blank.
pub fn pending_rows(rows: &[Vec<String>]) -> Result<Vec<(usize, Vec<String>)>, SheetError> {
    let header = rows.first().ok_or(SheetError::Empty)?;
    let status_col = status_column(header)?;
    Ok(rows
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, cells)| cells.iter().any(|c| !c.trim().is_empty()))
        .filter(|(_, cells)| {
            cells
                .get(status_col - 1)
                .is_none_or(|status| status.trim().is_empty())
        })
        .map(|(i, cells)| (i + 1, cells.clone()))
        .collect())
}

/// A1 column letters for a 1-based column number.
pub fn column_letter(col: usize) -> String {
    let mut n = col;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

/// Google Sheets v4 client. Nothing talks to the API until `connect`.
pub struct SheetsClient {
    client: Client,
    api_url: String,
    token: String,
}

impl SheetsClient {
    /// `token` is an OAuth access token with the spreadsheets scope.
    pub fn new(token: impl Into<String>) -> Result<Self, SheetError> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()?,
            api_url: DEFAULT_API_URL.to_string(),
            token: token.into(),
        })
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Opens one worksheet, checking that it exists.
    pub fn connect(self, spreadsheet_id: &str, worksheet: &str) -> Result<Worksheet, SheetError> {
        let url = endpoint(&self.api_url, spreadsheet_id, &[])?;
        info!("Connecting to spreadsheet {spreadsheet_id}");
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(&[("fields", "sheets.properties.title")])
            .send()?;
        let meta: SpreadsheetMeta = check(response)?.json()?;

        if !meta.sheets.iter().any(|s| s.properties.title == worksheet) {
            return Err(SheetError::WorksheetNotFound(worksheet.to_string()));
        }
        info!("Connected to worksheet '{worksheet}'");

        Ok(Worksheet {
            client: self.client,
            api_url: self.api_url,
            token: self.token,
            spreadsheet_id: spreadsheet_id.to_string(),
            title: worksheet.to_string(),
        })
    }
}

/// Connected handle to one worksheet.
pub struct Worksheet {
    client: Client,
    api_url: String,
    token: String,
    spreadsheet_id: String,
    title: String,
}

impl Worksheet {
    pub fn title(&self) -> &str {
        &self.title
    }

    fn range(&self, a1: Option<&str>) -> String {
        let quoted = format!("'{}'", self.title.replace('\'', "''"));
        match a1 {
            Some(a1) => format!("{quoted}!{a1}"),
            None => quoted,
        }
    }

    fn values_url(&self, range: &str, suffix: &str) -> Result<Url, SheetError> {
        endpoint(
            &self.api_url,
            &self.spreadsheet_id,
            &["values", &format!("{range}{suffix}")],
        )
    }

    fn read(&self, range: &str) -> Result<Vec<Vec<String>>, SheetError> {
        let url = self.values_url(range, "")?;
        debug!("GET {url}");
        let response = self.client.get(url).bearer_auth(&self.token).send()?;
        let body: ValueRange = check(response)?.json()?;
        Ok(body.values)
    }
}

impl Spreadsheet for Worksheet {
    fn get_last_row(&self) -> Result<(usize, Vec<String>), SheetError> {
        let rows = self.get_all_rows()?;
        rows.iter()
            .enumerate()
            .rev()
            .find(|(_, cells)| cells.iter().any(|c| !c.trim().is_empty()))
            .map(|(i, cells)| (i + 1, cells.clone()))
            .ok_or(SheetError::Empty)
    }

    fn get_row(&self, row: usize) -> Result<Vec<String>, SheetError> {
        let cells = self
            .read(&self.range(Some(&format!("{row}:{row}"))))?
            .into_iter()
            .next()
            .unwrap_or_default();
        if cells.iter().all(|c| c.trim().is_empty()) {
            return Err(SheetError::MissingRow(row));
        }
        Ok(cells)
    }

    fn get_all_rows(&self) -> Result<Vec<Vec<String>>, SheetError> {
        self.read(&self.range(None))
    }

    fn update_cell(&mut self, row: usize, col: usize, value: &str) -> Result<(), SheetError> {
        let range = self.range(Some(&format!("{}{row}", column_letter(col))));
        let url = self.values_url(&range, "")?;
        debug!("PUT {url}");
        let response = self
            .client
            .put(url)
            .bearer_auth(&self.token)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .json(&json!({ "range": range, "majorDimension": "ROWS", "values": [[value]] }))
            .send()?;
        check(response)?;
        Ok(())
    }

    fn append_row(&mut self, values: &[String]) -> Result<(), SheetError> {
        let range = self.range(None);
        let url = self.values_url(&range, ":append")?;
        debug!("POST {url}");
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "majorDimension": "ROWS", "values": [values] }))
            .send()?;
        check(response)?;
        Ok(())
    }
}

fn endpoint(api_url: &str, spreadsheet_id: &str, rest: &[&str]) -> Result<Url, SheetError> {
    let mut url = Url::parse(api_url).map_err(|e| SheetError::Api {
        status: 0,
        message: format!("invalid API URL '{api_url}': {e}"),
    })?;
    url.path_segments_mut()
        .map_err(|_| SheetError::Api {
            status: 0,
            message: format!("API URL '{api_url}' cannot be a base"),
        })?
        .pop_if_empty()
        .extend(["v4", "spreadsheets", spreadsheet_id])
        .extend(rest);
    Ok(url)
}

fn check(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, SheetError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().unwrap_or_default();
    Err(SheetError::Api {
        status: status.as_u16(),
        message,
    })
}
