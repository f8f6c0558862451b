use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::normalize::clean_job_description;

/// One job row, as read from the sheet or typed in on the command line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPosting {
    pub company_name: String,
    pub job_title: String,
    pub location: String,
    pub job_id: Option<String>,
    job_description: String,
    pub date_applied: NaiveDate,
}

impl JobPosting {
    /// The description is normalized here; the raw text is never kept.
    pub fn new(
        company_name: &str,
        job_title: &str,
        location: &str,
        job_id: Option<&str>,
        raw_description: &str,
        date_applied: NaiveDate,
    ) -> Self {
        Self {
            company_name: company_name.trim().to_string(),
            job_title: job_title.trim().to_string(),
            location: location.trim().to_string(),
            job_id: job_id
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            job_description: clean_job_description(raw_description),
            date_applied,
        }
    }

    pub fn job_description(&self) -> &str {
        &self.job_description
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub platform: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactHeader {
    pub name: String,
    pub phone: String,
    pub email: String,
    #[serde(default)]
    pub links: Vec<Link>,
    pub location: String,
}

/// Categorized skills pulled out of a job posting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillSet {
    #[serde(default)]
    pub technical: Vec<String>,
    #[serde(default)]
    pub soft: Vec<String>,
    #[serde(default)]
    pub management: Vec<String>,
    #[serde(default)]
    pub bonus: Vec<String>,
    #[serde(default)]
    pub tools_and_technologies: Vec<String>,
}

impl SkillSet {
    /// Drops repeats (case-insensitive), keeping the first spelling and the source order.
    pub fn dedup(&mut self) {
        for list in [
            &mut self.technical,
            &mut self.soft,
            &mut self.management,
            &mut self.bonus,
            &mut self.tools_and_technologies,
        ] {
            let mut seen = std::collections::HashSet::new();
            list.retain(|skill| seen.insert(skill.trim().to_lowercase()));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.technical.is_empty()
            && self.soft.is_empty()
            && self.management.is_empty()
            && self.bonus.is_empty()
            && self.tools_and_technologies.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfessionalSummary {
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkExperience {
    pub title: String,
    pub company: String,
    #[serde(rename = "startDate")]
    pub start_date: String,
    #[serde(rename = "endDate", default)]
    pub end_date: Option<String>,
    pub responsibilities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Education {
    pub degree: String,
    pub institution: String,
    #[serde(rename = "startDate", default)]
    pub start_date: Option<String>,
    #[serde(rename = "endDate", default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub coursework: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillCategory {
    pub category: String,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub description: String,
}

/// Résumé body. Untrusted when it comes from the generation service;
/// only `merge::merge` turns a candidate mapping into one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub professional_summary: ProfessionalSummary,
    pub work_experience: Vec<WorkExperience>,
    pub education: Vec<Education>,
    pub skills: Vec<SkillCategory>,
    pub projects: Vec<Project>,
}

/// The candidate's full résumé, the source material for every tailoring run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterResume {
    #[serde(default)]
    pub header: Option<ContactHeader>,
    pub content: GeneratedContent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDetails {
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub job_title: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub job_id: Option<String>,
}

/// Output of the job analysis stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobAnalysis {
    #[serde(default)]
    pub job_details: JobDetails,
    #[serde(default)]
    pub skills: SkillSet,
    #[serde(default)]
    pub responsibilities_and_qualifications: Vec<String>,
    #[serde(default)]
    pub key_phrases: Vec<String>,
    #[serde(default)]
    pub company_culture_keywords: Vec<String>,
}

/// Output of the review stage. `revised` is left as a raw mapping: it goes
/// through the extractor and validator like any other candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewReport {
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub revised: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Header plus validated content. Only `merge::merge` builds one.
///
/// `content` is the typed form of the candidate, not the candidate itself.
/// Optional fields the candidate left out come back filled in (`endDate`,
/// `startDate` as `null`, `coursework` as `[]`) and fields outside the
/// schema are dropped, so templates always see the same keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalRecord {
    pub header: ContactHeader,
    pub content: GeneratedContent,
}

impl FinalRecord {
    pub(crate) fn new(header: ContactHeader, content: GeneratedContent) -> Self {
        Self { header, content }
    }

    /// Plain nested mapping handed to the renderer.
    pub fn to_context(&self) -> serde_json::Value {
        serde_json::json!({
            "header": self.header,
            "content": self.content,
        })
    }
}

/// One row of the local run ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: i64,
    pub sheet_row: Option<i64>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub outcome: String,
    pub stage: String,
    pub message: Option<String>,
    pub artifact: Option<String>,
    pub started_at: String,
    pub finished_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_posting_normalizes_description() {
        let posting = JobPosting::new(
            " Acme ",
            "Engineer",
            "Remote",
            Some("  "),
            "Build • things\\nfast !",
            NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
        );
        assert_eq!(posting.company_name, "Acme");
        assert_eq!(posting.job_id, None);
        assert_eq!(posting.job_description(), "Build things fast!");
    }

    #[test]
    fn test_skill_set_dedup_keeps_first_occurrence_order() {
        let mut skills = SkillSet {
            technical: vec!["Rust".into(), "SQL".into(), "rust".into(), "Go".into()],
            soft: vec!["Communication".into(), "communication ".into()],
            ..Default::default()
        };
        skills.dedup();
        assert_eq!(skills.technical, vec!["Rust", "SQL", "Go"]);
        assert_eq!(skills.soft, vec!["Communication"]);
        assert!(!skills.is_empty());
        assert!(SkillSet::default().is_empty());
    }

    #[test]
    fn test_job_analysis_tolerates_missing_sections() {
        let analysis: JobAnalysis =
            serde_json::from_str(r#"{"skills": {"technical": ["Rust"]}}"#).unwrap();
        assert_eq!(analysis.skills.technical, vec!["Rust"]);
        assert!(analysis.key_phrases.is_empty());
    }

    #[test]
    fn test_work_experience_uses_camel_case_dates() {
        let exp: WorkExperience = serde_json::from_str(
            r#"{"title":"Dev","company":"Acme","startDate":"2020","endDate":null,"responsibilities":[]}"#,
        )
        .unwrap();
        assert_eq!(exp.start_date, "2020");
        assert_eq!(exp.end_date, None);
        let value = serde_json::to_value(&exp).unwrap();
        assert_eq!(value["startDate"], "2020");
    }
}
