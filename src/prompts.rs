/// System prompt shared by every stage.
pub const SYSTEM: &str = "You are part of a résumé tailoring pipeline. \
Respond with a single JSON object and nothing else: no markdown fences, no commentary. \
Never invent employers, titles, dates, degrees or achievements that are not in the material you are given.";

pub const JOB_ANALYSIS_TEMPLATE: &str = r#"Analyze the job description below.

Return a JSON object with exactly these keys:
{
  "job_details": {"company_name": string, "job_title": string, "location": string, "job_id": string or null},
  "skills": {
    "technical": [string], "soft": [string], "management": [string],
    "bonus": [string], "tools_and_technologies": [string]
  },
  "responsibilities_and_qualifications": [string],
  "key_phrases": [string],
  "company_culture_keywords": [string]
}

"bonus" holds skills described as a plus or nice-to-have.
"responsibilities_and_qualifications" is verbatim from the posting.

Job description:
{job_description}"#;

pub const RESUME_DRAFT_TEMPLATE: &str = r#"Tailor the candidate's résumé content to the analyzed job.

Rules:
- Use only facts present in the master résumé. Reword, reorder and select; do not fabricate.
- Mirror the job's key phrases where they truthfully apply.
- Keep every employer, title and date exactly as written in the master résumé.
- Order skills categories and items by relevance to the job.

Return a JSON object with exactly these keys:
{
  "professional_summary": {"summary": string},
  "work_experience": [{"title": string, "company": string, "startDate": string, "endDate": string or null, "responsibilities": [string]}],
  "education": [{"degree": string, "institution": string, "startDate": string or null, "endDate": string or null, "coursework": [string]}],
  "skills": [{"category": string, "items": [string]}],
  "projects": [{"name": string, "description": string}]
}

Job analysis:
{job_analysis}

Master résumé content:
{master_resume}"#;

pub const RESUME_REVIEW_TEMPLATE: &str = r#"Review the tailored résumé draft against the job analysis and the master résumé.

Check that:
- every statement is supported by the master résumé,
- employers, titles and dates match the master résumé exactly,
- the draft follows the required schema.

Return a JSON object:
{
  "approved": boolean,
  "issues": [string],
  "revised": the corrected résumé content with the same schema as the draft, or null when the draft is approved unchanged
}

Job analysis:
{job_analysis}

Master résumé content:
{master_resume}

Draft:
{draft}"#;

/// Fills `{name}` placeholders in one pass over the template. Substituted
/// text is never scanned again, so values may contain braces of their own.
/// Braces that do not name a known placeholder are kept as written.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
