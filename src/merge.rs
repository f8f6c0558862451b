use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use thiserror::Error;

use crate::models::{ContactHeader, FinalRecord, GeneratedContent, JobPosting};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$",
    )
    .expect("valid email pattern")
});

/// First field that broke the schema.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{path}: {constraint}")]
pub struct ValidationError {
    pub path: String,
    pub constraint: String,
}

impl ValidationError {
    fn new(path: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            constraint: constraint.into(),
        }
    }
}

/// Combines the contact header, the posting and a generated candidate.
///
/// The caller's header is only read; the record gets a copy whose location
/// is the posting's. Nothing is coerced: any missing or mis-shaped field
/// rejects the whole candidate. A candidate that passes is converted to
/// `GeneratedContent`, which fills absent optional fields and drops unknown
/// ones (see `FinalRecord`).
pub fn merge(
    header: &ContactHeader,
    posting: &JobPosting,
    candidate: Map<String, Value>,
) -> Result<FinalRecord, ValidationError> {
    let header = ContactHeader {
        location: posting.location.clone(),
        ..header.clone()
    };
    validate_header(&header)?;

    validate_content(&candidate)?;
    let content: GeneratedContent = serde_json::from_value(Value::Object(candidate))
        .map_err(|e| ValidationError::new("$", e.to_string()))?;

    Ok(FinalRecord::new(header, content))
}

pub fn is_valid_email(email: &str) -> bool {
    email.len() <= 254 && EMAIL.is_match(email)
}

pub fn validate_header(header: &ContactHeader) -> Result<(), ValidationError> {
    if header.name.trim().is_empty() {
        return Err(ValidationError::new("header.name", "must not be empty"));
    }
    if !is_valid_email(&header.email) {
        return Err(ValidationError::new(
            "header.email",
            format!("'{}' is not a valid email address", header.email),
        ));
    }
    for (i, link) in header.links.iter().enumerate() {
        if link.url.trim().is_empty() {
            return Err(ValidationError::new(
                format!("header.links[{i}].url"),
                "must not be empty",
            ));
        }
    }
    Ok(())
}

/// Checks a candidate mapping against the résumé content schema.
/// Unknown fields are ignored.
pub fn validate_content(candidate: &Map<String, Value>) -> Result<(), ValidationError> {
    let summary = required_object(candidate, "professional_summary", "professional_summary")?;
    required_string(summary, "summary", "professional_summary.summary")?;

    for (i, item) in required_array(candidate, "work_experience", "work_experience")?
        .iter()
        .enumerate()
    {
        let path = format!("work_experience[{i}]");
        let entry = as_object(item, &path)?;
        required_string(entry, "title", &format!("{path}.title"))?;
        required_string(entry, "company", &format!("{path}.company"))?;
        required_string(entry, "startDate", &format!("{path}.startDate"))?;
        optional_string(entry, "endDate", &format!("{path}.endDate"))?;
        string_array(
            required_array(entry, "responsibilities", &format!("{path}.responsibilities"))?,
            &format!("{path}.responsibilities"),
        )?;
    }

    for (i, item) in required_array(candidate, "education", "education")?
        .iter()
        .enumerate()
    {
        let path = format!("education[{i}]");
        let entry = as_object(item, &path)?;
        required_string(entry, "degree", &format!("{path}.degree"))?;
        required_string(entry, "institution", &format!("{path}.institution"))?;
        optional_string(entry, "startDate", &format!("{path}.startDate"))?;
        optional_string(entry, "endDate", &format!("{path}.endDate"))?;
        if let Some(coursework) = entry.get("coursework").filter(|v| !v.is_null()) {
            let coursework_path = format!("{path}.coursework");
            string_array(as_array(coursework, &coursework_path)?, &coursework_path)?;
        }
    }

    for (i, item) in required_array(candidate, "skills", "skills")?
        .iter()
        .enumerate()
    {
        let path = format!("skills[{i}]");
        let entry = as_object(item, &path)?;
        required_string(entry, "category", &format!("{path}.category"))?;
        string_array(
            required_array(entry, "items", &format!("{path}.items"))?,
            &format!("{path}.items"),
        )?;
    }

    for (i, item) in required_array(candidate, "projects", "projects")?
        .iter()
        .enumerate()
    {
        let path = format!("projects[{i}]");
        let entry = as_object(item, &path)?;
        required_string(entry, "name", &format!("{path}.name"))?;
        required_string(entry, "description", &format!("{path}.description"))?;
    }

    Ok(())
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn field<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<&'a Value, ValidationError> {
    match map.get(key) {
        None | Some(Value::Null) => Err(ValidationError::new(path, "required field is missing")),
        Some(value) => Ok(value),
    }
}

fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, ValidationError> {
    value
        .as_object()
        .ok_or_else(|| ValidationError::new(path, format!("expected object, found {}", kind(value))))
}

fn as_array<'a>(value: &'a Value, path: &str) -> Result<&'a Vec<Value>, ValidationError> {
    value
        .as_array()
        .ok_or_else(|| ValidationError::new(path, format!("expected array, found {}", kind(value))))
}

fn required_object<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<&'a Map<String, Value>, ValidationError> {
    as_object(field(map, key, path)?, path)
}

fn required_array<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<&'a Vec<Value>, ValidationError> {
    as_array(field(map, key, path)?, path)
}

fn required_string(map: &Map<String, Value>, key: &str, path: &str) -> Result<(), ValidationError> {
    match field(map, key, path)? {
        Value::String(_) => Ok(()),
        other => Err(ValidationError::new(
            path,
            format!("expected string, found {}", kind(other)),
        )),
    }
}

fn optional_string(map: &Map<String, Value>, key: &str, path: &str) -> Result<(), ValidationError> {
    match map.get(key) {
        None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
        Some(other) => Err(ValidationError::new(
            path,
            format!("expected string, found {}", kind(other)),
        )),
    }
}

fn string_array(items: &[Value], path: &str) -> Result<(), ValidationError> {
    for (i, item) in items.iter().enumerate() {
        if !item.is_string() {
            return Err(ValidationError::new(
                format!("{path}[{i}]"),
                format!("expected string, found {}", kind(item)),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Link;
    use chrono::NaiveDate;
    use serde_json::json;

    fn header() -> ContactHeader {
        ContactHeader {
            name: "Jane Doe".into(),
            phone: "555-0100".into(),
            email: "jane.doe@example.com".into(),
            links: vec![Link {
                platform: "GitHub".into(),
                url: "https://github.com/janedoe".into(),
            }],
            location: "NYC".into(),
        }
    }

    fn posting(location: &str) -> JobPosting {
        JobPosting::new(
            "Acme",
            "Platform Engineer",
            location,
            Some("R-42"),
            "Build the platform.",
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        )
    }

    fn candidate() -> Map<String, Value> {
        let value = json!({
            "professional_summary": {"summary": "Engineer who ships."},
            "work_experience": [{
                "title": "Senior Engineer",
                "company": "Initech",
                "startDate": "2021-01",
                "endDate": null,
                "responsibilities": ["Led migration to Rust", "Cut p99 latency 40%"]
            }],
            "education": [{
                "degree": "BSc Computer Science",
                "institution": "State University",
                "startDate": "2013",
                "endDate": "2017",
                "coursework": ["Compilers", "Distributed Systems"]
            }],
            "skills": [{"category": "Languages", "items": ["Rust", "Go"]}],
            "projects": [{"name": "tailor", "description": "Résumé tailoring CLI"}]
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_merge_overrides_location_and_keeps_content() {
        let original = header();
        let record = merge(&original, &posting("Remote"), candidate()).unwrap();

        assert_eq!(record.header.location, "Remote");
        assert_eq!(record.header.name, "Jane Doe");
        assert_eq!(record.header.links, original.links);

        let expected: GeneratedContent =
            serde_json::from_value(Value::Object(candidate())).unwrap();
        assert_eq!(record.content, expected);
        assert_eq!(
            serde_json::to_value(&record.content).unwrap(),
            Value::Object(candidate())
        );
    }

    #[test]
    fn test_merge_never_mutates_caller_header() {
        let original = header();
        let snapshot = original.clone();
        let _ = merge(&original, &posting("Remote"), candidate()).unwrap();
        assert_eq!(original, snapshot);
        assert_eq!(original.location, "NYC");
    }

    #[test]
    fn test_missing_required_field_is_named() {
        let mut bad = candidate();
        bad.remove("work_experience");
        let err = merge(&header(), &posting("Remote"), bad).unwrap_err();
        assert_eq!(err.path, "work_experience");
        assert_eq!(err.constraint, "required field is missing");
    }

    #[test]
    fn test_wrong_shape_is_not_coerced() {
        let mut bad = candidate();
        bad.insert("projects".into(), json!({"name": "x", "description": "y"}));
        let err = merge(&header(), &posting("Remote"), bad).unwrap_err();
        assert_eq!(err.path, "projects");
        assert_eq!(err.constraint, "expected array, found object");

        let mut bad = candidate();
        bad["work_experience"][0]["responsibilities"][1] = json!(40);
        let err = merge(&header(), &posting("Remote"), bad).unwrap_err();
        assert_eq!(err.path, "work_experience[0].responsibilities[1]");
        assert_eq!(err.constraint, "expected string, found number");

        let mut bad = candidate();
        bad["professional_summary"] = json!("just a string");
        let err = merge(&header(), &posting("Remote"), bad).unwrap_err();
        assert_eq!(err.path, "professional_summary");
    }

    #[test]
    fn test_first_failing_field_wins() {
        let mut bad = candidate();
        bad["education"][0]["degree"] = json!(1);
        bad.remove("projects");
        let err = merge(&header(), &posting("Remote"), bad).unwrap_err();
        assert_eq!(err.path, "education[0].degree");
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let mut extended = candidate();
        extended.insert("certifications".into(), json!(["CKA"]));
        extended["projects"][0]["url"] = json!("https://example.com");
        assert!(merge(&header(), &posting("Remote"), extended).is_ok());
    }

    #[test]
    fn test_optional_fields_may_be_absent() {
        let mut minimal = candidate();
        minimal["education"][0] = json!({"degree": "BSc", "institution": "State"});
        let record = merge(&header(), &posting("Remote"), minimal).unwrap();
        assert!(record.content.education[0].coursework.is_empty());
        assert_eq!(record.content.work_experience[0].end_date, None);
    }

    #[test]
    fn test_record_content_is_normalized_to_the_schema() {
        let mut sparse = candidate();
        sparse["work_experience"][0]
            .as_object_mut()
            .unwrap()
            .remove("endDate");
        sparse["education"][0] = json!({"degree": "BSc", "institution": "State"});
        sparse.insert("certifications".into(), json!(["CKA"]));

        let record = merge(&header(), &posting("Remote"), sparse).unwrap();
        let context = record.to_context();
        let content = &context["content"];
        assert_eq!(content["work_experience"][0]["endDate"], Value::Null);
        assert_eq!(content["education"][0]["coursework"], json!([]));
        assert!(content.as_object().unwrap().get("certifications").is_none());
    }

    #[test]
    fn test_invalid_header_email_rejected() {
        let mut bad = header();
        bad.email = "jane at example".into();
        let err = merge(&bad, &posting("Remote"), candidate()).unwrap_err();
        assert_eq!(err.path, "header.email");
    }

    #[test]
    fn test_email_syntax() {
        assert!(is_valid_email("jane.doe+jobs@mail.example.co.uk"));
        assert!(!is_valid_email("jane@localhost"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("jane@@example.com"));
        assert!(!is_valid_email("jane doe@example.com"));
    }

    #[test]
    fn test_empty_sections_are_valid() {
        let empty = json!({
            "professional_summary": {"summary": "x"},
            "work_experience": [],
            "education": [],
            "skills": [],
            "projects": []
        });
        let Value::Object(map) = empty else { unreachable!() };
        assert!(validate_content(&map).is_ok());
    }
}
