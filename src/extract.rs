//! Pulls one JSON mapping out of whatever the generation service handed back.
//!
//! Models are unreliable about emitting bare JSON: they wrap it in code fences
//! or surround it with commentary. Text results get a direct parse first and
//! then a greedy outermost-span parse. The span heuristic can grab too much
//! when the commentary itself contains brackets; that case fails loudly
//! instead of guessing.

use serde_json::{Map, Value};
use thiserror::Error;

const PAYLOAD_PREVIEW_CHARS: usize = 200;

/// Output of one generation task, before anything has looked inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub task: String,
    pub raw: Value,
}

/// Everything the generation service can hand back.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResult {
    /// A task output that carries its payload one level down.
    Wrapped(StageOutput),
    Mapping(Map<String, Value>),
    Text(String),
    Unsupported { shape: String },
}

impl RawResult {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => RawResult::Mapping(map),
            Value::String(text) => RawResult::Text(text),
            other => RawResult::Unsupported {
                shape: json_shape(&other).to_string(),
            },
        }
    }
}

impl From<String> for RawResult {
    fn from(text: String) -> Self {
        RawResult::Text(text)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason}{}", payload_suffix(.payload))]
pub struct ExtractionFailure {
    pub reason: String,
    /// First 200 characters of the offending text.
    pub payload: String,
}

fn payload_suffix(payload: &str) -> String {
    if payload.is_empty() {
        String::new()
    } else {
        format!(": {payload}...")
    }
}

impl ExtractionFailure {
    fn new(reason: impl Into<String>, payload: &str) -> Self {
        Self {
            reason: reason.into(),
            payload: preview(payload),
        }
    }
}

/// Resolves a generation result to a field-name → value mapping.
pub fn extract(raw: RawResult) -> Result<Map<String, Value>, ExtractionFailure> {
    let raw = match raw {
        RawResult::Wrapped(output) => RawResult::from_value(output.raw),
        other => other,
    };

    match raw {
        RawResult::Mapping(map) => Ok(map),
        RawResult::Text(text) => extract_from_text(&text),
        RawResult::Unsupported { shape } => Err(ExtractionFailure::new(
            format!("unsupported result type: {shape}"),
            "",
        )),
        RawResult::Wrapped(output) => Err(ExtractionFailure::new(
            "unsupported result type: nested task output",
            &output.task,
        )),
    }
}

fn extract_from_text(text: &str) -> Result<Map<String, Value>, ExtractionFailure> {
    let text = text.trim();

    let mut non_mapping = None;

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => return Ok(map),
        Ok(other) => non_mapping = Some(json_shape(&other)),
        Err(_) => {}
    }

    if let Some(span) = outermost_span(text) {
        match serde_json::from_str::<Value>(span) {
            Ok(Value::Object(map)) => return Ok(map),
            Ok(other) => non_mapping = Some(json_shape(&other)),
            Err(_) => {}
        }
    }

    let reason = match non_mapping {
        Some(shape) => format!("parsed structured data is {shape}, not a mapping"),
        None => "could not parse result as structured data".to_string(),
    };
    Err(ExtractionFailure::new(reason, text))
}

/// First `{` to the last `}` (or first `[` to the last `]`), whichever
/// opener comes first and has a closer after it.
fn outermost_span(text: &str) -> Option<&str> {
    let last_brace = text.rfind('}');
    let last_bracket = text.rfind(']');
    for (start, opener) in text.char_indices() {
        let end = match opener {
            '{' => last_brace,
            '[' => last_bracket,
            _ => continue,
        };
        if let Some(end) = end.filter(|&end| end > start) {
            return Some(&text[start..=end]);
        }
    }
    None
}

fn json_shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PAYLOAD_PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand::seq::SliceRandom;
    use serde_json::json;

    const STRING_CHARS: &[char] = &[
        'a', 'b', 'z', 'Q', '0', '7', ' ', '{', '}', '[', ']', '"', '\\', ':', ',', '\n', 'é', '✓',
    ];

    fn random_string(rng: &mut impl Rng) -> String {
        let len = rng.gen_range(0..12);
        (0..len).map(|_| *STRING_CHARS.choose(rng).unwrap()).collect()
    }

    fn random_value(rng: &mut impl Rng, depth: usize) -> Value {
        let kinds = if depth == 0 { 5 } else { 7 };
        match rng.gen_range(0..kinds) {
            0 => Value::Null,
            1 => Value::Bool(rng.r#gen()),
            2 => json!(rng.gen_range(-1_000_000i64..1_000_000)),
            // Quarter steps are exact in binary, so they survive a text round trip.
            3 => json!(rng.gen_range(-4000i64..4000) as f64 * 0.25),
            4 => Value::String(random_string(rng)),
            5 => Value::Array((0..rng.gen_range(0..4)).map(|_| random_value(rng, depth - 1)).collect()),
            _ => Value::Object(random_map(rng, depth - 1)),
        }
    }

    fn random_map(rng: &mut impl Rng, depth: usize) -> Map<String, Value> {
        (0..rng.gen_range(0..5))
            .map(|_| (random_string(rng), random_value(rng, depth)))
            .collect()
    }

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_serialized_mapping_round_trips() {
        let samples = [
            json!({}),
            json!({"a": 1}),
            json!({"nested": {"list": [1, "two", null, true]}, "unicode": "naïve – ✓"}),
            json!({"text": "braces } inside { strings ]", "n": -1.5e3}),
        ];
        for sample in samples {
            let expected = map(sample);
            let text = serde_json::to_string(&expected).unwrap();
            assert_eq!(extract(RawResult::Text(text)), Ok(expected.clone()));
            let pretty = serde_json::to_string_pretty(&expected).unwrap();
            assert_eq!(extract(RawResult::Text(pretty)), Ok(expected));
        }
    }

    #[test]
    fn test_random_mappings_survive_common_wrappings() {
        let mut rng = rand::thread_rng();
        for _ in 0..300 {
            let expected = random_map(&mut rng, 3);
            let compact = serde_json::to_string(&expected).unwrap();
            let pretty = serde_json::to_string_pretty(&expected).unwrap();
            let wrappings = [
                compact.clone(),
                pretty.clone(),
                format!("```json\n{pretty}\n```"),
                format!("Here is the tailored resume:\n\n{compact}\n\nLet me know if you need changes."),
                format!("Sure! ```json\n{compact}\n``` Done."),
            ];
            for text in wrappings {
                assert_eq!(extract(RawResult::Text(text.clone())), Ok(expected.clone()), "input: {text}");
            }
            assert_eq!(extract(RawResult::Mapping(expected.clone())), Ok(expected.clone()));
            let wrapped = RawResult::Wrapped(StageOutput {
                task: "resume_review".into(),
                raw: Value::String(compact),
            });
            assert_eq!(extract(wrapped), Ok(expected));
        }
    }

    #[test]
    fn test_outermost_span_scans_long_bracket_heavy_text() {
        let noise = "[".repeat(50_000);
        let text = format!("{noise}{{\"a\": 1}}");
        assert_eq!(outermost_span(&text), Some(&text[50_000..]));
        assert_eq!(extract(RawResult::Text(text)), Ok(map(json!({"a": 1}))));
    }

    #[test]
    fn test_recovers_object_embedded_in_prose() {
        let result = extract(RawResult::Text(r#"Here is the result: {"a": 1} Thanks!"#.into()));
        assert_eq!(result, Ok(map(json!({"a": 1}))));
    }

    #[test]
    fn test_recovers_fenced_json() {
        let raw = " Sure! ```json\n{\"professional_summary\":{\"summary\":\"x\"}, \"work_experience\":[]}\n``` ";
        let result = extract(RawResult::Text(raw.into())).unwrap();
        assert_eq!(result["professional_summary"]["summary"], "x");
        assert_eq!(result["work_experience"], json!([]));
    }

    #[test]
    fn test_mapping_passes_through() {
        let expected = map(json!({"k": [1, 2]}));
        assert_eq!(extract(RawResult::Mapping(expected.clone())), Ok(expected));
    }

    #[test]
    fn test_wrapped_output_is_unwrapped_once() {
        let text = RawResult::Wrapped(StageOutput {
            task: "resume_review".into(),
            raw: json!("noise {\"a\": true} noise"),
        });
        assert_eq!(extract(text), Ok(map(json!({"a": true}))));

        let mapping = RawResult::Wrapped(StageOutput {
            task: "resume_review".into(),
            raw: json!({"b": 2}),
        });
        assert_eq!(extract(mapping), Ok(map(json!({"b": 2}))));
    }

    #[test]
    fn test_unsupported_shape_fails_immediately() {
        let err = extract(RawResult::from_value(json!(42))).unwrap_err();
        assert!(err.reason.contains("unsupported result type"));
        assert!(err.reason.contains("a number"));

        let wrapped = RawResult::Wrapped(StageOutput {
            task: "resume_review".into(),
            raw: json!(null),
        });
        assert!(extract(wrapped).unwrap_err().reason.contains("null"));
    }

    #[test]
    fn test_unparseable_text_reports_truncated_payload() {
        let raw = format!("no json here {}", "x".repeat(500));
        let err = extract(RawResult::Text(raw.clone())).unwrap_err();
        assert_eq!(err.reason, "could not parse result as structured data");
        assert_eq!(err.payload.chars().count(), 200);
        assert!(raw.starts_with(&err.payload));
    }

    #[test]
    fn test_failure_display() {
        let err = extract(RawResult::Text("nope".into())).unwrap_err();
        assert_eq!(err.to_string(), "could not parse result as structured data: nope...");
        let err = extract(RawResult::from_value(json!(true))).unwrap_err();
        assert_eq!(err.to_string(), "unsupported result type: a boolean");

        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert!(boxed.source().is_none());
        assert_eq!(boxed.to_string(), "unsupported result type: a boolean");
    }

    #[test]
    fn test_truncation_counts_characters_not_bytes() {
        let raw = "é".repeat(300);
        let err = extract(RawResult::Text(raw)).unwrap_err();
        assert_eq!(err.payload.chars().count(), 200);
    }

    #[test]
    fn test_brace_balanced_commentary_is_a_known_failure() {
        let raw = r#"{see notes} then {"a": 1}"#;
        let err = extract(RawResult::Text(raw.into())).unwrap_err();
        assert_eq!(err.reason, "could not parse result as structured data");
    }

    #[test]
    fn test_array_is_not_a_mapping() {
        let err = extract(RawResult::Text("[1, 2, 3]".into())).unwrap_err();
        assert_eq!(err.reason, "parsed structured data is an array, not a mapping");
    }

    #[test]
    fn test_outermost_span_prefers_first_opener() {
        assert_eq!(outermost_span("x [1] {\"a\": [2]} y"), Some("[1] {\"a\": [2]"));
        assert_eq!(outermost_span("a } b {"), None);
        assert_eq!(outermost_span("} {\"a\":1}"), Some("{\"a\":1}"));
    }
}
