use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

static ESCAPED_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\[nrt]").expect("valid escaped whitespace pattern"));
static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s.,;:!?()\-']").expect("valid allow-list pattern"));
static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));
static SPACE_BEFORE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([.,;:!?])").expect("valid punctuation pattern"));

/// How aggressively `normalize` cleans text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalizePolicy {
    /// ASCII folding and whitespace cleanup only.
    #[default]
    Plain,
    /// Also replaces anything outside a conservative punctuation allow-list.
    /// Used for text that goes into a prompt.
    Prompt,
}

/// Folds free-form text into a single ASCII line.
///
/// Accented letters degrade to their base letter (NFKD first, then the
/// combining marks are dropped with everything else outside 7-bit ASCII).
/// Both literal `\n`/`\r`/`\t` escapes and real whitespace collapse to one
/// space, and whitespace in front of `.,;:!?` is removed.
///
/// `normalize(normalize(s, p), p) == normalize(s, p)` for every input.
pub fn normalize(raw: &str, policy: NormalizePolicy) -> String {
    let ascii: String = raw.nfkd().filter(char::is_ascii).collect();

    let text = ESCAPED_WHITESPACE.replace_all(&ascii, " ");
    let text = match policy {
        NormalizePolicy::Plain => text,
        NormalizePolicy::Prompt => DISALLOWED.replace_all(&text, " ").into_owned().into(),
    };
    let text = WHITESPACE_RUN.replace_all(&text, " ");
    let text = SPACE_BEFORE_PUNCT.replace_all(&text, "$1");

    text.trim().to_string()
}

/// Shorthand for the policy used on job descriptions.
pub fn clean_job_description(raw: &str) -> String {
    normalize(raw, NormalizePolicy::Prompt)
}
