//! Jinja-style placeholders inside WordprocessingML parts.
//!
//! Supported: `{{ a.b }}` with `join("sep")`, `upper` and `lower` filters,
//! `{% for x in a.b %}`, `{% if [not] a.b %}` with `{% else %}`, and the
//! `{%p ... %}` / `{%tr ... %}` forms that replace their whole enclosing
//! paragraph or table row. Word splits typed text across runs, so tag text
//! is first collapsed back into a single run.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("template syntax: {0}")]
    Syntax(String),

    #[error("template data: {0}")]
    Data(String),
}

type Result<T> = std::result::Result<T, TemplateError>;

/// Renders one XML part against a context object.
pub fn render(xml: &str, context: &Value) -> Result<String> {
    let root = context
        .as_object()
        .ok_or_else(|| TemplateError::Data("context must be a mapping".into()))?;
    let source = expand_block_tags(&clean_xml(xml))?;
    let tokens = tokenize(&source)?;
    let mut iter = tokens.into_iter();
    let (nodes, end) = parse(&mut iter)?;
    if let Some(stmt) = end {
        return Err(TemplateError::Syntax(format!("unexpected '{{% {stmt} %}}'")));
    }

    let mut out = String::with_capacity(source.len());
    let mut scope = Scope {
        root,
        locals: Vec::new(),
    };
    render_nodes(&nodes, &mut scope, &mut out)?;
    Ok(out)
}

/// True when the part contains anything that looks like a template tag.
pub fn has_tags(xml: &str) -> bool {
    let cleaned = clean_xml(xml);
    cleaned.contains("{{") || cleaned.contains("{%")
}

// Tag cleanup

/// Drops the run markup Word inserts inside `{{ }}` and `{% %}` tags.
fn clean_xml(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut rest = xml;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let (skipped, next) = skip_markup(after);
        let close = match next {
            Some('{') => '}',
            Some('%') => '%',
            _ => {
                out.push('{');
                rest = after;
                continue;
            }
        };
        let body = &after[skipped + 1..];
        match find_close(body, close) {
            Some((inner, consumed)) => {
                out.push('{');
                out.push(if close == '}' { '{' } else { '%' });
                out.push_str(&unescape(&inner));
                out.push(close);
                out.push('}');
                rest = &body[consumed..];
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

/// Length of leading `<...>` markup and the first text char after it.
fn skip_markup(s: &str) -> (usize, Option<char>) {
    let mut i = 0;
    loop {
        let rest = &s[i..];
        if rest.starts_with('<') {
            match rest.find('>') {
                Some(end) => i += end + 1,
                None => return (i, None),
            }
        } else {
            return (i, rest.chars().next());
        }
    }
}

/// Text of a tag body up to `close` + `}`, and the bytes consumed.
fn find_close(s: &str, close: char) -> Option<(String, usize)> {
    let mut inner = String::new();
    let mut i = 0;
    while i < s.len() {
        let rest = &s[i..];
        if rest.starts_with('<') {
            i += rest.find('>')? + 1;
            continue;
        }
        let c = rest.chars().next()?;
        i += c.len_utf8();
        if c == close {
            let (skipped, next) = skip_markup(&s[i..]);
            if next == Some('}') {
                return Some((inner, i + skipped + 1));
            }
        }
        inner.push(c);
    }
    None
}

fn unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
}

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Replaces the paragraph or row around `{%p ... %}` / `{%tr ... %}` with a plain tag.
fn expand_block_tags(xml: &str) -> Result<String> {
    let mut xml = xml.to_string();
    for (marker, element) in [("{%p ", "w:p"), ("{%tr ", "w:tr")] {
        let opens = [format!("<{element}>"), format!("<{element} ")];
        let close = format!("</{element}>");

        while let Some(pos) = xml.find(marker) {
            let tag_end = xml[pos..]
                .find("%}")
                .map(|e| pos + e + 2)
                .ok_or_else(|| TemplateError::Syntax(format!("unclosed '{}' tag", marker.trim())))?;
            let statement = xml[pos + marker.len()..tag_end - 2].trim().to_string();

            let start = opens
                .iter()
                .filter_map(|open| xml[..pos].rfind(open.as_str()))
                .max()
                .ok_or_else(|| {
                    TemplateError::Syntax(format!("'{{% {statement} %}}' is not inside <{element}>"))
                })?;
            let stop = xml[tag_end..]
                .find(&close)
                .map(|e| tag_end + e + close.len())
                .ok_or_else(|| {
                    TemplateError::Syntax(format!("'{{% {statement} %}}' has no closing </{element}>"))
                })?;

            xml.replace_range(start..stop, &format!("{{% {statement} %}}"));
        }
    }
    Ok(xml)
}

// Parsing

#[derive(Debug, PartialEq)]
enum Token {
    Text(String),
    Expr(String),
    Stmt(String),
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = source;
    loop {
        let next = [rest.find("{{"), rest.find("{%")]
            .into_iter()
            .flatten()
            .min();
        let Some(pos) = next else {
            if !rest.is_empty() {
                tokens.push(Token::Text(rest.to_string()));
            }
            return Ok(tokens);
        };
        if pos > 0 {
            tokens.push(Token::Text(rest[..pos].to_string()));
        }

        let is_expr = rest[pos..].starts_with("{{");
        let close = if is_expr { "}}" } else { "%}" };
        let body_start = pos + 2;
        let end = rest[body_start..]
            .find(close)
            .map(|e| body_start + e)
            .ok_or_else(|| TemplateError::Syntax(format!("unclosed tag near '{}'", preview(&rest[pos..]))))?;
        let body = rest[body_start..end].trim().to_string();
        tokens.push(if is_expr {
            Token::Expr(body)
        } else {
            Token::Stmt(body)
        });
        rest = &rest[end + 2..];
    }
}

fn preview(s: &str) -> String {
    s.chars().take(40).collect()
}

#[derive(Debug)]
enum Filter {
    Join(String),
    Upper,
    Lower,
}

#[derive(Debug)]
struct Expr {
    path: Vec<String>,
    filters: Vec<Filter>,
}

#[derive(Debug)]
enum Node {
    Text(String),
    Expr(Expr),
    For {
        var: String,
        iterable: Vec<String>,
        body: Vec<Node>,
    },
    If {
        negate: bool,
        cond: Vec<String>,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// Parses until EOF or a closing statement, which is returned unconsumed by the caller.
fn parse(tokens: &mut std::vec::IntoIter<Token>) -> Result<(Vec<Node>, Option<String>)> {
    let mut nodes = Vec::new();
    while let Some(token) = tokens.next() {
        match token {
            Token::Text(text) => nodes.push(Node::Text(text)),
            Token::Expr(expr) => nodes.push(Node::Expr(parse_expr(&expr)?)),
            Token::Stmt(stmt) => {
                let keyword = stmt.split_whitespace().next().unwrap_or("");
                match keyword {
                    "for" => nodes.push(parse_for(&stmt, tokens)?),
                    "if" => nodes.push(parse_if(&stmt, tokens)?),
                    "endfor" | "endif" | "else" => return Ok((nodes, Some(keyword.to_string()))),
                    other => {
                        return Err(TemplateError::Syntax(format!("unknown statement '{other}'")));
                    }
                }
            }
        }
    }
    Ok((nodes, None))
}

fn parse_for(stmt: &str, tokens: &mut std::vec::IntoIter<Token>) -> Result<Node> {
    let parts: Vec<&str> = stmt.split_whitespace().collect();
    let [_, var, "in", iterable] = parts.as_slice() else {
        return Err(TemplateError::Syntax(format!("expected 'for x in a.b', got '{stmt}'")));
    };
    let var = identifier(var)?.to_string();
    let iterable = parse_path(iterable)?;

    let (body, end) = parse(tokens)?;
    if end.as_deref() != Some("endfor") {
        return Err(TemplateError::Syntax(format!("'{stmt}' is missing endfor")));
    }
    Ok(Node::For {
        var,
        iterable,
        body,
    })
}

fn parse_if(stmt: &str, tokens: &mut std::vec::IntoIter<Token>) -> Result<Node> {
    let parts: Vec<&str> = stmt.split_whitespace().collect();
    let (negate, cond) = match parts.as_slice() {
        [_, "not", path] => (true, parse_path(path)?),
        [_, path] => (false, parse_path(path)?),
        _ => {
            return Err(TemplateError::Syntax(format!(
                "expected 'if [not] a.b', got '{stmt}'"
            )));
        }
    };

    let (then, end) = parse(tokens)?;
    let otherwise = match end.as_deref() {
        Some("endif") => Vec::new(),
        Some("else") => {
            let (otherwise, end) = parse(tokens)?;
            if end.as_deref() != Some("endif") {
                return Err(TemplateError::Syntax(format!("'{stmt}' is missing endif")));
            }
            otherwise
        }
        _ => return Err(TemplateError::Syntax(format!("'{stmt}' is missing endif"))),
    };
    Ok(Node::If {
        negate,
        cond,
        then,
        otherwise,
    })
}

fn parse_expr(expr: &str) -> Result<Expr> {
    let mut parts = expr.split('|');
    let path = parse_path(parts.next().unwrap_or("").trim())?;
    let filters = parts
        .map(|f| parse_filter(f.trim()))
        .collect::<Result<Vec<_>>>()?;
    Ok(Expr { path, filters })
}

fn parse_filter(filter: &str) -> Result<Filter> {
    match filter {
        "upper" => return Ok(Filter::Upper),
        "lower" => return Ok(Filter::Lower),
        "join" => return Ok(Filter::Join(String::new())),
        _ => {}
    }
    let arg = filter
        .strip_prefix("join(")
        .and_then(|a| a.strip_suffix(')'))
        .map(str::trim)
        .ok_or_else(|| TemplateError::Syntax(format!("unsupported filter '{filter}'")))?;
    let sep = arg
        .strip_prefix('"')
        .and_then(|a| a.strip_suffix('"'))
        .or_else(|| arg.strip_prefix('\'').and_then(|a| a.strip_suffix('\'')))
        .ok_or_else(|| TemplateError::Syntax(format!("join expects a quoted separator, got '{arg}'")))?;
    Ok(Filter::Join(sep.to_string()))
}

fn parse_path(path: &str) -> Result<Vec<String>> {
    path.split('.')
        .map(|segment| identifier(segment).map(str::to_string))
        .collect()
}

fn identifier(s: &str) -> Result<&str> {
    let valid = !s.is_empty()
        && !s.starts_with(|c: char| c.is_ascii_digit())
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(s)
    } else {
        Err(TemplateError::Syntax(format!("invalid name '{s}'")))
    }
}

// Rendering

struct Scope<'a> {
    root: &'a Map<String, Value>,
    locals: Vec<(String, Value)>,
}

impl Scope<'_> {
    fn lookup(&self, path: &[String]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut value = self
            .locals
            .iter()
            .rev()
            .find(|(name, _)| name == first)
            .map(|(_, v)| v)
            .or_else(|| self.root.get(first))?;
        for segment in rest {
            value = value.get(segment)?;
        }
        Some(value)
    }
}

fn render_nodes(nodes: &[Node], scope: &mut Scope<'_>, out: &mut String) -> Result<()> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Expr(expr) => out.push_str(&escape(&eval(expr, scope)?)),
            Node::For {
                var,
                iterable,
                body,
            } => {
                let items = match scope.lookup(iterable) {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => items.clone(),
                    Some(other) => {
                        return Err(TemplateError::Data(format!(
                            "'{}' is {}, expected a list",
                            iterable.join("."),
                            kind(other)
                        )));
                    }
                };
                let count = items.len();
                for (i, item) in items.into_iter().enumerate() {
                    let loop_info = serde_json::json!({
                        "index": i + 1,
                        "index0": i,
                        "first": i == 0,
                        "last": i + 1 == count,
                    });
                    scope.locals.push(("loop".to_string(), loop_info));
                    scope.locals.push((var.clone(), item));
                    let result = render_nodes(body, scope, out);
                    scope.locals.truncate(scope.locals.len() - 2);
                    result?;
                }
            }
            Node::If {
                negate,
                cond,
                then,
                otherwise,
            } => {
                let truthy = scope.lookup(cond).is_some_and(is_truthy);
                if truthy != *negate {
                    render_nodes(then, scope, out)?;
                } else {
                    render_nodes(otherwise, scope, out)?;
                }
            }
        }
    }
    Ok(())
}

fn eval(expr: &Expr, scope: &Scope<'_>) -> Result<String> {
    let value = scope.lookup(&expr.path).unwrap_or(&Value::Null);
    let mut text: Option<String> = None;

    for filter in &expr.filters {
        text = Some(match filter {
            Filter::Join(sep) => match (value, &text) {
                (Value::Array(items), None) => items.iter().map(scalar).collect::<Result<Vec<_>>>()?.join(sep),
                (_, Some(t)) => t.clone(),
                (other, None) => scalar(other)?,
            },
            Filter::Upper => text.map_or_else(|| scalar(value), Ok)?.to_uppercase(),
            Filter::Lower => text.map_or_else(|| scalar(value), Ok)?.to_lowercase(),
        });
    }

    match text {
        Some(t) => Ok(t),
        None => scalar(value).map_err(|_| {
            TemplateError::Data(format!(
                "'{}' is {}; loop over it or use a join filter",
                expr.path.join("."),
                kind(value)
            ))
        }),
    }
}

fn scalar(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(TemplateError::Data(format!("cannot print {}", kind(other)))),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
