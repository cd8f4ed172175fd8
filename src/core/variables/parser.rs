// src/core/variables/parser.rs

//! Parses configuration strings into templates of literal text and variable
//! references.
//!
//! Supported forms inside `${...}`:
//! - `source:address`
//! - `source(param, ...):address` and `source:address(param, ...)`
//! - `source(param)` without an address, `source:` for the whole source
//! - fallbacks: `${env:A, env:B, 'literal'}`
//! - nesting in addresses and params: `${env:${opt:stage}_URL}`
//! - a dotted qualifier standing in for a single param:
//!   `${cf.us-east-1:stack.Output}` is `${cf(us-east-1):stack.Output}`
//!
//! Anything between `${` and `}` that does not start with a valid source name
//! (e.g. `${AWS::Region}`) is kept verbatim as text.
//!
//! A backslash keeps `${` literal: `\${env:X}` is the text `${env:X}`. Before
//! a `${`, every pair of backslashes stands for one backslash. Escapes stay in
//! the template text until [`unescape`] runs on the fully resolved value.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

lazy_static! {
    static ref SOURCE_NAME_RE: Regex = Regex::new(r"^[a-z][a-zA-Z0-9]*$").unwrap();
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid variable syntax in \"{input}\": {reason}")]
pub struct SyntaxError {
    pub input: String,
    pub reason: String,
}

impl SyntaxError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// A parsed string: literal text interleaved with references.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Reference(Reference),
}

/// One `${...}` occurrence: a primary source followed by fallbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    /// The reference as written, including `${` and `}`.
    pub raw: String,
    pub sources: Vec<SourceSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceSpec {
    Variable(VariableSpec),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableSpec {
    pub source: String,
    pub params: Vec<Template>,
    pub address: Option<Template>,
}

impl Template {
    fn text(text: &str) -> Self {
        Self {
            segments: vec![Segment::Text(text.to_string())],
        }
    }

    pub fn has_references(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Reference(_)))
    }

    /// Returns the reference when the whole string is exactly one reference.
    pub fn as_single_reference(&self) -> Option<&Reference> {
        match self.segments.as_slice() {
            [Segment::Reference(reference)] => Some(reference),
            _ => None,
        }
    }

    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Reference(r) => Some(r),
            Segment::Text(_) => None,
        })
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => f.write_str(text)?,
                Segment::Reference(reference) => f.write_str(&reference.raw)?,
            }
        }
        Ok(())
    }
}

// --- TEMPLATE PARSING ---

/// Parses a string into a template.
pub fn parse_template(input: &str) -> Result<Template, SyntaxError> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = input;

    while let Some(open) = rest.find("${") {
        let (before, from_open) = rest.split_at(open);
        let body_and_rest = from_open.get(2..).unwrap_or_default();
        let unescaped = before.trim_end_matches('\\');
        let backslashes = before.len() - unescaped.len();

        if backslashes % 2 == 1 {
            text.push_str(before);
            text.push_str("${");
            rest = body_and_rest;
            continue;
        }

        let Some(close) = find_closing_brace(body_and_rest) else {
            // Unterminated: keep the remainder verbatim.
            text.push_str(rest);
            rest = "";
            break;
        };
        let body = body_and_rest.get(..close).unwrap_or_default();
        let raw = format!("${{{}}}", body);
        rest = body_and_rest.get(close + 1..).unwrap_or_default();

        match parse_reference(body, &raw)? {
            Some(reference) => {
                text.push_str(unescaped);
                text.push_str(&"\\".repeat(backslashes / 2));
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(Segment::Reference(reference));
            }
            None => {
                text.push_str(before);
                text.push_str(&raw);
            }
        }
    }
    text.push_str(rest);
    if !text.is_empty() || segments.is_empty() {
        segments.push(Segment::Text(text));
    }

    Ok(Template { segments })
}

/// Drops the escaping in front of each `${` left in resolved text: the run of
/// backslashes before it is halved, rounding down.
pub fn unescape(input: &str) -> Cow<'_, str> {
    if !input.contains("\\${") {
        return Cow::Borrowed(input);
    }
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find("${") {
        let (before, from_open) = rest.split_at(open);
        let kept = before.trim_end_matches('\\');
        output.push_str(kept);
        output.push_str(&"\\".repeat((before.len() - kept.len()) / 2));
        output.push_str("${");
        rest = from_open.get(2..).unwrap_or_default();
    }
    output.push_str(rest);
    Cow::Owned(output)
}

/// Cheap check used to skip strings that cannot hold a reference.
pub fn may_contain_reference(input: &str) -> bool {
    input.contains("${")
}

fn parse_reference(body: &str, raw: &str) -> Result<Option<Reference>, SyntaxError> {
    let parts = split_top_level(body, ',');
    let mut parts = parts.into_iter().map(str::trim);

    let Some(primary) = parts.next() else {
        return Ok(None);
    };
    let Some(primary) = parse_variable(primary, raw)? else {
        return Ok(None);
    };

    let mut sources = vec![SourceSpec::Variable(primary)];
    for part in parts {
        if part.is_empty() {
            return Err(SyntaxError::new(raw, "empty fallback"));
        }
        if let Some(literal) = parse_literal(part) {
            sources.push(SourceSpec::Literal(literal));
            continue;
        }
        match parse_variable(part, raw)? {
            Some(variable) => sources.push(SourceSpec::Variable(variable)),
            None => {
                return Err(SyntaxError::new(
                    raw,
                    format!("fallback \"{}\" is neither a literal nor a reference", part),
                ));
            }
        }
    }

    Ok(Some(Reference {
        raw: raw.to_string(),
        sources,
    }))
}

/// Parses `source`, `source(params)`, `source:address`,
/// `source(params):address`, `source:address(params)` or
/// `source.qualifier:address`.
/// Returns `None` when `part` does not begin with a valid source name.
fn parse_variable(part: &str, raw: &str) -> Result<Option<VariableSpec>, SyntaxError> {
    let name_end = part
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '.' || c == '-'))
        .unwrap_or(part.len());
    let (qualified, mut rest) = part.split_at(name_end);
    let (name, qualifier) = match qualified.split_once('.') {
        Some((name, qualifier)) => (name, Some(qualifier)),
        None => (qualified, None),
    };
    if !SOURCE_NAME_RE.is_match(name) {
        return Ok(None);
    }
    if rest.is_empty() {
        // A bare `${name}` is not a reference.
        return Ok(None);
    }

    let mut params = Vec::new();
    if let Some(after_paren) = rest.strip_prefix('(') {
        let close = find_closing_paren(after_paren)
            .ok_or_else(|| SyntaxError::new(raw, "unbalanced parentheses"))?;
        params = parse_params(after_paren.get(..close).unwrap_or_default())?;
        rest = after_paren.get(close + 1..).unwrap_or_default();
    }

    let address = if rest.is_empty() {
        None
    } else if let Some(address) = rest.strip_prefix(':') {
        let address = address.trim();
        match trailing_params(address) {
            Some((head, inner)) if params.is_empty() => {
                params = parse_params(inner)?;
                Some(parse_template(head.trim())?)
            }
            _ => Some(parse_template(address)?),
        }
    } else {
        return Ok(None);
    };

    if let Some(qualifier) = qualifier {
        if qualifier.is_empty() {
            return Err(SyntaxError::new(raw, format!("empty qualifier after \"{}.\"", name)));
        }
        if !params.is_empty() {
            return Err(SyntaxError::new(
                raw,
                format!("\"{}\" cannot take parameters as well as a qualifier", qualified),
            ));
        }
        params.push(Template::text(qualifier));
    }

    Ok(Some(VariableSpec {
        source: name.to_string(),
        params,
        address,
    }))
}

fn parse_params(inner: &str) -> Result<Vec<Template>, SyntaxError> {
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    split_top_level(inner, ',')
        .into_iter()
        .map(|p| {
            let p = p.trim();
            match unquote(p) {
                Some(unquoted) => Ok(Template::text(unquoted)),
                None => parse_template(p),
            }
        })
        .collect()
}

fn parse_literal(part: &str) -> Option<Value> {
    if let Some(unquoted) = unquote(part) {
        return Some(Value::String(unquoted.to_string()));
    }
    match part {
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "null" => Some(Value::Null),
        _ => part
            .parse::<serde_json::Number>()
            .ok()
            .map(Value::Number),
    }
}

fn unquote(part: &str) -> Option<&str> {
    ['\'', '"'].iter().find_map(|q| {
        part.strip_prefix(*q)
            .and_then(|p| p.strip_suffix(*q))
            .filter(|_| part.len() >= 2)
    })
}

/// Splits `address(params)` into its head and the text inside the trailing
/// parentheses.
fn trailing_params(address: &str) -> Option<(&str, &str)> {
    let without_close = address.strip_suffix(')')?;
    let mut depth = 0usize;
    for (index, c) in without_close.char_indices().rev() {
        match c {
            ')' => depth += 1,
            '(' if depth == 0 => {
                let head = without_close.get(..index)?;
                let inner = without_close.get(index + 1..)?;
                if head.is_empty() {
                    return None;
                }
                return Some((head, inner));
            }
            '(' => depth -= 1,
            _ => {}
        }
    }
    None
}

// --- SCANNING HELPERS ---

/// Finds the `}` that closes a reference body, honouring nested braces and
/// quoted text. `input` starts right after `${`.
fn find_closing_brace(input: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (index, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '{') => depth += 1,
            (None, '}') if depth == 0 => return Some(index),
            (None, '}') => depth -= 1,
            _ => {}
        }
    }
    None
}

fn find_closing_paren(input: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (index, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '(') | (None, '{') => depth += 1,
            (None, ')') if depth == 0 => return Some(index),
            (None, ')') | (None, '}') => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    None
}

/// Splits on `separator` where it is not nested in parens, braces or quotes.
fn split_top_level(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (index, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '(') | (None, '{') => depth += 1,
            (None, ')') | (None, '}') => depth = depth.saturating_sub(1),
            (None, c) if c == separator && depth == 0 => {
                parts.push(input.get(start..index).unwrap_or_default());
                start = index + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(input.get(start..).unwrap_or_default());
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variable(source: &SourceSpec) -> &VariableSpec {
        match source {
            SourceSpec::Variable(v) => v,
            SourceSpec::Literal(_) => panic!("expected a variable source"),
        }
    }

    fn single(input: &str) -> Reference {
        parse_template(input)
            .unwrap()
            .as_single_reference()
            .cloned()
            .expect("a single reference")
    }

    #[test]
    fn plain_strings_have_no_references() {
        let template = parse_template("just text").unwrap();
        assert!(!template.has_references());
        assert_eq!(template.to_string(), "just text");
    }

    #[test]
    fn parses_source_and_address() {
        let reference = single("${env:FOO}");
        let spec = variable(&reference.sources[0]);
        assert_eq!(spec.source, "env");
        assert_eq!(spec.address.as_ref().unwrap().to_string(), "FOO");
        assert!(spec.params.is_empty());
    }

    #[test]
    fn parses_params_in_both_positions() {
        let reference = single("${file(./config.yml):db.host}");
        let spec = variable(&reference.sources[0]);
        assert_eq!(spec.source, "file");
        assert_eq!(spec.params[0].to_string(), "./config.yml");
        assert_eq!(spec.address.as_ref().unwrap().to_string(), "db.host");

        let reference = single("${ssm:/app/key(raw, 'two')}");
        let spec = variable(&reference.sources[0]);
        assert_eq!(spec.address.as_ref().unwrap().to_string(), "/app/key");
        assert_eq!(spec.params.len(), 2);
        assert_eq!(spec.params[1].to_string(), "two");

        let reference = single("${strToBool(true)}");
        let spec = variable(&reference.sources[0]);
        assert!(spec.address.is_none());
        assert_eq!(spec.params[0].to_string(), "true");
    }

    #[test]
    fn parses_fallback_chains() {
        let reference = single("${env:A, env:B, 'fallback, with comma'}");
        assert_eq!(reference.sources.len(), 3);
        assert_eq!(variable(&reference.sources[1]).source, "env");
        assert_eq!(
            reference.sources[2],
            SourceSpec::Literal(Value::from("fallback, with comma"))
        );

        let reference = single("${opt:count, 3}");
        assert_eq!(reference.sources[1], SourceSpec::Literal(Value::from(3)));
    }

    #[test]
    fn parses_nested_references_in_address() {
        let reference = single("${env:${opt:stage}_URL}");
        let spec = variable(&reference.sources[0]);
        let address = spec.address.as_ref().unwrap();
        assert!(address.has_references());
        assert_eq!(address.to_string(), "${opt:stage}_URL");
    }

    #[test]
    fn embedded_references_split_text() {
        let template = parse_template("pre-${env:A}-mid-${self:b}").unwrap();
        assert_eq!(template.segments.len(), 4);
        assert_eq!(template.references().count(), 2);
        assert!(template.as_single_reference().is_none());
    }

    #[test]
    fn foreign_expressions_stay_text() {
        let template = parse_template("arn:${AWS::Region}:${env:X}").unwrap();
        assert_eq!(template.references().count(), 1);
        assert_eq!(template.to_string(), "arn:${AWS::Region}:${env:X}");

        let template = parse_template("${name}").unwrap();
        assert!(!template.has_references());

        let template = parse_template("broken ${env:X").unwrap();
        assert!(!template.has_references());
    }

    #[test]
    fn invalid_fallback_is_a_syntax_error() {
        let err = parse_template("${env:A, not valid}").unwrap_err();
        assert!(err.reason.contains("fallback"));
    }

    #[test]
    fn escaped_openings_stay_text() {
        let template = parse_template(r"literal \${env:X} here").unwrap();
        assert!(!template.has_references());
        assert_eq!(unescape(&template.to_string()), "literal ${env:X} here");

        let template = parse_template(r"\${env:A} and ${env:B}").unwrap();
        assert_eq!(template.references().count(), 1);
        assert_eq!(template.references().next().unwrap().raw, "${env:B}");
    }

    #[test]
    fn backslash_pairs_before_a_reference_halve() {
        let template = parse_template(r"C:\\${env:DIR}").unwrap();
        assert_eq!(template.segments.len(), 2);
        assert_eq!(template.segments[0], Segment::Text(r"C:\".to_string()));
        assert!(matches!(template.segments[1], Segment::Reference(_)));

        // Three backslashes: one literal backslash, then an escaped `${`.
        let template = parse_template(r"\\\${env:X}").unwrap();
        assert!(!template.has_references());
        assert_eq!(unescape(&template.to_string()), r"\${env:X}");
    }

    #[test]
    fn unescape_leaves_other_backslashes_alone() {
        assert!(matches!(unescape(r"a\b ${AWS::Region}"), Cow::Borrowed(_)));
        assert_eq!(unescape(r"\\${AWS::Region}"), r"\${AWS::Region}");
    }

    #[test]
    fn dotted_qualifier_becomes_the_param() {
        let reference = single("${cf.us-east-1:network.VpcId}");
        let spec = variable(&reference.sources[0]);
        assert_eq!(spec.source, "cf");
        assert_eq!(spec.params.len(), 1);
        assert_eq!(spec.params[0].to_string(), "us-east-1");
        assert_eq!(spec.address.as_ref().unwrap().to_string(), "network.VpcId");

        let err = parse_template("${cf.us-east-1(eu-west-1):network.VpcId}").unwrap_err();
        assert!(err.reason.contains("qualifier"));
        assert!(parse_template("${cf.:network.VpcId}").is_err());
        assert!(!parse_template("${AWS.Region}").unwrap().has_references());
    }
}
