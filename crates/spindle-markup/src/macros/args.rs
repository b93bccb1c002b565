//! Macro argument tokenization.
//!
//! Arguments split on whitespace at bracket depth zero, with quoted and
//! backquoted sections slurped whole. Each token then becomes a host value:
//! quoted strings, numbers, keywords, variable reads, link markup, or a
//! bareword string.

use serde_json::{json, Value};

use crate::bracket::parse_square_bracketed;
use crate::error::EvalError;
use crate::scripting::skip_quoted;
use crate::state::Runtime;

/// Split raw argument text into tokens.
pub fn split_args(raw: &str) -> Vec<String> {
    let b = raw.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < b.len() {
        while i < b.len() && b[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= b.len() {
            break;
        }
        let start = i;
        let mut depth = 0i32;
        while i < b.len() {
            match b[i] {
                b'"' | b'\'' | b'`' => i = skip_quoted(b, i),
                b'[' => {
                    depth += 1;
                    i += 1;
                }
                b']' => {
                    depth -= 1;
                    i += 1;
                }
                c if c.is_ascii_whitespace() && depth <= 0 => break,
                _ => i += 1,
            }
        }
        tokens.push(raw[start..i].to_string());
    }
    tokens
}

fn unquote(token: &str) -> String {
    let inner = &token[1..token.len().saturating_sub(1)];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Convert one token into a host value.
fn token_value(rt: &Runtime, token: &str) -> Result<Value, EvalError> {
    if token.len() >= 2 && (token.starts_with('"') || token.starts_with('\'')) {
        return Ok(Value::String(unquote(token)));
    }
    if token.len() >= 2 && token.starts_with('`') {
        // Backquoted expressions evaluate at argument-parse time.
        return rt.eval_sugar(&token[1..token.len() - 1], None, None);
    }
    if token.starts_with("[[") {
        let markup = parse_square_bracketed(token, 0);
        if let Some(message) = markup.error {
            return Err(EvalError::new(message));
        }
        let link = markup.link.unwrap_or_default();
        let text = markup.text.unwrap_or_else(|| link.clone());
        return Ok(json!({ "link": link, "text": text }));
    }
    if (token.starts_with('$') || token.starts_with('_')) && token.len() > 1 {
        return Ok(rt.var(token).unwrap_or(Value::Null));
    }
    match token {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" | "undefined" => return Ok(Value::Null),
        _ => {}
    }
    if let Ok(n) = token.parse::<i64>() {
        return Ok(json!(n));
    }
    if let Ok(f) = token.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Ok(Value::Number(n));
        }
    }
    Ok(Value::String(token.to_string()))
}

/// Tokenize and convert `raw` into argument values. A failed backquote
/// evaluation or malformed link argument aborts the whole parse; the caller
/// turns the error into an output marker.
pub fn parse_args(rt: &Runtime, raw: &str) -> Result<Vec<Value>, EvalError> {
    split_args(raw)
        .iter()
        .map(|token| token_value(rt, token))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::story_runtime;
    use serde_json::json;

    #[test]
    fn splits_on_depth_zero_whitespace() {
        assert_eq!(split_args("a  b c"), vec!["a", "b", "c"]);
        assert_eq!(split_args("[[Go North]] x"), vec!["[[Go North]]", "x"]);
        assert_eq!(split_args("\"two words\" y"), vec!["\"two words\"", "y"]);
        assert_eq!(split_args("`1 + 2` z"), vec!["`1 + 2`", "z"]);
        assert!(split_args("   ").is_empty());
    }

    #[test]
    fn literal_tokens() {
        let rt = story_runtime(&[]);
        let args = parse_args(&rt, "5 2.5 true null bare \"quo ted\"").unwrap();
        assert_eq!(
            args,
            vec![
                json!(5),
                json!(2.5),
                json!(true),
                Value::Null,
                json!("bare"),
                json!("quo ted"),
            ]
        );
    }

    #[test]
    fn variable_reads_and_backquotes() {
        let rt = story_runtime(&[]);
        rt.set_var("$gold", json!(7));
        let args = parse_args(&rt, "$gold _missing `2 + 3`").unwrap();
        assert_eq!(args, vec![json!(7), Value::Null, json!(5)]);
    }

    #[test]
    fn link_arguments_become_objects() {
        let rt = story_runtime(&[]);
        let args = parse_args(&rt, "[[Go|North]]").unwrap();
        assert_eq!(args, vec![json!({ "link": "North", "text": "Go" })]);
    }

    #[test]
    fn escapes_inside_quotes() {
        let rt = story_runtime(&[]);
        let args = parse_args(&rt, r#""a\"b\nc""#).unwrap();
        assert_eq!(args, vec![json!("a\"b\nc")]);
    }

    #[test]
    fn malformed_link_argument_is_an_error() {
        let rt = story_runtime(&[]);
        assert!(parse_args(&rt, "[[]]").is_err());
    }
}
