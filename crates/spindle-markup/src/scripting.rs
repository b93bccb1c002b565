//! Scripting bridge: sugar translation and the host evaluator seam.
//!
//! Story code is written in a sugared dialect (`$gold`, `_i`, `to`, `is`,
//! `and`, ...). [`desugar`] rewrites it into plain host-expression syntax;
//! the [`Evaluator`] trait is where an embedding plugs in whatever actually
//! executes the result. The interpreter itself never evaluates anything.

use serde_json::Value;

use crate::error::EvalError;
use crate::output::OutputSink;

/// Host expression evaluator.
///
/// `output` is bound for evaluations that may emit content (the `print`
/// facility of an embedding's runtime, `<<script>>` bodies); `aux` carries
/// macro auxiliary state when the evaluation runs on behalf of a macro.
pub trait Evaluator {
    fn evaluate(
        &self,
        code: &str,
        output: Option<&OutputSink>,
        aux: Option<&Value>,
    ) -> Result<Value, EvalError>;

    /// Desugar, then evaluate.
    fn evaluate_sugar(
        &self,
        code: &str,
        output: Option<&OutputSink>,
        aux: Option<&Value>,
    ) -> Result<Value, EvalError> {
        self.evaluate(&desugar(code), output, aux)
    }
}

/// Render a host value the way story text shows it: strings bare, whole
/// numbers without a fraction, everything else in literal syntax.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else {
                n.to_string()
            }
        }
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Host truthiness: empty string, zero, and null are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Keyword operators and their host-syntax replacements.
fn keyword_replacement(word: &str) -> Option<&'static str> {
    Some(match word {
        "to" => "=",
        "eq" => "==",
        "neq" => "!=",
        "is" => "===",
        "isnot" => "!==",
        "not" => "!",
        "and" => "&&",
        "or" => "||",
        "def" => "\"undefined\" !== typeof",
        "ndef" => "\"undefined\" === typeof",
        "gt" => ">",
        "gte" => ">=",
        "lt" => "<",
        "lte" => "<=",
        _ => return None,
    })
}

fn is_word_byte(c: u8) -> bool {
    c == b'_' || c.is_ascii_alphanumeric()
}

fn is_ident_start(c: u8) -> bool {
    c == b'_' || c.is_ascii_alphabetic()
}

fn word_end(b: &[u8], mut i: usize) -> usize {
    while i < b.len() && is_word_byte(b[i]) {
        i += 1;
    }
    i
}

/// Byte offset just past a quoted section starting at `start` (which holds
/// the opening quote). Backslash escapes are honored; an unterminated
/// string runs to the end of input.
pub(crate) fn skip_quoted(b: &[u8], start: usize) -> usize {
    let quote = b[start];
    let mut i = start + 1;
    while i < b.len() {
        match b[i] {
            b'\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    b.len()
}

fn next_significant(b: &[u8], mut i: usize) -> Option<u8> {
    while i < b.len() && b[i].is_ascii_whitespace() {
        i += 1;
    }
    b.get(i).copied()
}

/// Translate sugared story code into host-expression syntax.
///
/// Rewrites, outside of quoted strings:
///
/// - `$name` / `_name` into `story.name` / `temp.name`
/// - keyword operators per the token table (`to`, `is`, `and`, ...),
///   with `is not` coalescing into a single `!==`
///
/// Words preceded by `.` (property access) and words directly serving as
/// object keys (followed by `:`) are left alone.
pub fn desugar(code: &str) -> String {
    let b = code.as_bytes();
    let mut out = String::with_capacity(code.len() + 16);
    let mut i = 0;
    // Last significant (non-whitespace) byte handled; after a keyword
    // rewrite this is the replacement's tail.
    let mut prev: Option<u8> = None;
    while i < b.len() {
        let c = b[i];
        match c {
            b'"' | b'\'' | b'`' => {
                let end = skip_quoted(b, i);
                out.push_str(&code[i..end]);
                prev = Some(c);
                i = end;
            }
            b'$' | b'_'
                if (i == 0 || !is_word_byte(b[i - 1]))
                    && b.get(i + 1).copied().is_some_and(is_ident_start) =>
            {
                out.push_str(if c == b'$' { "story." } else { "temp." });
                let end = word_end(b, i + 1);
                out.push_str(&code[i + 1..end]);
                prev = Some(b[end - 1]);
                i = end;
            }
            c if c.is_ascii_alphabetic() => {
                let end = word_end(b, i);
                let word = &code[i..end];
                let property = prev == Some(b'.');
                let object_key = next_significant(b, end) == Some(b':');
                if word == "is" && !property && !object_key {
                    // "is not" is one operator
                    let mut j = end;
                    while j < b.len() && b[j].is_ascii_whitespace() {
                        j += 1;
                    }
                    if code[j..].starts_with("not")
                        && !b.get(j + 3).copied().is_some_and(is_word_byte)
                    {
                        out.push_str("!==");
                        prev = Some(b'=');
                        i = j + 3;
                        continue;
                    }
                }
                match keyword_replacement(word) {
                    Some(rep) if !property && !object_key => {
                        out.push_str(rep);
                        // Replacements record their own tail byte, not the
                        // source word's: `eq` must not read as a word before
                        // a following sigil.
                        prev = rep.as_bytes().last().copied();
                    }
                    _ => {
                        out.push_str(word);
                        prev = Some(b[end - 1]);
                    }
                }
                i = end;
            }
            _ => {
                if let Some(ch) = code[i..].chars().next() {
                    out.push(ch);
                    if !ch.is_whitespace() {
                        prev = Some(c);
                    }
                    i += ch.len_utf8();
                } else {
                    break;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigils_become_store_paths() {
        assert_eq!(desugar("$gold + _i"), "story.gold + temp.i");
    }

    #[test]
    fn assignment_and_comparison_keywords() {
        assert_eq!(desugar("$gold to 5"), "story.gold = 5");
        assert_eq!(desugar("$a eq $b and $c neq 0"), "story.a == story.b && story.c != 0");
        assert_eq!(desugar("$a is $b or not $c"), "story.a === story.b || ! story.c");
    }

    #[test]
    fn sigils_rewrite_directly_after_keywords() {
        assert_eq!(desugar("$a eq $b"), "story.a == story.b");
        assert_eq!(desugar("$i to $i + 1"), "story.i = story.i + 1");
        assert_eq!(desugar("$a is not $b or $c"), "story.a !== story.b || story.c");
        assert_eq!(desugar("foo _bar"), "foo temp.bar");
    }

    #[test]
    fn is_not_coalesces() {
        assert_eq!(desugar("$a is not $b"), "story.a !== story.b");
        assert_eq!(desugar("$a isnot $b"), "story.a !== story.b");
    }

    #[test]
    fn relational_keywords() {
        assert_eq!(desugar("$a gte 1 and $a lt 9"), "story.a >= 1 && story.a < 9");
    }

    #[test]
    fn def_and_ndef_expand_to_typeof_tests() {
        assert_eq!(desugar("def $gold"), "\"undefined\" !== typeof story.gold");
        assert_eq!(desugar("ndef _i"), "\"undefined\" === typeof temp.i");
    }

    #[test]
    fn strings_pass_through_verbatim() {
        assert_eq!(desugar("\"$gold is to not\""), "\"$gold is to not\"");
        assert_eq!(desugar("'a and b'"), "'a and b'");
        assert_eq!(desugar("`_t and ${x}`"), "`_t and ${x}`");
    }

    #[test]
    fn property_access_is_left_alone() {
        assert_eq!(desugar("$obj.to"), "story.obj.to");
        assert_eq!(desugar("x.is"), "x.is");
    }

    #[test]
    fn object_keys_are_left_alone() {
        assert_eq!(desugar("{ is: 1, to : 2 }"), "{ is: 1, to : 2 }");
    }

    #[test]
    fn lone_sigils_pass_through() {
        assert_eq!(desugar("a _ b"), "a _ b");
        assert_eq!(desugar("1 $ 2"), "1 $ 2");
    }

    #[test]
    fn mid_word_sigils_do_not_trigger() {
        assert_eq!(desugar("foo_bar"), "foo_bar");
        assert_eq!(desugar("1_000"), "1_000");
    }

    #[test]
    fn words_containing_keywords_are_untouched() {
        assert_eq!(desugar("history"), "history");
        assert_eq!(desugar("andor"), "andor");
    }
}
