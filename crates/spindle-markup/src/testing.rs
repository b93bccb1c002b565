//! Test scaffolding: in-memory collaborators and a miniature evaluator.
//!
//! The interpreter needs a variable store, a passage source, and an
//! [`Evaluator`] before it can do anything; this module provides working
//! in-memory versions of all three so the crate's tests (and the CLI) run
//! without a host embedding. [`SimpleEvaluator`] is a small recursive
//! descent interpreter over *desugared* code. It covers story-sized
//! expressions and nothing more; real embeddings bring their own host
//! language.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::{json, Value};

use crate::error::EvalError;
use crate::output::{Node, OutputSink};
use crate::scripting::{display_value, truthy, Evaluator};
use crate::state::{shared_store, PassageSource, Runtime, SharedStore, VariableStore};

// ── In-memory collaborators ──────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStore(BTreeMap<String, Value>);

impl VariableStore for MemoryStore {
    fn get(&self, name: &str) -> Option<Value> {
        self.0.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: Value) {
        self.0.insert(name.to_string(), value);
    }

    fn delete(&mut self, name: &str) -> bool {
        self.0.remove(name).is_some()
    }
}

#[derive(Debug, Default)]
pub struct MemoryPassages(BTreeMap<String, String>);

impl MemoryPassages {
    pub fn insert(&mut self, title: impl Into<String>, text: impl Into<String>) {
        self.0.insert(title.into(), text.into());
    }
}

impl PassageSource for MemoryPassages {
    fn passage(&self, title: &str) -> Option<String> {
        self.0.get(title).cloned()
    }
}

/// A ready-to-use runtime over in-memory collaborators.
///
/// Panics on registry failure; this is harness code.
pub fn story_runtime(passages: &[(&str, &str)]) -> Rc<Runtime> {
    let story = shared_store(MemoryStore::default());
    let temp = shared_store(MemoryStore::default());
    let evaluator = SimpleEvaluator::new(Rc::clone(&story), Rc::clone(&temp));
    let mut library = MemoryPassages::default();
    for (title, text) in passages {
        library.insert(*title, *text);
    }
    Runtime::new(story, temp, Box::new(library), Box::new(evaluator))
        .expect("standard registries build")
}

/// Run a full render and panic if any error marker appears in the tree.
pub fn interpret_expecting_clean(rt: &Rc<Runtime>, source: &str) -> Vec<Node> {
    let sink = OutputSink::new();
    rt.interpret(&sink, source, Default::default())
        .expect("interpret");
    if sink.has_error_markers() {
        panic!("render produced error markers: {:#?}", sink.take());
    }
    sink.take()
}

// ── Miniature host evaluator ─────────────────────────────────────────────

/// Recursive-descent evaluator over desugared story code.
///
/// Supports literals, `story.x` / `temp.x` reads and assignment, the usual
/// logical/equality/relational/arithmetic operators, unary `!` / `-` /
/// `typeof`, `,` / `;` statement sequencing, and a `print(expr)` builtin
/// that appends to the bound output sink.
pub struct SimpleEvaluator {
    story: SharedStore,
    temp: SharedStore,
}

impl SimpleEvaluator {
    pub fn new(story: SharedStore, temp: SharedStore) -> Self {
        SimpleEvaluator { story, temp }
    }

    fn read(&self, ns: &str, name: &str) -> Option<Value> {
        let store = if ns == "story" { &self.story } else { &self.temp };
        store.borrow().get(name)
    }

    fn write(&self, ns: &str, name: &str, value: Value) {
        let store = if ns == "story" { &self.story } else { &self.temp };
        store.borrow_mut().set(name, value);
    }
}

impl Evaluator for SimpleEvaluator {
    fn evaluate(
        &self,
        code: &str,
        output: Option<&OutputSink>,
        _aux: Option<&Value>,
    ) -> Result<Value, EvalError> {
        let mut p = Parser {
            code,
            b: code.as_bytes(),
            i: 0,
            eval: self,
            output,
        };
        let mut last = Value::Null;
        loop {
            p.skip_ws();
            if p.at_end() {
                break;
            }
            last = p.statement()?;
            p.skip_ws();
            if p.accept_byte(b';') || p.accept_byte(b',') {
                continue;
            }
            if !p.at_end() {
                return Err(EvalError::new(format!(
                    "unexpected input at offset {} in {:?}",
                    p.i, code
                )));
            }
        }
        Ok(last)
    }
}

struct Parser<'a> {
    code: &'a str,
    b: &'a [u8],
    i: usize,
    eval: &'a SimpleEvaluator,
    output: Option<&'a OutputSink>,
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "undefined",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) | Value::Object(_) => "object",
    }
}

fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    if strict_eq(a, b) {
        return true;
    }
    match (a, b) {
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.trim().parse::<f64>().ok() == n.as_f64()
        }
        (Value::Bool(x), other) | (other, Value::Bool(x)) => truthy(other) == *x,
        _ => false,
    }
}

fn as_num(value: &Value) -> Result<f64, EvalError> {
    match value {
        Value::Null => Ok(0.0),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| EvalError::new("non-finite number")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| EvalError::new(format!("{s:?} is not a number"))),
        other => Err(EvalError::new(format!(
            "cannot use a {} as a number",
            type_name(other)
        ))),
    }
}

fn make_num(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        json!(f as i64)
    } else {
        serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

impl Parser<'_> {
    fn at_end(&self) -> bool {
        self.i >= self.b.len()
    }

    fn skip_ws(&mut self) {
        while self.i < self.b.len() && self.b[self.i].is_ascii_whitespace() {
            self.i += 1;
        }
    }

    fn accept_byte(&mut self, byte: u8) -> bool {
        if self.i < self.b.len() && self.b[self.i] == byte {
            self.i += 1;
            true
        } else {
            false
        }
    }

    fn expect_byte(&mut self, byte: u8) -> Result<(), EvalError> {
        if self.accept_byte(byte) {
            Ok(())
        } else {
            Err(EvalError::new(format!(
                "expected {:?} at offset {} in {:?}",
                byte as char, self.i, self.code
            )))
        }
    }

    /// Accept an operator after whitespace. Callers check longer operators
    /// first (`===` before `==` before `=`).
    fn accept_op(&mut self, op: &str) -> bool {
        self.skip_ws();
        if self.code[self.i..].starts_with(op) {
            self.i += op.len();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> String {
        let start = self.i;
        while self.i < self.b.len()
            && (self.b[self.i] == b'_' || self.b[self.i].is_ascii_alphanumeric())
        {
            self.i += 1;
        }
        self.code[start..self.i].to_string()
    }

    /// `story.name` / `temp.name` at the cursor, or rewind and None.
    fn try_path(&mut self) -> Option<(String, String)> {
        self.skip_ws();
        let save = self.i;
        if self.i >= self.b.len() || !self.b[self.i].is_ascii_alphabetic() {
            return None;
        }
        let ns = self.ident();
        if (ns == "story" || ns == "temp") && self.accept_byte(b'.') {
            let name = self.ident();
            if !name.is_empty() {
                return Some((ns, name));
            }
        }
        self.i = save;
        None
    }

    fn statement(&mut self) -> Result<Value, EvalError> {
        let save = self.i;
        if let Some((ns, name)) = self.try_path() {
            self.skip_ws();
            // '=' but not '==' / '===' is assignment.
            if self.i < self.b.len()
                && self.b[self.i] == b'='
                && self.b.get(self.i + 1) != Some(&b'=')
            {
                self.i += 1;
                let value = self.expr()?;
                self.eval.write(&ns, &name, value.clone());
                return Ok(value);
            }
        }
        self.i = save;
        self.expr()
    }

    fn expr(&mut self) -> Result<Value, EvalError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Value, EvalError> {
        let mut left = self.and_expr()?;
        while self.accept_op("||") {
            let right = self.and_expr()?;
            if !truthy(&left) {
                left = right;
            }
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Value, EvalError> {
        let mut left = self.eq_expr()?;
        while self.accept_op("&&") {
            let right = self.eq_expr()?;
            if truthy(&left) {
                left = right;
            }
        }
        Ok(left)
    }

    fn eq_expr(&mut self) -> Result<Value, EvalError> {
        let mut left = self.rel_expr()?;
        loop {
            if self.accept_op("===") {
                let right = self.rel_expr()?;
                left = Value::Bool(strict_eq(&left, &right));
            } else if self.accept_op("!==") {
                let right = self.rel_expr()?;
                left = Value::Bool(!strict_eq(&left, &right));
            } else if self.accept_op("==") {
                let right = self.rel_expr()?;
                left = Value::Bool(loose_eq(&left, &right));
            } else if self.accept_op("!=") {
                let right = self.rel_expr()?;
                left = Value::Bool(!loose_eq(&left, &right));
            } else {
                return Ok(left);
            }
        }
    }

    fn rel_expr(&mut self) -> Result<Value, EvalError> {
        let mut left = self.add_expr()?;
        loop {
            let op = if self.accept_op(">=") {
                ">="
            } else if self.accept_op("<=") {
                "<="
            } else if self.accept_op(">") {
                ">"
            } else if self.accept_op("<") {
                "<"
            } else {
                return Ok(left);
            };
            let right = self.add_expr()?;
            let result = match (&left, &right) {
                (Value::String(a), Value::String(b)) => match op {
                    ">=" => a >= b,
                    "<=" => a <= b,
                    ">" => a > b,
                    _ => a < b,
                },
                _ => {
                    let (a, b) = (as_num(&left)?, as_num(&right)?);
                    match op {
                        ">=" => a >= b,
                        "<=" => a <= b,
                        ">" => a > b,
                        _ => a < b,
                    }
                }
            };
            left = Value::Bool(result);
        }
    }

    fn add_expr(&mut self) -> Result<Value, EvalError> {
        let mut left = self.mul_expr()?;
        loop {
            if self.accept_op("+") {
                let right = self.mul_expr()?;
                left = match (&left, &right) {
                    (Value::String(_), _) | (_, Value::String(_)) => {
                        Value::String(format!("{}{}", display_value(&left), display_value(&right)))
                    }
                    _ => make_num(as_num(&left)? + as_num(&right)?),
                };
            } else if self.accept_op("-") {
                let right = self.mul_expr()?;
                left = make_num(as_num(&left)? - as_num(&right)?);
            } else {
                return Ok(left);
            }
        }
    }

    fn mul_expr(&mut self) -> Result<Value, EvalError> {
        let mut left = self.unary()?;
        loop {
            if self.accept_op("*") {
                let right = self.unary()?;
                left = make_num(as_num(&left)? * as_num(&right)?);
            } else if self.accept_op("/") {
                let right = self.unary()?;
                let divisor = as_num(&right)?;
                if divisor == 0.0 {
                    return Err(EvalError::new("division by zero"));
                }
                left = make_num(as_num(&left)? / divisor);
            } else if self.accept_op("%") {
                let right = self.unary()?;
                let divisor = as_num(&right)?;
                if divisor == 0.0 {
                    return Err(EvalError::new("division by zero"));
                }
                left = make_num(as_num(&left)? % divisor);
            } else {
                return Ok(left);
            }
        }
    }

    fn peek_word(&mut self, word: &str) -> bool {
        self.skip_ws();
        if !self.code[self.i..].starts_with(word) {
            return false;
        }
        match self.b.get(self.i + word.len()) {
            Some(c) if *c == b'_' || c.is_ascii_alphanumeric() => false,
            _ => true,
        }
    }

    fn unary(&mut self) -> Result<Value, EvalError> {
        self.skip_ws();
        if self.i < self.b.len() && self.b[self.i] == b'!' && self.b.get(self.i + 1) != Some(&b'=')
        {
            self.i += 1;
            let value = self.unary()?;
            return Ok(Value::Bool(!truthy(&value)));
        }
        if self.accept_op("-") {
            let value = self.unary()?;
            return Ok(make_num(-as_num(&value)?));
        }
        if self.peek_word("typeof") {
            self.i += "typeof".len();
            // Applied to a bare store path, a missing variable reads as
            // undefined rather than evaluating to an error.
            if let Some((ns, name)) = self.try_path() {
                return Ok(Value::String(
                    self.eval
                        .read(&ns, &name)
                        .map(|v| type_name(&v).to_string())
                        .unwrap_or_else(|| "undefined".to_string()),
                ));
            }
            let value = self.unary()?;
            return Ok(Value::String(type_name(&value).to_string()));
        }
        self.primary()
    }

    fn string_lit(&mut self) -> Result<Value, EvalError> {
        let quote = self.b[self.i];
        self.i += 1;
        let mut out = String::new();
        while self.i < self.b.len() {
            match self.b[self.i] {
                b'\\' => {
                    match self.b.get(self.i + 1) {
                        Some(b'n') => out.push('\n'),
                        Some(b't') => out.push('\t'),
                        Some(&c) => out.push(c as char),
                        None => {}
                    }
                    self.i += 2;
                }
                c if c == quote => {
                    self.i += 1;
                    return Ok(Value::String(out));
                }
                _ => {
                    if let Some(ch) = self.code[self.i..].chars().next() {
                        out.push(ch);
                        self.i += ch.len_utf8();
                    }
                }
            }
        }
        Err(EvalError::new("unterminated string literal"))
    }

    fn number_lit(&mut self) -> Result<Value, EvalError> {
        let start = self.i;
        while self.i < self.b.len()
            && (self.b[self.i].is_ascii_digit() || self.b[self.i] == b'.')
        {
            self.i += 1;
        }
        let text = &self.code[start..self.i];
        if let Ok(n) = text.parse::<i64>() {
            return Ok(json!(n));
        }
        text.parse::<f64>()
            .map(make_num)
            .map_err(|_| EvalError::new(format!("bad number literal {text:?}")))
    }

    fn primary(&mut self) -> Result<Value, EvalError> {
        self.skip_ws();
        if self.at_end() {
            return Err(EvalError::new("unexpected end of expression"));
        }
        let c = self.b[self.i];
        if c == b'(' {
            self.i += 1;
            let value = self.expr()?;
            self.skip_ws();
            self.expect_byte(b')')?;
            return Ok(value);
        }
        if c == b'"' || c == b'\'' {
            return self.string_lit();
        }
        if c.is_ascii_digit() {
            return self.number_lit();
        }
        if c == b'_' || c.is_ascii_alphabetic() {
            if let Some((ns, name)) = self.try_path() {
                return Ok(self.eval.read(&ns, &name).unwrap_or(Value::Null));
            }
            let ident = self.ident();
            return match ident.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" | "undefined" => Ok(Value::Null),
                "print" => {
                    self.skip_ws();
                    self.expect_byte(b'(')?;
                    let value = self.expr()?;
                    self.skip_ws();
                    self.expect_byte(b')')?;
                    if let Some(sink) = self.output {
                        sink.append(Node::text(display_value(&value)));
                    }
                    Ok(Value::Null)
                }
                "" => Err(EvalError::new(format!(
                    "unexpected character at offset {} in {:?}",
                    self.i, self.code
                ))),
                other => Err(EvalError::new(format!("{other} is not defined"))),
            };
        }
        Err(EvalError::new(format!(
            "unexpected character {:?} at offset {} in {:?}",
            c as char, self.i, self.code
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::desugar;

    fn eval(code: &str) -> Result<Value, EvalError> {
        let story = shared_store(MemoryStore::default());
        let temp = shared_store(MemoryStore::default());
        let ev = SimpleEvaluator::new(Rc::clone(&story), Rc::clone(&temp));
        ev.evaluate(code, None, None)
    }

    fn eval_with(ev: &SimpleEvaluator, code: &str) -> Value {
        ev.evaluate(&desugar(code), None, None).unwrap()
    }

    fn fixture() -> SimpleEvaluator {
        let story = shared_store(MemoryStore::default());
        let temp = shared_store(MemoryStore::default());
        SimpleEvaluator::new(Rc::clone(&story), Rc::clone(&temp))
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), json!(7));
        assert_eq!(eval("(1 + 2) * 3").unwrap(), json!(9));
        assert_eq!(eval("7 % 3").unwrap(), json!(1));
        assert_eq!(eval("-4 + 1").unwrap(), json!(-3));
        assert_eq!(eval("10 / 4").unwrap(), json!(2.5));
        assert!(eval("1 / 0").is_err());
    }

    #[test]
    fn strings_concatenate() {
        assert_eq!(eval("\"a\" + \"b\"").unwrap(), json!("ab"));
        assert_eq!(eval("\"n=\" + 5").unwrap(), json!("n=5"));
    }

    #[test]
    fn comparisons() {
        assert_eq!(eval("2 >= 2").unwrap(), json!(true));
        assert_eq!(eval("\"a\" < \"b\"").unwrap(), json!(true));
        assert_eq!(eval("5 === 5").unwrap(), json!(true));
        assert_eq!(eval("5 === \"5\"").unwrap(), json!(false));
        assert_eq!(eval("5 == \"5\"").unwrap(), json!(true));
        assert_eq!(eval("5 !== 6").unwrap(), json!(true));
    }

    #[test]
    fn logic_short_circuits_to_operands() {
        assert_eq!(eval("0 || 7").unwrap(), json!(7));
        assert_eq!(eval("3 || 7").unwrap(), json!(3));
        assert_eq!(eval("0 && 7").unwrap(), json!(0));
        assert_eq!(eval("!0").unwrap(), json!(true));
    }

    #[test]
    fn store_assignment_and_read() {
        let ev = fixture();
        assert_eq!(eval_with(&ev, "$gold to 5"), json!(5));
        assert_eq!(eval_with(&ev, "$gold + 1"), json!(6));
        assert_eq!(eval_with(&ev, "_i to $gold * 2, _i"), json!(10));
    }

    #[test]
    fn typeof_distinguishes_missing_variables() {
        let ev = fixture();
        assert_eq!(eval_with(&ev, "def $gold"), json!(false));
        eval_with(&ev, "$gold to 1");
        assert_eq!(eval_with(&ev, "def $gold"), json!(true));
        assert_eq!(eval_with(&ev, "ndef _nope"), json!(true));
        assert_eq!(eval_with(&ev, "typeof \"x\"").as_str(), Some("string"));
    }

    #[test]
    fn sugared_operator_chains() {
        let ev = fixture();
        eval_with(&ev, "$a to 2, $b to 3");
        assert_eq!(eval_with(&ev, "$a lt $b and $b lte 3"), json!(true));
        assert_eq!(eval_with(&ev, "$a is not $b"), json!(true));
        assert_eq!(eval_with(&ev, "not ($a eq 2)"), json!(false));
    }

    #[test]
    fn print_builtin_appends_to_bound_output() {
        let ev = fixture();
        let sink = OutputSink::new();
        ev.evaluate("print(\"hi \" + 2)", Some(&sink), None).unwrap();
        assert_eq!(sink.take(), vec![Node::text("hi 2")]);
    }

    #[test]
    fn unknown_identifier_is_an_error() {
        assert!(eval("mystery").is_err());
        assert!(eval("1 +").is_err());
    }
}
