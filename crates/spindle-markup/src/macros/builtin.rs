//! The standard macro library.
//!
//! Structural misuse and failed evaluations become error nodes via
//! `report_error`; handlers only return `Err` for registry/integrity
//! failures bubbling out of nested renders.

use std::rc::Rc;

use serde_json::Value;

use crate::error::MarkupError;
use crate::macros::context::MacroContext;
use crate::macros::registry::{DirectDef, MacroRegistry};
use crate::output::{Node, OutputSink};
use crate::scripting::{display_value, truthy, skip_quoted};
use crate::state::Signal;

/// Runaway-loop guard for `<<for>>`.
const MAX_FOR_ITERATIONS: usize = 5000;

pub fn register_standard(reg: &mut MacroRegistry) -> Result<(), MarkupError> {
    reg.register("set", DirectDef::new(Rc::new(set_handler)).raw_args())?;
    reg.register_alias("run", "set")?;
    reg.register("unset", DirectDef::new(Rc::new(unset_handler)).raw_args())?;
    reg.register("print", DirectDef::new(Rc::new(print_handler)).raw_args())?;
    reg.register_alias("=", "print")?;
    reg.register_alias("-", "print")?;
    reg.register(
        "if",
        DirectDef::new(Rc::new(if_handler))
            .with_tags(&["elseif", "else"])
            .raw_args(),
    )?;
    reg.register("for", DirectDef::new(Rc::new(for_handler)).container().raw_args())?;
    reg.register("break", DirectDef::new(Rc::new(break_handler)))?;
    reg.register("continue", DirectDef::new(Rc::new(continue_handler)))?;
    reg.register(
        "capture",
        DirectDef::new(Rc::new(capture_handler)).container().raw_args(),
    )?;
    reg.register("silently", DirectDef::new(Rc::new(silently_handler)).container())?;
    reg.register("include", DirectDef::new(Rc::new(include_handler)))?;
    reg.register("goto", DirectDef::new(Rc::new(goto_handler)))?;
    reg.register(
        "script",
        DirectDef::new(Rc::new(script_handler)).container().raw_args(),
    )?;
    Ok(())
}

// ── Assignment and evaluation ────────────────────────────────────────────

fn set_handler(ctx: &mut MacroContext<'_>) -> Result<(), MarkupError> {
    let raw = ctx.raw_args.trim().to_string();
    if raw.is_empty() {
        ctx.report_error("missing expression");
        return Ok(());
    }
    if let Err(e) = ctx.eval_sugar(&raw, None) {
        ctx.report_error(format!("bad evaluation: {e}"));
    }
    Ok(())
}

fn unset_handler(ctx: &mut MacroContext<'_>) -> Result<(), MarkupError> {
    let raw = ctx.raw_args.clone();
    if raw.trim().is_empty() {
        ctx.report_error("no story or temporary variables supplied");
        return Ok(());
    }
    for token in raw.split_whitespace() {
        if token.len() < 2 || !(token.starts_with('$') || token.starts_with('_')) {
            ctx.report_error(format!("invalid variable name {token:?}"));
            return Ok(());
        }
        // Deleting an unset variable is not an error.
        ctx.runtime().delete_var(token);
    }
    Ok(())
}

fn print_handler(ctx: &mut MacroContext<'_>) -> Result<(), MarkupError> {
    let raw = ctx.raw_args.trim().to_string();
    if raw.is_empty() {
        ctx.report_error("missing expression");
        return Ok(());
    }
    let sink = ctx.output().clone();
    match ctx.eval_sugar(&raw, Some(&sink)) {
        Ok(Value::Null) => {}
        Ok(value) => sink.append(Node::text(display_value(&value))),
        Err(e) => ctx.report_error(format!("bad evaluation: {e}")),
    }
    Ok(())
}

fn script_handler(ctx: &mut MacroContext<'_>) -> Result<(), MarkupError> {
    let body = ctx
        .payload
        .first()
        .map(|seg| seg.contents.clone())
        .unwrap_or_default();
    let sink = ctx.output().clone();
    if let Err(e) = ctx.eval_raw(&body, Some(&sink)) {
        ctx.report_error(format!("bad evaluation: {e}"));
    }
    Ok(())
}

// ── Branching ────────────────────────────────────────────────────────────

fn if_handler(ctx: &mut MacroContext<'_>) -> Result<(), MarkupError> {
    let segments = ctx.payload.clone();
    if let Some(pos) = segments.iter().position(|s| s.name == "else") {
        if pos != segments.len() - 1 {
            ctx.report_error("<<else>> must be the final clause");
            return Ok(());
        }
        if !segments[pos].raw_args.trim().is_empty() {
            ctx.report_error("<<else>> does not accept a conditional expression");
            return Ok(());
        }
    }
    let sink = ctx.output().clone();
    for seg in &segments {
        if seg.name == "else" {
            ctx.wikify_into(&sink, &seg.contents)?;
            return Ok(());
        }
        let cond = seg.raw_args.trim();
        if cond.is_empty() {
            ctx.report_error(format!("<<{}>>: missing conditional expression", seg.name));
            return Ok(());
        }
        match ctx.eval_sugar(cond, None) {
            Ok(value) if truthy(&value) => {
                ctx.wikify_into(&sink, &seg.contents)?;
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                ctx.report_error(format!(
                    "<<{}>>: bad conditional expression: {e}",
                    seg.name
                ));
                return Ok(());
            }
        }
    }
    Ok(())
}

// ── Looping ──────────────────────────────────────────────────────────────

/// Split on `sep` at the top level, leaving quoted sections whole.
fn split_top_level(raw: &str, sep: u8) -> Vec<String> {
    let b = raw.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'"' | b'\'' | b'`' => i = skip_quoted(b, i),
            c if c == sep => {
                parts.push(raw[start..i].to_string());
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }
    parts.push(raw[start..].to_string());
    parts
}

fn for_handler(ctx: &mut MacroContext<'_>) -> Result<(), MarkupError> {
    let parts = split_top_level(&ctx.raw_args, b';');
    let (init, cond, update) = match parts.len() {
        1 => (None, parts[0].trim().to_string(), None),
        3 => (
            Some(parts[0].trim().to_string()),
            parts[1].trim().to_string(),
            Some(parts[2].trim().to_string()),
        ),
        _ => {
            ctx.report_error("expected a condition or init ; condition ; update");
            return Ok(());
        }
    };
    let body = ctx
        .payload
        .first()
        .map(|seg| seg.contents.clone())
        .unwrap_or_default();
    if let Some(init) = init.as_deref().filter(|s| !s.is_empty()) {
        if let Err(e) = ctx.eval_sugar(init, None) {
            ctx.report_error(format!("bad init expression: {e}"));
            return Ok(());
        }
    }
    let rt = Rc::clone(ctx.runtime());
    let sink = ctx.output().clone();
    let mut exhausted = true;
    for _ in 0..MAX_FOR_ITERATIONS {
        // An empty condition loops until <<break>> or the guard trips.
        if !cond.is_empty() {
            match ctx.eval_sugar(&cond, None) {
                Ok(value) if truthy(&value) => {}
                Ok(_) => {
                    exhausted = false;
                    break;
                }
                Err(e) => {
                    ctx.report_error(format!("bad conditional expression: {e}"));
                    return Ok(());
                }
            }
        }
        ctx.wikify_into(&sink, &body)?;
        match rt.signal() {
            Signal::Break => {
                rt.clear_signal();
                exhausted = false;
                break;
            }
            Signal::Continue => rt.clear_signal(),
            Signal::Exit => {
                // Not ours to clear.
                exhausted = false;
                break;
            }
            Signal::None => {}
        }
        if let Some(update) = update.as_deref().filter(|s| !s.is_empty()) {
            if let Err(e) = ctx.eval_sugar(update, None) {
                ctx.report_error(format!("bad update expression: {e}"));
                return Ok(());
            }
        }
    }
    if exhausted {
        ctx.report_error(format!(
            "exceeded the maximum iteration limit ({MAX_FOR_ITERATIONS})"
        ));
    }
    Ok(())
}

fn break_handler(ctx: &mut MacroContext<'_>) -> Result<(), MarkupError> {
    if !ctx.context_has("for") {
        ctx.report_error("must only be used within a <<for>> body");
        return Ok(());
    }
    ctx.runtime().set_signal(Signal::Break);
    Ok(())
}

fn continue_handler(ctx: &mut MacroContext<'_>) -> Result<(), MarkupError> {
    if !ctx.context_has("for") {
        ctx.report_error("must only be used within a <<for>> body");
        return Ok(());
    }
    ctx.runtime().set_signal(Signal::Continue);
    Ok(())
}

// ── Scoping and output control ───────────────────────────────────────────

fn capture_handler(ctx: &mut MacroContext<'_>) -> Result<(), MarkupError> {
    let raw = ctx.raw_args.clone();
    if raw.trim().is_empty() {
        ctx.report_error("no story or temporary variables supplied");
        return Ok(());
    }
    for token in raw.split_whitespace() {
        if !ctx.declare_shadow(token) {
            ctx.report_error(format!("invalid variable name {token:?}"));
            return Ok(());
        }
    }
    let body = ctx
        .payload
        .first()
        .map(|seg| seg.contents.clone())
        .unwrap_or_default();
    let sink = ctx.output().clone();
    ctx.wikify_into(&sink, &body)
}

fn silently_handler(ctx: &mut MacroContext<'_>) -> Result<(), MarkupError> {
    let body = ctx
        .payload
        .first()
        .map(|seg| seg.contents.clone())
        .unwrap_or_default();
    let scratch = OutputSink::new();
    ctx.wikify_into(&scratch, &body)?;
    // Output is discarded; error markers are not.
    for node in scratch.take() {
        if matches!(node, Node::Error { .. }) {
            ctx.output().append(node);
        }
    }
    Ok(())
}

// ── Passages ─────────────────────────────────────────────────────────────

/// A passage argument is a string or a `[[...]]` link object.
fn passage_arg(args: &[Value]) -> Option<String> {
    match args.first()? {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("link")?.as_str().map(str::to_string),
        _ => None,
    }
}

fn include_handler(ctx: &mut MacroContext<'_>) -> Result<(), MarkupError> {
    let Some(target) = passage_arg(&ctx.args) else {
        ctx.report_error("no passage name supplied");
        return Ok(());
    };
    let Some(text) = ctx.runtime().passages().passage(&target) else {
        ctx.report_error(format!("passage {target:?} does not exist"));
        return Ok(());
    };
    let sink = ctx.output().clone();
    ctx.wikify_into(&sink, &text)
}

fn goto_handler(ctx: &mut MacroContext<'_>) -> Result<(), MarkupError> {
    let Some(target) = passage_arg(&ctx.args) else {
        ctx.report_error("no passage name supplied");
        return Ok(());
    };
    if !ctx.runtime().passages().has_passage(&target) {
        ctx.report_error(format!("passage {target:?} does not exist"));
        return Ok(());
    }
    // Scanning stops here; navigation fires once the render unwinds.
    let rt = Rc::clone(ctx.runtime());
    ctx.set_exit(move || rt.navigate(&target));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_level_split_respects_quotes() {
        assert_eq!(split_top_level("a; b; c", b';'), vec!["a", " b", " c"]);
        assert_eq!(split_top_level("\"a;b\"; c", b';'), vec!["\"a;b\"", " c"]);
        assert_eq!(split_top_level("only", b';'), vec!["only"]);
    }

    #[test]
    fn passage_arg_accepts_strings_and_link_objects() {
        use serde_json::json;
        assert_eq!(passage_arg(&[json!("North")]), Some("North".to_string()));
        assert_eq!(
            passage_arg(&[json!({ "link": "North", "text": "Go" })]),
            Some("North".to_string())
        );
        assert_eq!(passage_arg(&[json!(5)]), None);
        assert_eq!(passage_arg(&[]), None);
    }
}
