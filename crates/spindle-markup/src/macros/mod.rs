//! Macro invocation: the `<<name args>>` parser and its payload scanner.
//!
//! The profile pattern only finds `<<name` (or `<<=` / `<<->`); everything
//! after that — argument text, container payloads, closers — is scanned by
//! hand because quoted strings, nested brackets, and same-name nesting make
//! it non-regular. Structural mistakes become error nodes; only registry
//! integrity failures propagate as `Err`.

pub mod args;
pub mod builtin;
pub mod context;
pub mod registry;
pub mod shadows;

use std::rc::Rc;

use log::debug;

use crate::error::MarkupError;
use crate::macros::context::{MacroContext, PayloadSegment};
use crate::macros::shadows::MacroFrame;
use crate::output::Node;
use crate::scripting::skip_quoted;
use crate::state::Runtime;
use crate::wikifier::Wikifier;

/// Scan macro argument text from `from` up to the matching `>>` at nesting
/// depth zero. Quoted sections and `/* */` comments are slurped; `<<`/`>>`
/// pairs inside the arguments nest. Returns the trimmed raw text and the
/// offset just past the closing `>>`.
fn scan_args(source: &str, from: usize) -> Option<(String, usize)> {
    let b = source.as_bytes();
    let mut i = from;
    let mut depth = 0usize;
    while i < b.len() {
        match b[i] {
            b'"' | b'\'' | b'`' => i = skip_quoted(b, i),
            b'/' if b.get(i + 1) == Some(&b'*') => {
                i = match source[i + 2..].find("*/") {
                    Some(at) => i + 2 + at + 2,
                    None => b.len(),
                };
            }
            b'<' if b.get(i + 1) == Some(&b'<') => {
                depth += 1;
                i += 2;
            }
            b'>' if b.get(i + 1) == Some(&b'>') => {
                if depth == 0 {
                    return Some((source[from..i].trim().to_string(), i + 2));
                }
                depth -= 1;
                i += 2;
            }
            _ => i += 1,
        }
    }
    None
}

/// Read a macro or tag name at `from`: a leading `/` plus word characters,
/// or one of the `=` / `-` shorthands. Maximal, so `iffy` never matches
/// `if`.
fn read_tag_name(source: &str, from: usize) -> (&str, usize) {
    let b = source.as_bytes();
    let mut i = from;
    if i < b.len() && b[i] == b'/' {
        i += 1;
    }
    if i < b.len() && b[i].is_ascii_alphabetic() {
        i += 1;
        while i < b.len() && (b[i] == b'_' || b[i] == b'-' || b[i].is_ascii_alphanumeric()) {
            i += 1;
        }
    } else if i < b.len() && (b[i] == b'=' || b[i] == b'-') && i == from {
        i += 1;
    } else {
        // A bare `/` with no name is not a tag.
        i = from;
    }
    (&source[from..i], i)
}

/// Collect a container macro's payload: raw source segments split at its
/// child tags, honoring same-name nesting. The scan renders nothing, so
/// unselected branches never execute. Returns the segments (name, raw
/// args, contents) and the cursor past the closer.
fn collect_payload(
    source: &str,
    from: usize,
    name: &str,
    tags: &[String],
    opener_args: &str,
) -> Result<(Vec<(String, String, String)>, usize), String> {
    let closer = format!("/{name}");
    let b = source.as_bytes();
    let mut segments: Vec<(String, String, String)> = Vec::new();
    let mut current_name = name.to_string();
    let mut current_args = opener_args.to_string();
    let mut seg_start = from;
    let mut depth = 0usize;
    let mut i = from;
    while i + 1 < b.len() {
        if b[i] != b'<' || b[i + 1] != b'<' {
            i += 1;
            continue;
        }
        let tag_start = i;
        let (tag_name, name_end) = read_tag_name(source, i + 2);
        if tag_name.is_empty() {
            i += 2;
            continue;
        }
        if tag_name == closer {
            let Some((_, end)) = scan_args(source, name_end) else {
                return Err(format!("unterminated closing tag <<{closer}>>"));
            };
            if depth == 0 {
                segments.push((
                    current_name,
                    current_args,
                    source[seg_start..tag_start].to_string(),
                ));
                return Ok((segments, end));
            }
            depth -= 1;
            i = end;
        } else if tag_name == name {
            // Same-name nesting; its body belongs to this segment verbatim.
            depth += 1;
            i = scan_args(source, name_end).map(|(_, end)| end).unwrap_or(name_end);
        } else if depth == 0 && tags.iter().any(|t| t == tag_name) {
            let Some((raw, end)) = scan_args(source, name_end) else {
                return Err(format!("unterminated macro tag <<{tag_name}>>"));
            };
            segments.push((
                current_name.clone(),
                current_args.clone(),
                source[seg_start..tag_start].to_string(),
            ));
            current_name = tag_name.to_string();
            current_args = raw;
            seg_start = end;
            i = end;
        } else {
            // Unrelated macro: skip its argument text too, so a closer or
            // child tag quoted inside it cannot end this payload.
            i = scan_args(source, name_end).map(|(_, end)| end).unwrap_or(name_end);
        }
    }
    Err(format!("cannot find a closing tag for macro <<{name}>>"))
}

/// Pops the runtime's macro frame stack when the invocation unwinds.
struct FrameGuard {
    rt: Rc<Runtime>,
}

impl FrameGuard {
    fn push(rt: &Rc<Runtime>, name: &str) -> Self {
        rt.frames().borrow_mut().push(MacroFrame::new(name));
        FrameGuard { rt: Rc::clone(rt) }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.rt.frames().borrow_mut().pop();
    }
}

/// Parser handler for the `macro` profile entry.
pub(crate) fn macro_parser(w: &mut Wikifier) -> Result<(), MarkupError> {
    let source = w.source_handle();
    let name = w.match_text[2..].to_string();

    let Some((raw_args, args_end)) = scan_args(&source, w.next_match) else {
        w.output()
            .append(Node::error(format!("unterminated macro <<{name}")));
        w.next_match = source.len();
        return Ok(());
    };
    w.next_match = args_end;

    if let Some(bare) = name.strip_prefix('/') {
        w.output().append(Node::error(format!(
            "<</{bare}>> found without matching <<{bare}>>"
        )));
        return Ok(());
    }

    let rt = Rc::clone(w.runtime());
    if !rt.macros().exists(&name) {
        let message = match rt.macros().parents_of_tag(&name).and_then(|p| p.first()) {
            Some(parent) => format!(
                "child tag <<{name}>> was found outside of a call to its parent macro <<{parent}>>"
            ),
            None => format!("macro <<{name}>> does not exist"),
        };
        w.output().append(Node::error(message));
        return Ok(());
    }
    let resolved = rt.macros().lookup(&name)?;
    debug!("invoke macro <<{name}>> (target {})", resolved.target);

    let parsed_args = if resolved.allows_args {
        match args::parse_args(&rt, &raw_args) {
            Ok(values) => values,
            Err(e) => {
                w.output()
                    .append(Node::error(format!("<<{name}>>: bad evaluation: {e}")));
                return Ok(());
            }
        }
    } else {
        Vec::new()
    };

    let mut payload = Vec::new();
    if let Some(tags) = &resolved.tags {
        let collected = collect_payload(&source, w.next_match, &name, tags, &raw_args);
        let (segments, end) = match collected {
            Ok(found) => found,
            Err(message) => {
                w.output().append(Node::error(message));
                return Ok(());
            }
        };
        w.next_match = end;
        for (seg_name, seg_raw, contents) in segments {
            let seg_args = if resolved.allows_args {
                match args::parse_args(&rt, &seg_raw) {
                    Ok(values) => values,
                    Err(e) => {
                        w.output().append(Node::error(format!(
                            "<<{seg_name}>>: bad evaluation: {e}"
                        )));
                        return Ok(());
                    }
                }
            } else {
                Vec::new()
            };
            payload.push(PayloadSegment {
                name: seg_name,
                raw_args: seg_raw,
                args: seg_args,
                contents,
            });
        }
    }

    let _frame = FrameGuard::push(&rt, &resolved.target);
    let handler = Rc::clone(&resolved.handler);
    let mut ctx = MacroContext::new(name, raw_args, parsed_args, payload, resolved, w);
    handler(&mut ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_args_stops_at_depth_zero_closer() {
        let src = "<<set $x to 1>> rest";
        let (raw, end) = scan_args(src, 5).unwrap();
        assert_eq!(raw, "$x to 1");
        assert_eq!(&src[end..], " rest");
    }

    #[test]
    fn scan_args_slurps_quotes_and_comments() {
        let (raw, _) = scan_args("<<run \">>\" /* >> */ 1>>", 5).unwrap();
        assert_eq!(raw, "\">>\" /* >> */ 1");
        assert!(scan_args("<<set $x to \"unclosed>>", 5).is_none());
    }

    #[test]
    fn scan_args_tracks_nested_angle_pairs() {
        let (raw, _) = scan_args("<<print << 2 >> 1>>", 7).unwrap();
        assert_eq!(raw, "<< 2 >> 1");
    }

    #[test]
    fn read_tag_name_forms() {
        assert_eq!(read_tag_name("<<if $x>>", 2).0, "if");
        assert_eq!(read_tag_name("<</if>>", 2).0, "/if");
        assert_eq!(read_tag_name("<<=$x>>", 2).0, "=");
        assert_eq!(read_tag_name("<<->>", 2).0, "-");
        assert_eq!(read_tag_name("<<123>>", 2).0, "");
    }

    #[test]
    fn payload_splits_at_child_tags() {
        let src = "A<<elseif $x>>B<<else>>C<</if>>rest";
        let (segments, end) = collect_payload(src, 0, "if", &["elseif".into(), "else".into()], "$c")
            .unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], ("if".into(), "$c".into(), "A".into()));
        assert_eq!(segments[1], ("elseif".into(), "$x".into(), "B".into()));
        assert_eq!(segments[2], ("else".into(), "".into(), "C".into()));
        assert_eq!(&src[end..], "rest");
    }

    #[test]
    fn payload_honors_same_name_nesting() {
        let src = "A<<if $y>>B<<else>>C<</if>>D<</if>>";
        let (segments, _) = collect_payload(src, 0, "if", &["else".into()], "").unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].2, "A<<if $y>>B<<else>>C<</if>>D");
    }

    #[test]
    fn payload_ignores_unrelated_macros() {
        let src = "A<<set $x to 1>>B<</for>>";
        let (segments, _) = collect_payload(src, 0, "for", &["break".into()], "").unwrap();
        assert_eq!(segments[0].2, "A<<set $x to 1>>B");
    }

    #[test]
    fn quoted_closer_inside_unrelated_macro_is_not_a_closer() {
        let src = "x<<print \"a<</if>>b\">>y<</if>>rest";
        let (segments, end) = collect_payload(src, 0, "if", &["else".into()], "").unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].2, "x<<print \"a<</if>>b\">>y");
        assert_eq!(&src[end..], "rest");
    }

    #[test]
    fn unclosed_payload_is_an_error() {
        let err = collect_payload("A<<else>>B", 0, "if", &["else".into()], "").unwrap_err();
        assert!(err.contains("closing tag"));
        assert!(err.contains("<<if>>"));
    }
}
