//! Parser profiles: registered markup parsers compiled into per-profile
//! regex alternations.
//!
//! Each parser contributes a pattern that locates where its markup *starts*;
//! the handler then walks the source by hand from there (arguments, payload
//! bodies, and closers are not regular). Profiles are compiled once, after
//! which registration is refused.

use std::collections::HashMap;

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::bracket::parse_square_bracketed;
use crate::error::MarkupError;
use crate::output::Node;
use crate::scripting::display_value;
use crate::wikifier::Wikifier;

pub type ParserHandler = fn(&mut Wikifier) -> Result<(), MarkupError>;

/// One registered markup parser.
pub struct ParserDef {
    pub name: &'static str,
    /// Start-of-markup pattern; joined into the profile alternation.
    pub pattern: String,
    /// Profiles this parser belongs to.
    pub profiles: &'static [&'static str],
    pub handler: ParserHandler,
}

/// A profile's parsers joined into one alternation, with each parser's
/// outer capture group recorded so a match maps back to its handler.
pub struct CompiledProfile {
    regex: Regex,
    /// (outer capture group, parser index) in registration order.
    groups: Vec<(usize, usize)>,
}

#[derive(Debug, Clone, Copy)]
pub struct ProfileMatch {
    pub parser: usize,
    pub start: usize,
    pub end: usize,
}

impl CompiledProfile {
    /// Earliest parser match at or after `from`.
    pub fn find_from(&self, text: &str, from: usize) -> Option<ProfileMatch> {
        let caps = self.regex.captures_at(text, from)?;
        for &(group, parser) in &self.groups {
            if let Some(m) = caps.get(group) {
                return Some(ProfileMatch {
                    parser,
                    start: m.start(),
                    end: m.end(),
                });
            }
        }
        None
    }
}

/// Capture groups a pattern opens, so group offsets in the joined
/// alternation can be assigned without parsing the pattern fully.
fn count_capture_groups(pattern: &str) -> usize {
    let b = pattern.as_bytes();
    let mut count = 0;
    let mut in_class = false;
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'\\' => i += 1,
            b'[' if !in_class => in_class = true,
            b']' if in_class => in_class = false,
            b'(' if !in_class => {
                if b.get(i + 1) != Some(&b'?') {
                    count += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    count
}

#[derive(Default)]
pub struct ParserRegistry {
    defs: Vec<ParserDef>,
    compiled: OnceCell<HashMap<String, CompiledProfile>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parser. Fails once the profiles are compiled, and fails
    /// early on a pattern that does not compile on its own.
    pub fn register(&mut self, def: ParserDef) -> Result<(), MarkupError> {
        if self.compiled.get().is_some() {
            return Err(MarkupError::RegistryFrozen {
                name: def.name.to_string(),
            });
        }
        Regex::new(&def.pattern)?;
        self.defs.push(def);
        Ok(())
    }

    /// Compile every profile's alternation and freeze the registry.
    pub fn compile(&self) -> Result<(), MarkupError> {
        if self.compiled.get().is_some() {
            return Err(MarkupError::ProfilesCompiled);
        }
        let mut names: Vec<&str> = Vec::new();
        for def in &self.defs {
            for name in def.profiles {
                if !names.contains(name) {
                    names.push(name);
                }
            }
        }
        let mut profiles = HashMap::new();
        for profile_name in names {
            let mut pattern = String::new();
            let mut groups = Vec::new();
            // Group numbering is 1-based; each parser gets one outer group
            // plus however many its own pattern opens.
            let mut next_group = 1;
            for (index, def) in self.defs.iter().enumerate() {
                if !def.profiles.contains(&profile_name) {
                    continue;
                }
                if !pattern.is_empty() {
                    pattern.push('|');
                }
                pattern.push('(');
                pattern.push_str(&def.pattern);
                pattern.push(')');
                groups.push((next_group, index));
                next_group += 1 + count_capture_groups(&def.pattern);
            }
            profiles.insert(
                profile_name.to_string(),
                CompiledProfile {
                    regex: Regex::new(&pattern)?,
                    groups,
                },
            );
        }
        // Cannot race: set only reachable once per the check above.
        let _ = self.compiled.set(profiles);
        Ok(())
    }

    pub fn profile(&self, name: &str) -> Result<&CompiledProfile, MarkupError> {
        self.compiled
            .get()
            .and_then(|map| map.get(name))
            .ok_or_else(|| MarkupError::UnknownProfile {
                name: name.to_string(),
            })
    }

    pub fn handler(&self, parser: usize) -> ParserHandler {
        self.defs[parser].handler
    }

    pub fn parser_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.defs.iter().map(|d| d.name)
    }

    pub fn profile_names(&self) -> Vec<String> {
        match self.compiled.get() {
            Some(map) => {
                let mut names: Vec<String> = map.keys().cloned().collect();
                names.sort();
                names
            }
            None => Vec::new(),
        }
    }
}

// ── Standard parsers ─────────────────────────────────────────────────────

/// Register the standard parser set, in priority order.
pub fn register_standard(registry: &mut ParserRegistry) -> Result<(), MarkupError> {
    registry.register(ParserDef {
        name: "macro",
        pattern: r"<</?[A-Za-z][\w-]*|<<[=-]".to_string(),
        profiles: &["all", "core"],
        handler: crate::macros::macro_parser,
    })?;
    registry.register(ParserDef {
        name: "image",
        pattern: r"\[[<>]?[Ii][Mm][Gg]\[".to_string(),
        profiles: &["all", "core"],
        handler: image_parser,
    })?;
    registry.register(ParserDef {
        name: "link",
        pattern: r"\[\[".to_string(),
        profiles: &["all", "core"],
        handler: link_parser,
    })?;
    registry.register(ParserDef {
        name: "variable",
        pattern: r"[$_][A-Za-z_]\w*".to_string(),
        profiles: &["all", "core"],
        handler: variable_parser,
    })?;
    registry.register(ParserDef {
        name: "line-break",
        pattern: r"\n".to_string(),
        profiles: &["all", "core"],
        handler: line_break_parser,
    })?;
    registry.register(ParserDef {
        name: "comment",
        pattern: r"/\*|<!--".to_string(),
        profiles: &["all"],
        handler: comment_parser,
    })?;
    Ok(())
}

fn link_parser(w: &mut Wikifier) -> Result<(), MarkupError> {
    let source = w.source_handle();
    let markup = parse_square_bracketed(&source, w.match_start);
    if let Some(message) = markup.error {
        // Leave the cursor just past the opener so the rest still renders.
        w.output().append(Node::error(message));
        return Ok(());
    }
    let target = markup.link.unwrap_or_default();
    w.output().append(Node::Link {
        text: markup.text.unwrap_or_else(|| target.clone()),
        target,
        setter: markup.setter,
        force_internal: markup.force_internal,
    });
    w.next_match = markup.end_pos;
    Ok(())
}

fn image_parser(w: &mut Wikifier) -> Result<(), MarkupError> {
    let source = w.source_handle();
    let markup = parse_square_bracketed(&source, w.match_start);
    if let Some(message) = markup.error {
        w.output().append(Node::error(message));
        return Ok(());
    }
    w.output().append(Node::Image {
        source: markup.source.unwrap_or_default(),
        align: markup.align,
        title: markup.text,
        link: markup.link,
        setter: markup.setter,
    });
    w.next_match = markup.end_pos;
    Ok(())
}

/// Naked variable interpolation: a sigiled name outside any macro renders
/// its value, or itself verbatim when the variable is unset.
fn variable_parser(w: &mut Wikifier) -> Result<(), MarkupError> {
    let name = w.match_text.clone();
    let node = match w.runtime().var(&name) {
        Some(value) => Node::text(display_value(&value)),
        None => Node::text(name),
    };
    w.output().append(node);
    Ok(())
}

fn line_break_parser(w: &mut Wikifier) -> Result<(), MarkupError> {
    w.output().append(Node::LineBreak);
    Ok(())
}

fn comment_parser(w: &mut Wikifier) -> Result<(), MarkupError> {
    let closer = if w.match_text == "/*" { "*/" } else { "-->" };
    let source = w.source_handle();
    match source[w.next_match..].find(closer) {
        Some(at) => {
            w.next_match += at + closer.len();
        }
        None => {
            w.output().append(Node::error("unterminated comment"));
            w.next_match = source.len();
        }
    }
    Ok(())
}
