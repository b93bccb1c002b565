//! The wikifier: the recursive dispatch loop at the heart of the
//! interpreter.
//!
//! One [`Wikifier`] handles one source string. [`Wikifier::subwikify`]
//! repeatedly finds the next parser match (via the compiled profile
//! alternation) and hands control to that parser's handler; handlers may
//! re-enter the loop for nested sections. A bounded scan additionally
//! carries a terminator pattern, and the terminator wins any tie against a
//! parser match at the same position.

pub mod parsers;

use std::rc::Rc;

use log::trace;
use regex::Regex;

use crate::error::MarkupError;
use crate::output::{Node, OutputSink};
use crate::state::{Runtime, Signal};

/// Per-render options, inherited by nested sections.
#[derive(Debug, Clone)]
pub struct Options {
    /// Parser profile to dispatch with.
    pub profile: String,
    /// Skip output cleanup when the top-level render finishes.
    pub no_cleanup: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            profile: "all".to_string(),
            no_cleanup: false,
        }
    }
}

impl Options {
    pub fn with_profile(profile: impl Into<String>) -> Self {
        Options {
            profile: profile.into(),
            ..Options::default()
        }
    }
}

/// An owned record of where a bounded scan's terminator matched.
#[derive(Debug, Clone)]
pub struct TerminatorMatch {
    pub start: usize,
    pub end: usize,
    pub text: String,
    /// Capture groups of the terminator pattern.
    pub groups: Vec<Option<String>>,
}

/// One in-flight scan over one source string.
///
/// The `match_*` fields describe the parser match currently being handled;
/// a handler that consumes more source than its match advances `next_match`
/// itself.
pub struct Wikifier {
    rt: Rc<Runtime>,
    source: Rc<str>,
    output: OutputSink,
    options: Options,
    pub match_start: usize,
    pub match_length: usize,
    pub match_text: String,
    /// Cursor: scanning resumes here.
    pub next_match: usize,
}

impl Wikifier {
    /// Run one unbounded scan of `source` into `output`.
    pub(crate) fn run(
        rt: &Rc<Runtime>,
        output: &OutputSink,
        source: &str,
        options: &Options,
    ) -> Result<(), MarkupError> {
        let mut w = Wikifier {
            rt: Rc::clone(rt),
            source: Rc::from(source),
            output: output.clone(),
            options: options.clone(),
            match_start: 0,
            match_length: 0,
            match_text: String::new(),
            next_match: 0,
        };
        w.subwikify(None).map(|_| ())
    }

    pub fn runtime(&self) -> &Rc<Runtime> {
        &self.rt
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Cheap owned handle to the source, for handlers that scan it while
    /// mutating the wikifier.
    pub fn source_handle(&self) -> Rc<str> {
        Rc::clone(&self.source)
    }

    pub fn output(&self) -> &OutputSink {
        &self.output
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    fn flush_text(&self, upto: usize) {
        if upto > self.next_match {
            self.output
                .append(Node::text(&self.source[self.next_match..upto]));
        }
    }

    /// Scan from the cursor, dispatching parser matches, until the source
    /// ends, `terminator` matches, or a control signal stops the scan.
    ///
    /// A terminator match at or before the next parser match wins the tie;
    /// the matched region is consumed and returned. `Ok(None)` means the
    /// terminator never matched (or there was none).
    pub fn subwikify(
        &mut self,
        terminator: Option<&Regex>,
    ) -> Result<Option<TerminatorMatch>, MarkupError> {
        let rt = Rc::clone(&self.rt);
        let profile = rt.parsers().profile(&self.options.profile)?;
        let source = Rc::clone(&self.source);
        loop {
            if self.next_match >= source.len() {
                break;
            }
            let term = terminator.and_then(|re| re.captures_at(&source, self.next_match));
            let parser_match = profile.find_from(&source, self.next_match);
            if let Some(caps) = &term {
                let whole = match caps.get(0) {
                    Some(m) => m,
                    None => break,
                };
                // Terminator wins a tie against a parser match.
                if parser_match.map_or(true, |p| whole.start() <= p.start) {
                    self.flush_text(whole.start());
                    self.next_match = whole.end();
                    let groups = caps
                        .iter()
                        .skip(1)
                        .map(|g| g.map(|m| m.as_str().to_string()))
                        .collect();
                    return Ok(Some(TerminatorMatch {
                        start: whole.start(),
                        end: whole.end(),
                        text: whole.as_str().to_string(),
                        groups,
                    }));
                }
            }
            let Some(found) = parser_match else { break };
            self.flush_text(found.start);
            self.match_start = found.start;
            self.match_length = found.end - found.start;
            self.match_text = source[found.start..found.end].to_string();
            self.next_match = found.end;
            trace!(
                "dispatch parser #{} at {}: {:?}",
                found.parser,
                found.start,
                self.match_text
            );
            let handler = rt.parsers().handler(found.parser);
            handler(self)?;
            match rt.signal() {
                Signal::None => {}
                // Loop signals and exit stop this scan; whoever owns the
                // signal (a loop macro or the top-level render) clears it.
                Signal::Continue | Signal::Break | Signal::Exit => return Ok(None),
            }
        }
        self.flush_text(source.len());
        self.next_match = source.len();
        Ok(None)
    }
}
