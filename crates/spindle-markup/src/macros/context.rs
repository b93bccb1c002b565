//! The execution context handed to a macro handler.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use crate::error::{EvalError, MarkupError};
use crate::macros::registry::ResolvedMacro;
use crate::macros::shadows::ShadowCapture;
use crate::output::{Node, OutputSink};
use crate::state::Runtime;
use crate::wikifier::Wikifier;

/// One section of a container macro's body, split at its child tags.
///
/// The first segment belongs to the macro itself; later segments carry the
/// child tag that opened them. `contents` is the raw source slice.
#[derive(Debug, Clone)]
pub struct PayloadSegment {
    pub name: String,
    pub raw_args: String,
    pub args: Vec<Value>,
    pub contents: String,
}

/// Everything a handler may touch while its macro runs: the invocation
/// (name, arguments, payload), the resolved definition's state, and the
/// wikifier that dispatched it.
pub struct MacroContext<'w> {
    pub name: String,
    pub raw_args: String,
    pub args: Vec<Value>,
    pub payload: Vec<PayloadSegment>,
    resolved: ResolvedMacro,
    wikifier: &'w mut Wikifier,
}

impl<'w> MacroContext<'w> {
    pub(crate) fn new(
        name: String,
        raw_args: String,
        args: Vec<Value>,
        payload: Vec<PayloadSegment>,
        resolved: ResolvedMacro,
        wikifier: &'w mut Wikifier,
    ) -> Self {
        MacroContext {
            name,
            raw_args,
            args,
            payload,
            resolved,
            wikifier,
        }
    }

    pub fn runtime(&self) -> &Rc<Runtime> {
        self.wikifier.runtime()
    }

    pub fn output(&self) -> &OutputSink {
        self.wikifier.output()
    }

    pub fn wikifier(&mut self) -> &mut Wikifier {
        self.wikifier
    }

    /// Auxiliary state shared with aliases of the same definition.
    pub fn state(&self) -> &Rc<RefCell<Value>> {
        &self.resolved.state
    }

    /// Append a per-macro error marker; rendering continues.
    pub fn report_error(&self, message: impl AsRef<str>) {
        self.output()
            .append(Node::error(format!("<<{}>>: {}", self.name, message.as_ref())));
    }

    /// Evaluate sugared story code with this macro's auxiliary state bound.
    pub fn eval_sugar(
        &self,
        code: &str,
        output: Option<&OutputSink>,
    ) -> Result<Value, EvalError> {
        let state = self.resolved.state.borrow();
        self.runtime().eval_sugar(code, output, Some(&state))
    }

    /// Evaluate host code verbatim (no sugar pass) with this macro's
    /// auxiliary state bound.
    pub fn eval_raw(
        &self,
        code: &str,
        output: Option<&OutputSink>,
    ) -> Result<Value, EvalError> {
        let state = self.resolved.state.borrow();
        self.runtime().eval_raw(code, output, Some(&state))
    }

    /// Render `source` as a nested section into `sink`, inheriting this
    /// render's options.
    pub fn wikify_into(&mut self, sink: &OutputSink, source: &str) -> Result<(), MarkupError> {
        let rt = Rc::clone(self.wikifier.runtime());
        let options = self.wikifier.options().clone();
        rt.interpret(sink, source, options)
    }

    /// Whether an ancestor macro invocation (not this one) resolved to
    /// `name`.
    pub fn context_has(&self, name: &str) -> bool {
        let frames = self.runtime().frames().borrow();
        let ancestors = frames.len().saturating_sub(1);
        frames[..ancestors].iter().any(|f| f.name == name)
    }

    /// Record `name` (sigiled) for shadow capture while this macro's frame
    /// is live. Returns false for a name with no `$`/`_` sigil.
    pub fn declare_shadow(&self, name: &str) -> bool {
        if name.len() < 2 || !(name.starts_with('$') || name.starts_with('_')) {
            return false;
        }
        if let Some(frame) = self.runtime().frames().borrow_mut().last_mut() {
            frame.shadows.insert(name.to_string());
            return true;
        }
        false
    }

    /// Snapshot every shadow-declared variable for a deferred callback.
    pub fn capture_shadows(&self) -> ShadowCapture {
        ShadowCapture::capture(self.runtime())
    }

    /// Stop scanning and defer `callback` until the outermost render
    /// unwinds.
    pub fn set_exit(&self, callback: impl FnOnce() + 'static) {
        self.runtime().set_exit_callback(callback);
    }
}
