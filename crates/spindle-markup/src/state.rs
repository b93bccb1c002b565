//! Story state collaborators and the interpreter runtime.
//!
//! The interpreter owns no storage or navigation of its own. The embedding
//! supplies a story-variable store, a temporary-variable store, a passage
//! source, and an expression evaluator; [`Runtime`] ties them to the parser
//! and macro registries and drives renders through [`Runtime::interpret`].
//!
//! Everything here is single-threaded by contract: handlers re-enter the
//! runtime freely, so interior mutability is `Cell`/`RefCell`, never locks.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::Value;

use crate::error::{EvalError, MarkupError};
use crate::macros::builtin;
use crate::macros::registry::MacroRegistry;
use crate::macros::shadows::MacroFrame;
use crate::output::OutputSink;
use crate::scripting::{desugar, Evaluator};
use crate::wikifier::parsers::{self, ParserRegistry};
use crate::wikifier::{Options, Wikifier};

/// Mutable name/value storage for one variable namespace.
pub trait VariableStore {
    fn get(&self, name: &str) -> Option<Value>;
    fn set(&mut self, name: &str, value: Value);
    /// Remove `name`; returns whether it was present.
    fn delete(&mut self, name: &str) -> bool;
    fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// Read access to the story's passage library.
pub trait PassageSource {
    fn passage(&self, title: &str) -> Option<String>;
    fn has_passage(&self, title: &str) -> bool {
        self.passage(title).is_some()
    }
}

/// A store handle shared between the runtime and the evaluator.
pub type SharedStore = Rc<RefCell<Box<dyn VariableStore>>>;

/// Wrap a concrete store as a [`SharedStore`].
pub fn shared_store(store: impl VariableStore + 'static) -> SharedStore {
    Rc::new(RefCell::new(Box::new(store)))
}

/// Control-flow signal raised by a handler and observed by enclosing scans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Signal {
    #[default]
    None,
    /// Skip the rest of the current loop iteration.
    Continue,
    /// Leave the current loop entirely.
    Break,
    /// Abandon the whole render.
    Exit,
}

/// The interpreter runtime: registries, state collaborators, and the
/// bookkeeping shared by every render in flight.
///
/// Constructed behind `Rc` because handlers and deferred callbacks hold
/// their own handles to it. Registries are frozen during construction;
/// custom parsers and macros go in through [`Runtime::with_registries`].
pub struct Runtime {
    parsers: ParserRegistry,
    macros: MacroRegistry,
    story: SharedStore,
    temp: SharedStore,
    passages: Box<dyn PassageSource>,
    evaluator: Box<dyn Evaluator>,
    on_navigate: RefCell<Option<Box<dyn Fn(&str)>>>,
    signal: Cell<Signal>,
    exit_callback: RefCell<Option<Box<dyn FnOnce()>>>,
    depth: Cell<usize>,
    turn: Cell<u64>,
    frames: RefCell<Vec<MacroFrame>>,
}

impl Runtime {
    /// Build a runtime with the standard parsers and macro library.
    pub fn new(
        story: SharedStore,
        temp: SharedStore,
        passages: Box<dyn PassageSource>,
        evaluator: Box<dyn Evaluator>,
    ) -> Result<Rc<Self>, MarkupError> {
        Self::with_registries(story, temp, passages, evaluator, |_, _| Ok(()))
    }

    /// Build a runtime, letting `customize` add parsers and macros before
    /// the registries freeze.
    pub fn with_registries(
        story: SharedStore,
        temp: SharedStore,
        passages: Box<dyn PassageSource>,
        evaluator: Box<dyn Evaluator>,
        customize: impl FnOnce(&mut ParserRegistry, &mut MacroRegistry) -> Result<(), MarkupError>,
    ) -> Result<Rc<Self>, MarkupError> {
        let mut parser_registry = ParserRegistry::new();
        parsers::register_standard(&mut parser_registry)?;
        let mut macro_registry = MacroRegistry::new();
        builtin::register_standard(&mut macro_registry)?;
        customize(&mut parser_registry, &mut macro_registry)?;
        parser_registry.compile()?;
        macro_registry.freeze();
        Ok(Rc::new(Runtime {
            parsers: parser_registry,
            macros: macro_registry,
            story,
            temp,
            passages,
            evaluator,
            on_navigate: RefCell::new(None),
            signal: Cell::new(Signal::None),
            exit_callback: RefCell::new(None),
            depth: Cell::new(0),
            turn: Cell::new(0),
            frames: RefCell::new(Vec::new()),
        }))
    }

    /// Render `source` into `output`.
    ///
    /// Re-entrant: handlers call back in for nested sections. Housekeeping
    /// (output cleanup, the deferred exit callback, signal reset) runs only
    /// when the outermost invocation finishes.
    pub fn interpret(
        self: &Rc<Self>,
        output: &OutputSink,
        source: &str,
        options: Options,
    ) -> Result<(), MarkupError> {
        let top_level = self.depth.get() == 0;
        if top_level {
            self.signal.set(Signal::None);
            self.exit_callback.borrow_mut().take();
        }
        self.depth.set(self.depth.get() + 1);
        let result = Wikifier::run(self, output, source, &options);
        self.depth.set(self.depth.get() - 1);
        if top_level {
            if !options.no_cleanup {
                output.cleanup();
            }
            let exit = self.exit_callback.borrow_mut().take();
            if let Some(callback) = exit {
                callback();
            }
            self.signal.set(Signal::None);
        }
        result
    }

    // ── State collaborators ──────────────────────────────────────────────

    pub fn story_store(&self) -> &SharedStore {
        &self.story
    }

    pub fn temp_store(&self) -> &SharedStore {
        &self.temp
    }

    pub fn passages(&self) -> &dyn PassageSource {
        self.passages.as_ref()
    }

    /// Evaluate sugared story code through the host evaluator.
    pub fn eval_sugar(
        &self,
        code: &str,
        output: Option<&OutputSink>,
        aux: Option<&Value>,
    ) -> Result<Value, EvalError> {
        self.evaluator.evaluate(&desugar(code), output, aux)
    }

    /// Evaluate host code verbatim, skipping the sugar translation.
    pub fn eval_raw(
        &self,
        code: &str,
        output: Option<&OutputSink>,
        aux: Option<&Value>,
    ) -> Result<Value, EvalError> {
        self.evaluator.evaluate(code, output, aux)
    }

    fn store_for<'a>(&'a self, name: &'a str) -> Option<(&'a SharedStore, &'a str)> {
        let bare = name.get(1..)?;
        if bare.is_empty() {
            return None;
        }
        match name.as_bytes().first() {
            Some(b'$') => Some((&self.story, bare)),
            Some(b'_') => Some((&self.temp, bare)),
            _ => None,
        }
    }

    /// Read a sigiled variable (`$name` or `_name`).
    pub fn var(&self, name: &str) -> Option<Value> {
        let (store, bare) = self.store_for(name)?;
        store.borrow().get(bare)
    }

    /// Write a sigiled variable. Returns false when `name` has no sigil.
    pub fn set_var(&self, name: &str, value: Value) -> bool {
        match self.store_for(name) {
            Some((store, bare)) => {
                store.borrow_mut().set(bare, value);
                true
            }
            None => false,
        }
    }

    pub fn has_var(&self, name: &str) -> bool {
        match self.store_for(name) {
            Some((store, bare)) => store.borrow().has(bare),
            None => false,
        }
    }

    pub fn delete_var(&self, name: &str) -> bool {
        match self.store_for(name) {
            Some((store, bare)) => store.borrow_mut().delete(bare),
            None => false,
        }
    }

    // ── Registries ───────────────────────────────────────────────────────

    pub fn parsers(&self) -> &ParserRegistry {
        &self.parsers
    }

    pub fn macros(&self) -> &MacroRegistry {
        &self.macros
    }

    // ── Render bookkeeping ───────────────────────────────────────────────

    pub fn signal(&self) -> Signal {
        self.signal.get()
    }

    pub fn set_signal(&self, signal: Signal) {
        self.signal.set(signal);
    }

    pub fn clear_signal(&self) {
        self.signal.set(Signal::None);
    }

    /// Turn counter; deferred callbacks captured on an earlier turn refuse
    /// to run once this advances.
    pub fn turn(&self) -> u64 {
        self.turn.get()
    }

    pub fn advance_turn(&self) {
        self.turn.set(self.turn.get() + 1);
    }

    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    pub(crate) fn frames(&self) -> &RefCell<Vec<MacroFrame>> {
        &self.frames
    }

    // ── Navigation ───────────────────────────────────────────────────────

    pub fn set_navigation_handler(&self, handler: impl Fn(&str) + 'static) {
        *self.on_navigate.borrow_mut() = Some(Box::new(handler));
    }

    pub fn navigate(&self, target: &str) {
        if let Some(handler) = self.on_navigate.borrow().as_ref() {
            handler(target);
        }
    }

    /// Stop all scanning and arrange for `callback` to run once the
    /// outermost render unwinds. A later call replaces an earlier one.
    /// The callback and the `Exit` signal travel together; one without the
    /// other is unrepresentable.
    pub fn set_exit_callback(&self, callback: impl FnOnce() + 'static) {
        *self.exit_callback.borrow_mut() = Some(Box::new(callback));
        self.signal.set(Signal::Exit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{story_runtime, MemoryStore};
    use serde_json::json;

    #[test]
    fn sigils_route_to_the_right_store() {
        let rt = story_runtime(&[]);
        assert!(rt.set_var("$gold", json!(7)));
        assert!(rt.set_var("_i", json!(1)));
        assert_eq!(rt.var("$gold"), Some(json!(7)));
        assert_eq!(rt.var("_i"), Some(json!(1)));
        assert_eq!(rt.story_store().borrow().get("i"), None);
        assert!(!rt.set_var("gold", json!(0)));
        assert!(rt.delete_var("$gold"));
        assert!(!rt.has_var("$gold"));
    }

    #[test]
    fn bare_sigil_is_not_a_variable() {
        let rt = story_runtime(&[]);
        assert!(!rt.set_var("$", json!(1)));
        assert_eq!(rt.var("_"), None);
    }

    #[test]
    fn memory_store_round_trip() {
        let mut store = MemoryStore::default();
        store.set("gold", json!(5));
        assert!(store.has("gold"));
        assert_eq!(store.get("gold"), Some(json!(5)));
        assert!(store.delete("gold"));
        assert!(!store.delete("gold"));
    }
}
