//! Shadow capture: variable snapshots for deferred callbacks.
//!
//! A macro (e.g. `capture`) declares names on its frame; when a handler
//! builds a deferred callback it captures the union of every declared name
//! plus their current values. Running the wrapped callback later installs
//! the snapshot over the live stores, runs the body, folds any writes back
//! into the snapshot, and restores the pre-install values — even on panic,
//! via the guard's `Drop`. Wrappers self-cancel once the runtime's turn
//! counter moves past the turn they were captured on.

use std::collections::BTreeSet;
use std::rc::Rc;

use serde_json::Value;

use crate::state::Runtime;

/// One entry on the runtime's macro invocation stack.
#[derive(Debug, Default)]
pub struct MacroFrame {
    pub name: String,
    /// Sigiled names shadow-declared while this frame is active.
    pub shadows: BTreeSet<String>,
}

impl MacroFrame {
    pub fn new(name: impl Into<String>) -> Self {
        MacroFrame {
            name: name.into(),
            shadows: BTreeSet::new(),
        }
    }
}

/// A snapshot of every shadow-declared variable at capture time.
pub struct ShadowCapture {
    /// Sigiled name paired with its value at capture (or since the last
    /// wrapped run); `None` means unset.
    snapshot: Vec<(String, Option<Value>)>,
    turn: u64,
}

impl ShadowCapture {
    /// Union the declared names across the whole frame stack and snapshot
    /// their current values.
    pub fn capture(rt: &Runtime) -> Self {
        let mut names: BTreeSet<String> = BTreeSet::new();
        for frame in rt.frames().borrow().iter() {
            names.extend(frame.shadows.iter().cloned());
        }
        let snapshot = names
            .into_iter()
            .map(|name| {
                let value = rt.var(&name);
                (name, value)
            })
            .collect();
        ShadowCapture {
            snapshot,
            turn: rt.turn(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }

    /// Wrap `callback` so each run sees the captured values instead of the
    /// live ones. Writes made during a run persist into later runs of the
    /// same wrapper, never into the live stores.
    pub fn wrap(self, rt: &Rc<Runtime>, mut callback: impl FnMut() + 'static) -> impl FnMut() + 'static {
        let rt = Rc::clone(rt);
        let mut snapshot = self.snapshot;
        let turn = self.turn;
        move || {
            if rt.turn() != turn {
                return;
            }
            let _guard = ShadowGuard::install(&rt, &mut snapshot);
            callback();
        }
    }
}

/// Installs a snapshot over the live stores; restores them on drop.
struct ShadowGuard<'a> {
    rt: Rc<Runtime>,
    snapshot: &'a mut Vec<(String, Option<Value>)>,
    saved: Vec<(String, Option<Value>)>,
}

impl<'a> ShadowGuard<'a> {
    fn install(rt: &Rc<Runtime>, snapshot: &'a mut Vec<(String, Option<Value>)>) -> Self {
        let mut saved = Vec::with_capacity(snapshot.len());
        for (name, value) in snapshot.iter() {
            saved.push((name.clone(), rt.var(name)));
            match value {
                Some(v) => {
                    rt.set_var(name, v.clone());
                }
                None => {
                    rt.delete_var(name);
                }
            }
        }
        ShadowGuard {
            rt: Rc::clone(rt),
            snapshot,
            saved,
        }
    }
}

impl Drop for ShadowGuard<'_> {
    fn drop(&mut self) {
        // Fold writes made under the shadow back into the snapshot, then
        // put the live values back.
        for (name, slot) in self.snapshot.iter_mut() {
            *slot = self.rt.var(name);
        }
        for (name, value) in self.saved.drain(..) {
            match value {
                Some(v) => {
                    self.rt.set_var(&name, v);
                }
                None => {
                    self.rt.delete_var(&name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::story_runtime;
    use serde_json::json;
    use std::cell::RefCell;

    fn with_declared(rt: &Rc<Runtime>, names: &[&str]) {
        let mut frame = MacroFrame::new("capture");
        frame.shadows.extend(names.iter().map(|n| n.to_string()));
        rt.frames().borrow_mut().push(frame);
    }

    #[test]
    fn wrapped_callback_sees_captured_values() {
        let rt = story_runtime(&[]);
        with_declared(&rt, &["$x"]);
        rt.set_var("$x", json!(1));
        let capture = ShadowCapture::capture(&rt);
        rt.set_var("$x", json!(2));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut wrapped = {
            let rt2 = Rc::clone(&rt);
            let seen = Rc::clone(&seen);
            capture.wrap(&rt, move || {
                seen.borrow_mut().push(rt2.var("$x"));
            })
        };
        wrapped();
        assert_eq!(*seen.borrow(), vec![Some(json!(1))]);
        // Live store untouched afterwards.
        assert_eq!(rt.var("$x"), Some(json!(2)));
    }

    #[test]
    fn shadow_writes_persist_across_runs_not_into_live_stores() {
        let rt = story_runtime(&[]);
        with_declared(&rt, &["$x"]);
        rt.set_var("$x", json!(0));
        let capture = ShadowCapture::capture(&rt);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut wrapped = {
            let rt2 = Rc::clone(&rt);
            let seen = Rc::clone(&seen);
            capture.wrap(&rt, move || {
                let current = rt2.var("$x").and_then(|v| v.as_i64()).unwrap_or(0);
                seen.borrow_mut().push(current);
                rt2.set_var("$x", json!(current + 10));
            })
        };
        wrapped();
        wrapped();
        wrapped();
        assert_eq!(*seen.borrow(), vec![0, 10, 20]);
        assert_eq!(rt.var("$x"), Some(json!(0)));
    }

    #[test]
    fn unset_shadows_install_as_unset() {
        let rt = story_runtime(&[]);
        with_declared(&rt, &["_t"]);
        let capture = ShadowCapture::capture(&rt);
        rt.set_var("_t", json!("live"));

        let saw_unset = Rc::new(RefCell::new(false));
        let mut wrapped = {
            let rt2 = Rc::clone(&rt);
            let saw = Rc::clone(&saw_unset);
            capture.wrap(&rt, move || {
                *saw.borrow_mut() = rt2.var("_t").is_none();
            })
        };
        wrapped();
        assert!(*saw_unset.borrow());
        assert_eq!(rt.var("_t"), Some(json!("live")));
    }

    #[test]
    fn wrapper_cancels_after_turn_advances() {
        let rt = story_runtime(&[]);
        with_declared(&rt, &["$x"]);
        rt.set_var("$x", json!(1));
        let capture = ShadowCapture::capture(&rt);

        let ran = Rc::new(RefCell::new(false));
        let mut wrapped = {
            let ran = Rc::clone(&ran);
            capture.wrap(&rt, move || {
                *ran.borrow_mut() = true;
            })
        };
        rt.advance_turn();
        wrapped();
        assert!(!*ran.borrow());
    }

    #[test]
    fn capture_unions_nested_frames() {
        let rt = story_runtime(&[]);
        with_declared(&rt, &["$a"]);
        with_declared(&rt, &["$b"]);
        let capture = ShadowCapture::capture(&rt);
        assert!(!capture.is_empty());
        assert_eq!(capture.snapshot.len(), 2);
    }
}
