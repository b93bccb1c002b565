//! Macro definitions, aliases, and child-tag bookkeeping.
//!
//! A macro is either a direct definition or an alias onto another name.
//! Aliases resolve through the chain at lookup time and share the target's
//! handler and auxiliary state while keeping their own invoked name. Child
//! tags (`elseif`, `break`, ...) and the automatic closer (`/name`) map back
//! to their parent set, so the wikifier can both collect payloads and
//! reject a child tag invoked outside its parent.
//!
//! The registry freezes when the runtime is built; registration afterwards
//! is an integrity error, not an output marker.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use crate::error::MarkupError;
use crate::macros::context::MacroContext;

pub type MacroHandler = Rc<dyn Fn(&mut MacroContext<'_>) -> Result<(), MarkupError>>;

/// A direct macro definition.
#[derive(Clone)]
pub struct DirectDef {
    pub handler: MacroHandler,
    /// Child tag names, if this is a container macro. `Some(vec![])` means
    /// a container with a closer but no child tags.
    pub tags: Option<Vec<String>>,
    /// When false, raw argument text is kept but never tokenized into
    /// values (the handler evaluates it wholesale).
    pub allows_args: bool,
    /// Auxiliary state shared by the macro and all of its aliases.
    pub state: Rc<RefCell<Value>>,
}

impl DirectDef {
    pub fn new(handler: MacroHandler) -> Self {
        DirectDef {
            handler,
            tags: None,
            allows_args: true,
            state: Rc::new(RefCell::new(Value::Null)),
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = Some(tags.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn container(mut self) -> Self {
        self.tags = Some(Vec::new());
        self
    }

    pub fn raw_args(mut self) -> Self {
        self.allows_args = false;
        self
    }
}

enum MacroDef {
    Direct(DirectDef),
    Alias { target: String },
}

/// The outcome of resolving a name through any alias chain.
#[derive(Clone)]
pub struct ResolvedMacro {
    /// Name of the direct definition the chain landed on.
    pub target: String,
    pub handler: MacroHandler,
    pub tags: Option<Vec<String>>,
    pub allows_args: bool,
    pub state: Rc<RefCell<Value>>,
}

#[derive(Default)]
pub struct MacroRegistry {
    defs: HashMap<String, MacroDef>,
    /// Child tag or closer name to the parents that claim it.
    tags: HashMap<String, Vec<String>>,
    frozen: bool,
}

impl MacroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn exists(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    /// Parents claiming `name` as a child tag or closer.
    pub fn parents_of_tag(&self, name: &str) -> Option<&[String]> {
        self.tags.get(name).map(Vec::as_slice)
    }

    /// Child tags declared by the direct macro `name` (not via aliases).
    pub fn tags_of(&self, name: &str) -> Option<&[String]> {
        match self.defs.get(name) {
            Some(MacroDef::Direct(def)) => def.tags.as_deref(),
            _ => None,
        }
    }

    fn check_name(&self, name: &str) -> Result<(), MarkupError> {
        if name.is_empty() {
            return Err(MarkupError::EmptyName);
        }
        if self.frozen {
            return Err(MarkupError::RegistryFrozen {
                name: name.to_string(),
            });
        }
        if self.defs.contains_key(name) {
            return Err(MarkupError::MacroExists {
                name: name.to_string(),
            });
        }
        if let Some(parents) = self.tags.get(name) {
            return Err(MarkupError::NameIsTag {
                name: name.to_string(),
                parent: parents.first().cloned().unwrap_or_default(),
            });
        }
        Ok(())
    }

    pub fn register(&mut self, name: &str, def: DirectDef) -> Result<(), MarkupError> {
        self.check_name(name)?;
        if let Some(tags) = &def.tags {
            for tag in tags {
                if tag.is_empty() {
                    return Err(MarkupError::EmptyName);
                }
                if self.defs.contains_key(tag) {
                    return Err(MarkupError::TagIsMacro { tag: tag.clone() });
                }
            }
        }
        if let Some(tags) = &def.tags {
            let closer = format!("/{name}");
            for tag in tags.iter().chain(std::iter::once(&closer)) {
                self.tags
                    .entry(tag.clone())
                    .or_default()
                    .push(name.to_string());
            }
        }
        self.defs.insert(name.to_string(), MacroDef::Direct(def));
        Ok(())
    }

    pub fn register_alias(&mut self, name: &str, target: &str) -> Result<(), MarkupError> {
        self.check_name(name)?;
        if !self.defs.contains_key(target) {
            return Err(MarkupError::UnknownAliasTarget {
                target: target.to_string(),
            });
        }
        self.defs.insert(
            name.to_string(),
            MacroDef::Alias {
                target: target.to_string(),
            },
        );
        Ok(())
    }

    /// Remove `name` along with its closer and child-tag claims. Declines
    /// when one of its tags is also claimed by another registered parent.
    pub fn unregister(&mut self, name: &str) -> Result<(), MarkupError> {
        if self.frozen {
            return Err(MarkupError::RegistryFrozen {
                name: name.to_string(),
            });
        }
        let tags = match self.defs.get(name) {
            None => {
                return Err(MarkupError::UnknownMacro {
                    name: name.to_string(),
                })
            }
            Some(MacroDef::Alias { .. }) => None,
            Some(MacroDef::Direct(def)) => def.tags.clone(),
        };
        if let Some(tags) = &tags {
            for tag in tags {
                if let Some(other) = self
                    .tags
                    .get(tag)
                    .and_then(|parents| parents.iter().find(|p| p.as_str() != name))
                {
                    return Err(MarkupError::TagStillClaimed {
                        name: name.to_string(),
                        tag: tag.clone(),
                        parent: other.clone(),
                    });
                }
            }
            let closer = format!("/{name}");
            for tag in tags.iter().chain(std::iter::once(&closer)) {
                if let Some(parents) = self.tags.get_mut(tag) {
                    parents.retain(|p| p != name);
                    if parents.is_empty() {
                        self.tags.remove(tag);
                    }
                }
            }
        }
        self.defs.remove(name);
        Ok(())
    }

    /// Resolve `name` through any alias chain.
    pub fn lookup(&self, name: &str) -> Result<ResolvedMacro, MarkupError> {
        let mut seen: Vec<&str> = Vec::new();
        let mut current = name;
        loop {
            if seen.contains(&current) {
                return Err(MarkupError::AliasCycle {
                    name: name.to_string(),
                });
            }
            seen.push(current);
            match self.defs.get(current) {
                None => {
                    return Err(MarkupError::UnknownMacro {
                        name: current.to_string(),
                    })
                }
                Some(MacroDef::Alias { target }) => current = target,
                Some(MacroDef::Direct(def)) => {
                    return Ok(ResolvedMacro {
                        target: current.to_string(),
                        handler: Rc::clone(&def.handler),
                        tags: def.tags.clone(),
                        allows_args: def.allows_args,
                        state: Rc::clone(&def.state),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> DirectDef {
        DirectDef::new(Rc::new(|_| Ok(())))
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = MacroRegistry::new();
        reg.register("greet", noop()).unwrap();
        let resolved = reg.lookup("greet").unwrap();
        assert_eq!(resolved.target, "greet");
        assert!(resolved.allows_args);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut reg = MacroRegistry::new();
        reg.register("a", noop()).unwrap();
        assert!(matches!(
            reg.register("a", noop()),
            Err(MarkupError::MacroExists { .. })
        ));
        assert!(matches!(reg.register("", noop()), Err(MarkupError::EmptyName)));
    }

    #[test]
    fn alias_chain_resolves_to_shared_state() {
        let mut reg = MacroRegistry::new();
        reg.register("a", noop()).unwrap();
        reg.register_alias("b", "a").unwrap();
        reg.register_alias("c", "b").unwrap();
        let resolved = reg.lookup("c").unwrap();
        assert_eq!(resolved.target, "a");
        assert!(Rc::ptr_eq(&resolved.state, &reg.lookup("a").unwrap().state));
    }

    #[test]
    fn alias_to_missing_target_rejected() {
        let mut reg = MacroRegistry::new();
        assert!(matches!(
            reg.register_alias("b", "a"),
            Err(MarkupError::UnknownAliasTarget { .. })
        ));
    }

    #[test]
    fn tag_bookkeeping_and_collisions() {
        let mut reg = MacroRegistry::new();
        reg.register("cond", noop().with_tags(&["altcond", "otherwise"]))
            .unwrap();
        assert_eq!(reg.parents_of_tag("altcond"), Some(&["cond".to_string()][..]));
        assert_eq!(reg.parents_of_tag("/cond"), Some(&["cond".to_string()][..]));
        // A tag name cannot become a macro, nor vice versa.
        assert!(matches!(
            reg.register("altcond", noop()),
            Err(MarkupError::NameIsTag { .. })
        ));
        assert!(matches!(
            reg.register("other", noop().with_tags(&["cond"])),
            Err(MarkupError::TagIsMacro { .. })
        ));
    }

    #[test]
    fn shared_tags_survive_one_parent_unregistering() {
        let mut reg = MacroRegistry::new();
        reg.register("a", noop().with_tags(&["stop"])).unwrap();
        assert!(matches!(
            reg.register("b", noop().with_tags(&["stop"])),
            Ok(())
        ));
        // "a" cannot go while "b" still claims the tag.
        assert!(matches!(
            reg.unregister("a"),
            Err(MarkupError::TagStillClaimed { .. })
        ));
        reg.unregister("b").unwrap_err(); // symmetric
        // Tag map is intact for both parents.
        assert_eq!(reg.parents_of_tag("stop").map(<[String]>::len), Some(2));
    }

    #[test]
    fn unregister_clears_tag_claims() {
        let mut reg = MacroRegistry::new();
        reg.register("a", noop().with_tags(&["stop"])).unwrap();
        reg.unregister("a").unwrap();
        assert!(reg.parents_of_tag("stop").is_none());
        assert!(reg.parents_of_tag("/a").is_none());
        assert!(!reg.exists("a"));
    }

    #[test]
    fn frozen_registry_rejects_mutation() {
        let mut reg = MacroRegistry::new();
        reg.register("a", noop()).unwrap();
        reg.freeze();
        assert!(matches!(
            reg.register("b", noop()),
            Err(MarkupError::RegistryFrozen { .. })
        ));
        assert!(matches!(
            reg.unregister("a"),
            Err(MarkupError::RegistryFrozen { .. })
        ));
        // Lookup still works.
        assert!(reg.lookup("a").is_ok());
    }
}
