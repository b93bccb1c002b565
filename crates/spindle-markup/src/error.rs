//! Integrity errors for the markup interpreter.
//!
//! These are *embedding* defects — registry misuse, malformed parser
//! patterns, unknown profiles — and propagate as `Err` values. Authored
//! content never produces a `MarkupError`: malformed markup and failed
//! evaluations become error nodes in the output tree so one broken macro
//! cannot abort the rest of a render.

/// Fatal error raised by the interpreter's registries and dispatch core.
#[derive(Debug, thiserror::Error)]
pub enum MarkupError {
    #[error("registry is frozen: cannot register {name:?}")]
    RegistryFrozen { name: String },

    #[error("macro {name:?} is already registered")]
    MacroExists { name: String },

    #[error("macro name {name:?} collides with a child tag of {parent:?}")]
    NameIsTag { name: String, parent: String },

    #[error("child tag {tag:?} is already a registered macro")]
    TagIsMacro { tag: String },

    #[error("macro {name:?} is not registered")]
    UnknownMacro { name: String },

    #[error("cannot unregister {name:?}: tag {tag:?} is still claimed by {parent:?}")]
    TagStillClaimed {
        name: String,
        tag: String,
        parent: String,
    },

    #[error("alias target {target:?} does not exist")]
    UnknownAliasTarget { target: String },

    #[error("alias chain starting at {name:?} does not resolve")]
    AliasCycle { name: String },

    #[error("macro and tag names must be non-empty")]
    EmptyName,

    #[error("unknown parser profile {name:?}")]
    UnknownProfile { name: String },

    #[error("parser profiles are already compiled")]
    ProfilesCompiled,

    #[error("invalid parser pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Failure reported by a host expression evaluator.
///
/// Carries only a message; the concrete evaluator is an embedding choice
/// and its error detail is opaque to the interpreter.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct EvalError(pub String);

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
