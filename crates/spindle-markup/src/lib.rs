//! Runtime markup interpreter for the spindle story engine.
//!
//! Interprets passage markup — `[[links]]`, `[img[images]]`, `<<macros>>`,
//! naked `$variable` interpolation — into a renderable output tree. Story
//! state, passage storage, and expression evaluation stay on the embedding
//! side behind the traits in [`state`] and [`scripting`]; the [`testing`]
//! module ships in-memory versions of all three so the crate runs on its
//! own.
//!
//! Typical use:
//!
//! ```
//! use spindle_markup::output::OutputSink;
//! use spindle_markup::testing::story_runtime;
//!
//! let rt = story_runtime(&[]);
//! let sink = OutputSink::new();
//! rt.interpret(&sink, "<<set $gold to 5>>You have $gold coins.", Default::default())
//!     .unwrap();
//! ```

pub mod bracket;
pub mod error;
pub mod lexer;
pub mod macros;
pub mod output;
pub mod scripting;
pub mod state;
pub mod testing;
pub mod wikifier;

pub use error::{EvalError, MarkupError};
pub use output::{Align, Node, OutputSink};
pub use scripting::{desugar, display_value, truthy, Evaluator};
pub use state::{shared_store, PassageSource, Runtime, SharedStore, Signal, VariableStore};
pub use wikifier::{Options, TerminatorMatch, Wikifier};
