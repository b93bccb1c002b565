//! Renderable output tree.
//!
//! Handlers never produce display strings directly; they append [`Node`]s
//! to an [`OutputSink`] and the embedding renders the finished tree however
//! it likes. Error nodes are ordinary members of the tree: a broken macro
//! or malformed link yields a marker node and rendering continues.

use std::cell::RefCell;
use std::rc::Rc;

pub use crate::bracket::Align;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Node {
    Text {
        text: String,
    },
    LineBreak,
    Link {
        text: String,
        target: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        setter: Option<String>,
        force_internal: bool,
    },
    Image {
        source: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        align: Option<Align>,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        link: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        setter: Option<String>,
    },
    Error {
        message: String,
    },
    Element {
        name: String,
        children: Vec<Node>,
    },
}

impl Node {
    pub fn text(text: impl Into<String>) -> Self {
        Node::Text { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Node::Error {
            message: message.into(),
        }
    }

    fn is_error(&self) -> bool {
        match self {
            Node::Error { .. } => true,
            Node::Element { children, .. } => children.iter().any(Node::is_error),
            _ => false,
        }
    }
}

/// Shared, growable node buffer.
///
/// Cheaply cloneable; clones share the same buffer. Handlers hold one for
/// the section they are rendering into, and deferred callbacks can keep a
/// clone alive past the render that created it.
#[derive(Debug, Clone, Default)]
pub struct OutputSink(Rc<RefCell<Vec<Node>>>);

impl OutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, node: Node) {
        self.0.borrow_mut().push(node);
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Drain the buffer, leaving the sink empty (and still usable).
    pub fn take(&self) -> Vec<Node> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    /// Whether any node in the tree (recursing into elements) is an error
    /// marker.
    pub fn has_error_markers(&self) -> bool {
        self.0.borrow().iter().any(Node::is_error)
    }

    /// Tidy the finished tree: merge adjacent text nodes, collapse runs of
    /// three or more line breaks down to two, and drop breaks at the very
    /// edges. Called once per top-level render, not per nested section.
    pub fn cleanup(&self) {
        let nodes = self.take();
        let mut tidy: Vec<Node> = Vec::with_capacity(nodes.len());
        let mut breaks = 0usize;
        for node in nodes {
            match node {
                Node::LineBreak => {
                    // Edge and over-long runs are dropped.
                    if !tidy.is_empty() && breaks < 2 {
                        tidy.push(Node::LineBreak);
                    }
                    breaks += 1;
                }
                Node::Text { text } => {
                    breaks = 0;
                    match tidy.last_mut() {
                        Some(Node::Text { text: last }) => last.push_str(&text),
                        _ => tidy.push(Node::Text { text }),
                    }
                }
                other => {
                    breaks = 0;
                    tidy.push(other);
                }
            }
        }
        while matches!(tidy.last(), Some(Node::LineBreak)) {
            tidy.pop();
        }
        *self.0.borrow_mut() = tidy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_merges_adjacent_text() {
        let sink = OutputSink::new();
        sink.append(Node::text("a"));
        sink.append(Node::text("b"));
        sink.append(Node::LineBreak);
        sink.append(Node::text("c"));
        sink.cleanup();
        assert_eq!(
            sink.take(),
            vec![Node::text("ab"), Node::LineBreak, Node::text("c")]
        );
    }

    #[test]
    fn cleanup_collapses_break_runs_and_trims_edges() {
        let sink = OutputSink::new();
        sink.append(Node::LineBreak);
        sink.append(Node::text("a"));
        for _ in 0..4 {
            sink.append(Node::LineBreak);
        }
        sink.append(Node::text("b"));
        sink.append(Node::LineBreak);
        sink.cleanup();
        assert_eq!(
            sink.take(),
            vec![
                Node::text("a"),
                Node::LineBreak,
                Node::LineBreak,
                Node::text("b"),
            ]
        );
    }

    #[test]
    fn error_markers_are_found_inside_elements() {
        let sink = OutputSink::new();
        sink.append(Node::Element {
            name: "span".to_string(),
            children: vec![Node::error("boom")],
        });
        assert!(sink.has_error_markers());
    }

    #[test]
    fn clones_share_the_buffer() {
        let sink = OutputSink::new();
        let alias = sink.clone();
        alias.append(Node::text("x"));
        assert_eq!(sink.len(), 1);
    }
}
