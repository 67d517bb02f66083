//! The semantic AST produced by shaping a successful parse.
//!
//! Nodes are owned, recursive, and never mutated after the parser
//! returns them. Children come in two shapes: an ordered list, or a
//! map keyed by the names the grammar assigned to sequence parts
//! (`ast: { name: … }`), operator-structure slots (`op`, `left`,
//! `right`), or `map_children` keys. The two shapes are kept as
//! distinct variants instead of being coerced into one another.

use serde_json::Value;
use std::collections::BTreeMap;

/// A single AST node.
///
/// `text` is the covered source slice for leaves, default nodes, and
/// `map_children` nodes; operator-structure nodes (`binary_op`) carry
/// no text. `value` is present on leaves whose grammar carried a
/// `type` coercion, and on token leaves (where it defaults to the
/// token text).
#[derive(Debug, Clone, PartialEq)]
pub struct AstNode {
    pub tag: String,
    pub text: Option<String>,
    pub line: usize,
    pub col: usize,
    pub value: Option<Value>,
    pub children: Children,
}

/// The children of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Children {
    /// A leaf; nothing below this node.
    None,
    /// Ordered children, discarded slots already removed.
    List(Vec<AstNode>),
    /// Keyed children from named sequence parts, `map_children`, or
    /// an operator structure.
    Named(BTreeMap<String, AstValue>),
}

/// A shaped value: either one node or a spliced list of nodes.
///
/// Lists arise from `promote` on sequences and quantifiers; the root
/// of a parse can therefore be a list as well as a single node.
#[derive(Debug, Clone, PartialEq)]
pub enum AstValue {
    Node(AstNode),
    List(Vec<AstNode>),
}

impl AstNode {
    /// A leaf node covering `text` at the given position.
    pub fn leaf(tag: impl Into<String>, text: impl Into<String>, line: usize, col: usize) -> Self {
        AstNode {
            tag: tag.into(),
            text: Some(text.into()),
            line,
            col,
            value: None,
            children: Children::None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// An interior node with ordered children.
    pub fn branch(
        tag: impl Into<String>,
        text: impl Into<String>,
        line: usize,
        col: usize,
        children: Vec<AstNode>,
    ) -> Self {
        AstNode {
            tag: tag.into(),
            text: Some(text.into()),
            line,
            col,
            value: None,
            children: Children::List(children),
        }
    }

    /// The named child under `key`, when `children` is keyed and the
    /// key holds a single node.
    pub fn named(&self, key: &str) -> Option<&AstNode> {
        match &self.children {
            Children::Named(map) => match map.get(key) {
                Some(AstValue::Node(node)) => Some(node),
                _ => None,
            },
            _ => None,
        }
    }

    /// The ordered children, when `children` is a list.
    pub fn list(&self) -> Option<&[AstNode]> {
        match &self.children {
            Children::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.children, Children::None)
    }
}

impl AstValue {
    /// The single node, when this value is not a list.
    pub fn as_node(&self) -> Option<&AstNode> {
        match self {
            AstValue::Node(node) => Some(node),
            AstValue::List(_) => None,
        }
    }

    /// All nodes in this value, in order.
    pub fn nodes(&self) -> Vec<&AstNode> {
        match self {
            AstValue::Node(node) => vec![node],
            AstValue::List(items) => items.iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn leaf_accessors() {
        let leaf = AstNode::leaf("number", "42", 1, 3).with_value(json!(42));
        assert!(leaf.is_leaf());
        assert_eq!(leaf.text.as_deref(), Some("42"));
        assert_eq!(leaf.value, Some(json!(42)));
    }

    #[test]
    fn named_lookup_only_on_keyed_children() {
        let mut map = BTreeMap::new();
        map.insert(
            "repo".to_string(),
            AstValue::Node(AstNode::leaf("path", "/a/b", 1, 7)),
        );
        let node = AstNode {
            tag: "clone".to_string(),
            text: Some("CLONE /a/b".to_string()),
            line: 1,
            col: 1,
            value: None,
            children: Children::Named(map),
        };
        assert_eq!(node.named("repo").unwrap().text.as_deref(), Some("/a/b"));
        assert!(node.named("dest").is_none());
        assert!(node.list().is_none());
    }
}
