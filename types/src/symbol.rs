//! Document symbols (section titles, directives, ...) reported by the engine.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::position::Range;

/// Symbol kind using the editor-protocol numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolKind(pub u32);

impl SymbolKind {
    pub const FILE: Self = Self(1);
    pub const MODULE: Self = Self(2);
    pub const NAMESPACE: Self = Self(3);
    pub const CLASS: Self = Self(5);
    pub const FUNCTION: Self = Self(12);
    pub const STRING: Self = Self(15);
    pub const OBJECT: Self = Self(19);
}

/// One symbol in a document, flat form with a parent link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Symbol {
    /// Identifier unique within the document.
    pub id: i64,
    pub name: String,
    pub kind: SymbolKind,
    #[serde(default)]
    pub detail: String,
    pub range: Range,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    /// Position among siblings.
    #[serde(default)]
    pub order_id: i64,
}

/// A symbol together with the document it lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedSymbol {
    pub uri: Url,
    pub symbol: Symbol,
}

/// A symbol with its children, ordered by `order_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolNode {
    pub symbol: Symbol,
    pub children: Vec<SymbolNode>,
}

impl SymbolNode {
    /// Total number of symbols in this subtree, including the root.
    #[must_use]
    pub fn subtree_size(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(SymbolNode::subtree_size)
            .sum::<usize>()
    }
}
