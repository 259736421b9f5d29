//! Taxonomy collaborator
//!
//! Index building and classification only need two questions answered by a
//! taxonomy: what a node is, and where two nodes meet. [`Taxonomy`] captures
//! exactly that so callers can plug in whatever tree they already hold.
//! [`TaxTree`] is a small in-memory implementation.

use std::collections::HashMap;

use auto_impl::auto_impl;

/// A single node of a taxonomy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxNode {
    pub tax_id: String,
    /// Parent id; the root is its own parent
    pub parent: String,
    pub rank: String,
    pub name: String,
}

/// Read access to a taxonomy
#[auto_impl(&, Box, Arc)]
pub trait Taxonomy: Send + Sync {
    /// Looks up a node by its taxon id
    fn node(&self, tax_id: &str) -> Option<TaxNode>;

    /// The deepest node that is an ancestor of (or equal to) both `a` and `b`
    ///
    /// Returns `None` when either id is unknown or the ids share no ancestor.
    fn least_common_ancestor(&self, a: &str, b: &str) -> Option<String>;
}

/// An in-memory taxonomy keyed by taxon id
#[derive(Debug, Clone, Default)]
pub struct TaxTree {
    nodes: HashMap<String, TaxNode>,
}
impl TaxTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a node
    pub fn insert(&mut self, tax_id: &str, parent: &str, rank: &str, name: &str) {
        self.nodes.insert(
            tax_id.to_string(),
            TaxNode {
                tax_id: tax_id.to_string(),
                parent: parent.to_string(),
                rank: rank.to_string(),
                name: name.to_string(),
            },
        );
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids from `tax_id` up to the root, both included
    ///
    /// Stops at the first unknown parent or repeated id, so a malformed tree
    /// cannot loop forever.
    #[must_use]
    pub fn ancestors(&self, tax_id: &str) -> Vec<&str> {
        let mut path: Vec<&str> = Vec::new();
        let mut current = self.nodes.get(tax_id);
        while let Some(node) = current {
            if path.contains(&node.tax_id.as_str()) {
                break;
            }
            path.push(&node.tax_id);
            current = self.nodes.get(&node.parent);
        }
        path
    }
}
impl Taxonomy for TaxTree {
    fn node(&self, tax_id: &str) -> Option<TaxNode> {
        self.nodes.get(tax_id).cloned()
    }

    fn least_common_ancestor(&self, a: &str, b: &str) -> Option<String> {
        if a == b {
            return self.nodes.contains_key(a).then(|| a.to_string());
        }
        let left = self.ancestors(a);
        self.ancestors(b)
            .into_iter()
            .find(|id| left.contains(id))
            .map(str::to_string)
    }
}
