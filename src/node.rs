//! `Node<K, V>`: an arena-keyed tree node used by `transform_to_tree`.
//!
//! Parents are referenced by key, not by a `Rc<RefCell<Node>>` back-pointer,
//! avoiding a direct object cycle — children hold a parent's key, never a
//! strong reference to the parent itself.

use std::hash::Hash;

use indexmap::IndexMap;

/// One node in a tree rooted at items with no (or an unresolved) parent key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<K, V> {
    pub key: K,
    pub value: V,
    pub parent: Option<K>,
    pub children: Vec<K>,
}

/// A flattened tree: every node keyed by its own key, plus the root keys (no
/// parent, or a parent key not present in the collection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree<K, V> {
    nodes: IndexMap<K, Node<K, V>>,
    roots: Vec<K>,
}

impl<K: Hash + Eq + Clone, V> Tree<K, V> {
    /// Builds a tree from a flat key/value/parent-key iterator. `parent_of`
    /// returns the parent key for an item, if any.
    pub fn build(items: impl IntoIterator<Item = (K, V)>, parent_of: impl Fn(&K, &V) -> Option<K>) -> Self {
        let mut nodes: IndexMap<K, Node<K, V>> = IndexMap::new();
        for (key, value) in items {
            let parent = parent_of(&key, &value);
            nodes.insert(key.clone(), Node { key, value, parent, children: Vec::new() });
        }

        let keys: Vec<K> = nodes.keys().cloned().collect();
        let mut roots = Vec::new();
        for key in &keys {
            let parent = nodes[key].parent.clone();
            match parent {
                Some(parent_key) if nodes.contains_key(&parent_key) => {
                    nodes[&parent_key].children.push(key.clone());
                }
                _ => roots.push(key.clone()),
            }
        }
        Tree { nodes, roots }
    }

    pub fn get(&self, key: &K) -> Option<&Node<K, V>> {
        self.nodes.get(key)
    }

    pub fn roots(&self) -> &[K] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first pre-order walk starting at the roots.
    pub fn walk(&self) -> Vec<&Node<K, V>> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<&K> = self.roots.iter().rev().collect();
        while let Some(key) = stack.pop() {
            if let Some(node) = self.nodes.get(key) {
                out.push(node);
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_groups_children_under_their_parent_and_roots_by_missing_parent() {
        let items = vec![("a", 1), ("b", 2), ("c", 3)];
        let tree = Tree::build(items, |key, _| match *key {
            "b" => Some("a"),
            "c" => Some("a"),
            _ => None,
        });
        assert_eq!(tree.roots(), &["a"]);
        assert_eq!(tree.get(&"a").unwrap().children, vec!["b", "c"]);
    }

    #[test]
    fn an_orphaned_parent_reference_demotes_the_item_to_a_root() {
        let items = vec![("a", 1), ("b", 2)];
        let tree = Tree::build(items, |key, _| if *key == "b" { Some("missing") } else { None });
        assert_eq!(tree.roots(), &["a", "b"]);
    }
}
