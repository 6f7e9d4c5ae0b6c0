//! `.transform_to_tree(parent_key)`: re-derives a [`crate::node::Tree`]
//! from a flat keyed collection and an item-to-parent-key selector, emitting
//! one `Change<K, Node<K, V>>` per node whose value, parent, or child list
//! actually differs from what was last emitted.
//!
//! The whole tree is rebuilt on every incoming change set (as `Sort` rebuilds
//! its whole order) rather than patched incrementally, since a single
//! re-parenting can ripple through an arbitrary number of sibling lists.

use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::change::{Change, ChangeReason};
use crate::change_set::{ChangeSetBuilder, ChangeSetKind};
use crate::node::{Node, Tree};
use crate::observable::{ChangeSetObservable, ChangeSetResult};

pub trait TransformToTree<K, V> {
    fn transform_to_tree(&self, parent_key: impl Fn(&K, &V) -> Option<K> + 'static) -> ChangeSetObservable<K, Node<K, V>>;
}

impl<K, V> TransformToTree<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn transform_to_tree(&self, parent_key: impl Fn(&K, &V) -> Option<K> + 'static) -> ChangeSetObservable<K, Node<K, V>> {
        let source = self.clone();
        let parent_key = Rc::new(parent_key);
        ChangeSetObservable::new(move |mut observer: Box<dyn FnMut(ChangeSetResult<K, Node<K, V>>)>| {
            let items: Rc<std::cell::RefCell<IndexMap<K, V>>> = Rc::new(std::cell::RefCell::new(IndexMap::new()));
            let previous_nodes: Rc<std::cell::RefCell<IndexMap<K, Node<K, V>>>> =
                Rc::new(std::cell::RefCell::new(IndexMap::new()));
            let parent_key = parent_key.clone();
            source.subscribe(move |result| match result {
                Ok(change_set) => {
                    let mut items = items.borrow_mut();
                    for change in change_set.iter() {
                        match change.reason() {
                            ChangeReason::Add | ChangeReason::Update | ChangeReason::Refresh => {
                                items.insert(change.key().clone(), change.current().clone());
                            }
                            ChangeReason::Remove => {
                                items.shift_remove(change.key());
                            }
                            ChangeReason::Moved => {}
                        }
                    }

                    let tree = Tree::build(items.iter().map(|(k, v)| (k.clone(), v.clone())), |key, value| {
                        parent_key(key, value)
                    });
                    let mut new_nodes: IndexMap<K, Node<K, V>> = IndexMap::new();
                    for key in items.keys() {
                        if let Some(node) = tree.get(key) {
                            new_nodes.insert(key.clone(), node.clone());
                        }
                    }

                    let mut previous_nodes = previous_nodes.borrow_mut();
                    let mut builder = ChangeSetBuilder::new();
                    for (key, node) in new_nodes.iter() {
                        match previous_nodes.get(key) {
                            None => builder.push(Change::add(key.clone(), node.clone())),
                            Some(previous) if previous != node => {
                                builder.push(Change::update(key.clone(), node.clone(), previous.clone()));
                            }
                            Some(_) => {}
                        }
                    }
                    for (key, previous) in previous_nodes.iter() {
                        if !new_nodes.contains_key(key) {
                            builder.push(Change::remove(key.clone(), previous.clone()));
                        }
                    }
                    *previous_nodes = new_nodes;

                    if let Some(set) = builder.build(ChangeSetKind::Unsorted) {
                        observer(Ok(Rc::new(set)));
                    }
                }
                Err(error) => observer(Err(error)),
            })
        })
    }
}
