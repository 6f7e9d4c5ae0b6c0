//! `.bind(buffer)`: drives an externally-owned [`OrderedBuffer`] from
//! a change-set stream, covering both an unsorted source and a source
//! carrying `Sorted`/`Paged`/`Virtual` ordering, behind one operator that
//! dispatches per batch on
//! [`ChangeSetKind`] rather than as two separate trait methods — a source's
//! "sortedness" is a property of its upstream construction (whether `sort`
//! sits in the chain), so in practice a given `bind` call only ever sees one
//! branch, but nothing stops a host from composing a stream that changes
//! shape, and the dispatch is cheap either way.
//!
//! The adaptor keeps its own `IndexMap<K, V>` mirror of what it believes the
//! bound buffer currently holds. For the unsorted path that mirror's order
//! *is* the buffer's order, and `IndexMap::get_index_of` stands in for a
//! side `K → index` map. For the sorted path,
//! rather than trusting a batch's raw `current_index`/`previous_index`
//! fields for *sequential* application (they are each computed against the
//! batch's final order, not as a true incremental edit script, so applying
//! them one `Change` at a time is not generally safe for a batch touching
//! more than one key), the adaptor re-derives the buffer's target order from
//! `kind().sorted_keys()` — always the complete post-batch order — and
//! reconciles its mirror to that target with a single pass of moves. This is
//! the same "reconcile a mirror to a known target order" shape as
//! `crate::operators::sort::Sort` itself uses against its own cache, just
//! pointed at a second, externally-owned sequence.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use fnv::FnvHashSet;
use indexmap::IndexMap;

use crate::change::ChangeReason;
use crate::change_set::ChangeSetKind;
use crate::config::BindingOptions;
use crate::observable::{ChangeSetObservable, Subscription};

use super::ordered_buffer::OrderedBuffer;

pub trait Bind<K, V> {
    fn bind(&self, buffer: Rc<RefCell<dyn OrderedBuffer<V>>>) -> Subscription;

    fn bind_with_options(&self, buffer: Rc<RefCell<dyn OrderedBuffer<V>>>, options: BindingOptions) -> Subscription;
}

impl<K, V> Bind<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    fn bind(&self, buffer: Rc<RefCell<dyn OrderedBuffer<V>>>) -> Subscription {
        self.bind_with_options(buffer, BindingOptions::default())
    }

    fn bind_with_options(&self, buffer: Rc<RefCell<dyn OrderedBuffer<V>>>, options: BindingOptions) -> Subscription {
        let mirror: Rc<RefCell<IndexMap<K, V>>> = Rc::new(RefCell::new(IndexMap::new()));

        self.subscribe(move |result| {
            let change_set = match result {
                Ok(change_set) => change_set,
                Err(_error) => return,
            };

            let mut mirror = mirror.borrow_mut();
            let mut buffer = buffer.borrow_mut();

            match change_set.kind() {
                ChangeSetKind::Unsorted => apply_unsorted(&mut mirror, buffer.as_mut(), &change_set),
                ChangeSetKind::Sorted { sorted_keys }
                | ChangeSetKind::Paged { sorted_keys, .. }
                | ChangeSetKind::Virtual { sorted_keys, .. } => {
                    apply_sorted(&mut mirror, buffer.as_mut(), &change_set, sorted_keys, options)
                }
            }
        })
    }
}

fn apply_unsorted<K, V>(
    mirror: &mut IndexMap<K, V>,
    buffer: &mut dyn OrderedBuffer<V>,
    change_set: &crate::change_set::ChangeSet<K, V>,
) where
    K: Hash + Eq + Clone,
    V: Clone,
{
    for change in change_set.iter() {
        match change.reason() {
            ChangeReason::Add => {
                let index = mirror.len();
                mirror.insert(change.key().clone(), change.current().clone());
                buffer.insert(index, change.current().clone());
            }
            ChangeReason::Update | ChangeReason::Refresh => {
                if let Some(index) = mirror.get_index_of(change.key()) {
                    mirror.insert(change.key().clone(), change.current().clone());
                    buffer.set(index, change.current().clone());
                }
            }
            ChangeReason::Remove => {
                if let Some(index) = mirror.get_index_of(change.key()) {
                    mirror.shift_remove(change.key());
                    buffer.remove_at(index);
                }
            }
            // An unsorted change set never carries `Moved` (see `change.rs`).
            ChangeReason::Moved => {}
        }
    }
}

fn apply_sorted<K, V>(
    mirror: &mut IndexMap<K, V>,
    buffer: &mut dyn OrderedBuffer<V>,
    change_set: &crate::change_set::ChangeSet<K, V>,
    target_order: &[K],
    options: BindingOptions,
) where
    K: Hash + Eq + Clone,
    V: Clone,
{
    let mut new_keys: FnvHashSet<K> = FnvHashSet::default();
    let mut touched_keys: FnvHashSet<K> = FnvHashSet::default();

    for change in change_set.iter() {
        touched_keys.insert(change.key().clone());
        match change.reason() {
            ChangeReason::Add => {
                mirror.insert(change.key().clone(), change.current().clone());
                new_keys.insert(change.key().clone());
            }
            ChangeReason::Update | ChangeReason::Refresh | ChangeReason::Moved => {
                mirror.insert(change.key().clone(), change.current().clone());
            }
            ChangeReason::Remove => {
                mirror.shift_remove(change.key());
            }
        }
    }

    if change_set.len() >= options.rebuild_threshold {
        rebuild(mirror, buffer, target_order);
        return;
    }

    // Reconcile `mirror`'s order to `target_order`, driving `buffer`
    // identically: a key newly present this batch gets `insert`ed once it
    // reaches its final slot, everything else that moved gets `move_item`ed,
    // and any touched-but-stationary key gets its value refreshed with `set`.
    for (target_index, key) in target_order.iter().enumerate() {
        let current_index = match mirror.get_index_of(key) {
            Some(index) => index,
            None => continue,
        };

        if new_keys.contains(key) {
            if current_index != target_index {
                mirror.move_index(current_index, target_index);
            }
            let value = mirror.get(key).expect("just inserted above").clone();
            buffer.insert(target_index, value);
            continue;
        }

        if current_index != target_index {
            mirror.move_index(current_index, target_index);
            buffer.move_item(current_index, target_index);
        } else if touched_keys.contains(key) {
            let value = mirror.get(key).expect("present in mirror").clone();
            buffer.set(target_index, value);
        }
    }
}

fn rebuild<K, V>(mirror: &mut IndexMap<K, V>, buffer: &mut dyn OrderedBuffer<V>, target_order: &[K])
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    buffer.clear();
    let mut rebuilt = IndexMap::new();
    for (index, key) in target_order.iter().enumerate() {
        let value = mirror.get(key).expect("every target key was synced into the mirror above").clone();
        buffer.insert(index, value.clone());
        rebuilt.insert(key.clone(), value);
    }
    *mirror = rebuilt;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptors::ordered_buffer::VecBuffer;
    use crate::operators::sort::Sort;
    use crate::source_cache::SourceCache;

    fn shared_buffer<V: 'static>() -> (Rc<RefCell<dyn OrderedBuffer<V>>>, Rc<RefCell<VecBuffer<V>>>) {
        let concrete: Rc<RefCell<VecBuffer<V>>> = Rc::new(RefCell::new(VecBuffer::new()));
        let erased: Rc<RefCell<dyn OrderedBuffer<V>>> = concrete.clone();
        (erased, concrete)
    }

    #[test]
    fn unsorted_binding_appends_updates_in_place_and_removes_by_key() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let (erased, buffer) = shared_buffer::<i32>();
        let _subscription = cache.as_observable().bind(erased);

        cache.edit_infallible(|updater| {
            updater.add_or_update("A", 1);
            updater.add_or_update("B", 2);
        });
        assert_eq!(buffer.borrow().items(), &[1, 2]);

        cache.edit_infallible(|updater| updater.add_or_update("A", 10));
        assert_eq!(buffer.borrow().items(), &[10, 2]);

        cache.edit_infallible(|updater| updater.remove("A"));
        assert_eq!(buffer.borrow().items(), &[2]);
    }

    #[test]
    fn sorted_binding_tracks_insertions_and_reordering() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let sorted = cache.as_observable().sort(|a, b| a.cmp(b));
        let (erased, buffer) = shared_buffer::<i32>();
        let _subscription = sorted.bind(erased);

        cache.edit_infallible(|updater| {
            updater.add_or_update("A", 3);
            updater.add_or_update("B", 5);
        });
        assert_eq!(buffer.borrow().items(), &[3, 5]);

        cache.edit_infallible(|updater| updater.add_or_update("C", 1));
        assert_eq!(buffer.borrow().items(), &[1, 3, 5]);

        cache.edit_infallible(|updater| updater.remove("A"));
        assert_eq!(buffer.borrow().items(), &[1, 5]);
    }

    #[test]
    fn a_batch_at_or_above_the_rebuild_threshold_clears_and_reinserts_wholesale() {
        let cache: SourceCache<i32, i32> = SourceCache::new();
        let sorted = cache.as_observable().sort(|a, b| a.cmp(b));
        let (erased, buffer) = shared_buffer::<i32>();
        let _subscription = sorted.bind_with_options(erased, BindingOptions::new(3));

        cache.edit_infallible(|updater| {
            updater.add_or_update(1, 10);
            updater.add_or_update(2, 20);
            updater.add_or_update(3, 30);
        });
        assert_eq!(buffer.borrow().items(), &[10, 20, 30]);
    }
}
