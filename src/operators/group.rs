//! `.group(group_key)`: re-keys a collection by a derived group key, where
//! each group's value is itself a small live sub-collection of the original
//! items that currently map to it. `.group_with_immutable_state(group_key)`
//! is the same re-keying with a different shape for the group's value: a
//! fresh, inert snapshot taken on every membership change rather than a
//! handle onto a live sub-collection — useful when a consumer just wants
//! "what's in this group right now" without subscribing to it separately.

use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::cache::ObservableCacheHandle;
use crate::change::{Change, ChangeReason};
use crate::change_set::{ChangeSetBuilder, ChangeSetKind};
use crate::controllers::RegroupController;
use crate::observable::{ChangeSetObservable, ChangeSetResult, Subscription};

/// One group produced by [`Group`]: a cheaply-cloneable handle onto its
/// current members, keyed by the original item key.
pub struct GroupHandle<GK, K, V> {
    group_key: GK,
    members: ObservableCacheHandle<K, V>,
}

impl<GK: Clone, K, V> Clone for GroupHandle<GK, K, V> {
    fn clone(&self) -> Self {
        GroupHandle { group_key: self.group_key.clone(), members: self.members.clone() }
    }
}

/// Two handles are the same group if they carry the same group key — the
/// members living behind them are a separately-observed live sub-collection
/// (see `connect`), not part of the handle's own identity. This is what lets
/// `GroupHandle` sit on the right-hand side of the join family: a join
/// only needs to know *whether* a group's identity changed, not whether
/// its membership did, since membership is its own notification channel.
impl<GK: PartialEq, K, V> PartialEq for GroupHandle<GK, K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.group_key == other.group_key
    }
}

impl<GK, K, V> GroupHandle<GK, K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    pub fn key(&self) -> &GK {
        &self.group_key
    }

    pub fn count(&self) -> usize {
        self.members.count()
    }

    pub fn items(&self) -> Vec<V> {
        self.members.items()
    }

    pub fn key_values(&self) -> Vec<(K, V)> {
        self.members.key_values()
    }

    pub fn connect(&self, observer: impl FnMut(ChangeSetResult<K, V>) + 'static) -> Subscription {
        self.members.connect(observer)
    }
}

/// One group produced by [`GroupWithImmutableState`]: an immutable snapshot
/// of the members that currently map to this group key, taken fresh every
/// time the group's membership changes. Unlike [`GroupHandle`] there is no
/// `connect()` — a caller that wants to react to later membership changes
/// just observes the next emission under the same key.
#[derive(Clone)]
pub struct ImmutableGroup<GK, K, V> {
    group_key: GK,
    members: Rc<IndexMap<K, V>>,
}

impl<GK: PartialEq, K, V> PartialEq for ImmutableGroup<GK, K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.group_key == other.group_key
    }
}

impl<GK, K, V> ImmutableGroup<GK, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn key(&self) -> &GK {
        &self.group_key
    }

    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn items(&self) -> Vec<V> {
        self.members.values().cloned().collect()
    }

    pub fn key_values(&self) -> Vec<(K, V)> {
        self.members.iter().map(|(key, value)| (key.clone(), value.clone())).collect()
    }
}

pub trait GroupWithImmutableState<K, V> {
    /// Equivalent to [`GroupWithImmutableState::group_with_immutable_state_and_controller`]
    /// with a controller the caller never signals.
    fn group_with_immutable_state<GK>(
        &self,
        group_key: impl Fn(&K, &V) -> GK + 'static,
    ) -> ChangeSetObservable<GK, ImmutableGroup<GK, K, V>>
    where
        GK: Hash + Eq + Clone + 'static;

    /// As `group_with_immutable_state`, but a [`RegroupController`] can force
    /// every cached item's group key to be recomputed on demand, the same as
    /// [`Group::group_with_controller`].
    fn group_with_immutable_state_and_controller<GK>(
        &self,
        group_key: impl Fn(&K, &V) -> GK + 'static,
        controller: &RegroupController,
    ) -> ChangeSetObservable<GK, ImmutableGroup<GK, K, V>>
    where
        GK: Hash + Eq + Clone + 'static;
}

/// Drains `group_edits` into a builder of `Add`/`Update`/`Remove` changes
/// over fresh [`ImmutableGroup`] snapshots — every touched group gets a
/// brand new map rather than a mutation of a shared live one.
fn commit_groups_immutable<GK, K, V>(
    groups: &mut IndexMap<GK, IndexMap<K, V>>,
    group_edits: IndexMap<GK, ChangeSetBuilder<K, V>>,
) -> ChangeSetBuilder<GK, ImmutableGroup<GK, K, V>>
where
    GK: Hash + Eq + Clone + 'static,
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    let mut builder = ChangeSetBuilder::new();
    for (key, edits) in group_edits {
        let Some(edit_set) = edits.build_unsorted() else { continue };
        let existed_before = groups.contains_key(&key);
        let members = groups.entry(key.clone()).or_default();
        for change in edit_set.iter() {
            match change.reason() {
                ChangeReason::Add | ChangeReason::Update | ChangeReason::Refresh => {
                    members.insert(change.key().clone(), change.current().clone());
                }
                ChangeReason::Remove => {
                    members.shift_remove(change.key());
                }
                ChangeReason::Moved => {}
            }
        }
        let now_empty = members.is_empty();

        if now_empty {
            let removed = groups.shift_remove(&key).unwrap();
            builder.push(Change::remove(key.clone(), ImmutableGroup { group_key: key, members: Rc::new(removed) }));
        } else {
            let snapshot = Rc::new(members.clone());
            if !existed_before {
                builder.push(Change::add(key.clone(), ImmutableGroup { group_key: key, members: snapshot }));
            } else {
                builder.push(Change::refresh(key.clone(), ImmutableGroup { group_key: key, members: snapshot }));
            }
        }
    }
    builder
}

impl<K, V> GroupWithImmutableState<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    fn group_with_immutable_state<GK>(
        &self,
        group_key: impl Fn(&K, &V) -> GK + 'static,
    ) -> ChangeSetObservable<GK, ImmutableGroup<GK, K, V>>
    where
        GK: Hash + Eq + Clone + 'static,
    {
        self.group_with_immutable_state_and_controller(group_key, &RegroupController::new())
    }

    fn group_with_immutable_state_and_controller<GK>(
        &self,
        group_key: impl Fn(&K, &V) -> GK + 'static,
        controller: &RegroupController,
    ) -> ChangeSetObservable<GK, ImmutableGroup<GK, K, V>>
    where
        GK: Hash + Eq + Clone + 'static,
    {
        let source = self.clone();
        let group_key = Rc::new(group_key);
        let controller = controller.clone();
        ChangeSetObservable::new(move |observer: Box<dyn FnMut(ChangeSetResult<GK, ImmutableGroup<GK, K, V>>)>| {
            let observer: Rc<std::cell::RefCell<Box<dyn FnMut(ChangeSetResult<GK, ImmutableGroup<GK, K, V>>)>>> =
                Rc::new(std::cell::RefCell::new(observer));
            let membership: Rc<std::cell::RefCell<IndexMap<K, GK>>> = Rc::new(std::cell::RefCell::new(IndexMap::new()));
            let groups: Rc<std::cell::RefCell<IndexMap<GK, IndexMap<K, V>>>> = Rc::new(std::cell::RefCell::new(IndexMap::new()));
            let values: Rc<std::cell::RefCell<IndexMap<K, V>>> = Rc::new(std::cell::RefCell::new(IndexMap::new()));

            let membership_for_source = membership.clone();
            let groups_for_source = groups.clone();
            let values_for_source = values.clone();
            let observer_for_source = observer.clone();
            let group_key_for_source = group_key.clone();
            let source_subscription = source.subscribe(move |result| match result {
                Ok(change_set) => {
                    let mut membership = membership_for_source.borrow_mut();
                    let mut groups = groups_for_source.borrow_mut();
                    let mut values = values_for_source.borrow_mut();

                    let mut group_edits: IndexMap<GK, ChangeSetBuilder<K, V>> = IndexMap::new();

                    for change in change_set.iter() {
                        match change.reason() {
                            ChangeReason::Add => {
                                values.insert(change.key().clone(), change.current().clone());
                                let new_key = group_key_for_source(change.key(), change.current());
                                membership.insert(change.key().clone(), new_key.clone());
                                group_edits.entry(new_key).or_default().push(Change::add(change.key().clone(), change.current().clone()));
                            }
                            ChangeReason::Update | ChangeReason::Refresh => {
                                let previous_value = change.previous().cloned().unwrap_or_else(|| change.current().clone());
                                values.insert(change.key().clone(), change.current().clone());
                                let new_key = group_key_for_source(change.key(), change.current());
                                let member_change = if change.reason() == ChangeReason::Update {
                                    Change::update(change.key().clone(), change.current().clone(), previous_value.clone())
                                } else {
                                    Change::refresh(change.key().clone(), change.current().clone())
                                };
                                reassign(change.key(), new_key, member_change, previous_value, &mut membership, &mut group_edits);
                            }
                            ChangeReason::Remove => {
                                values.shift_remove(change.key());
                                if let Some(old_key) = membership.shift_remove(change.key()) {
                                    group_edits
                                        .entry(old_key)
                                        .or_default()
                                        .push(Change::remove(change.key().clone(), change.current().clone()));
                                }
                            }
                            ChangeReason::Moved => {}
                        }
                    }

                    let builder = commit_groups_immutable(&mut groups, group_edits);
                    if let Some(set) = builder.build(ChangeSetKind::Unsorted) {
                        (*observer_for_source.borrow_mut())(Ok(Rc::new(set)));
                    }
                }
                Err(error) => (*observer_for_source.borrow_mut())(Err(match error {
                    crate::error::Error::Callback { cause, .. } => crate::error::Error::Callback { key: None, cause },
                    crate::error::Error::Contract(violation) => crate::error::Error::Contract(violation),
                    crate::error::Error::Disposed => crate::error::Error::Disposed,
                })),
            });

            let membership_for_controller = membership.clone();
            let groups_for_controller = groups.clone();
            let values_for_controller = values.clone();
            let observer_for_controller = observer.clone();
            let group_key_for_controller = group_key.clone();
            let controller_subscription = controller.subscribe(move |()| {
                let mut membership = membership_for_controller.borrow_mut();
                let mut groups = groups_for_controller.borrow_mut();
                let values = values_for_controller.borrow();

                let mut group_edits: IndexMap<GK, ChangeSetBuilder<K, V>> = IndexMap::new();
                for (key, value) in values.iter() {
                    let new_key = group_key_for_controller(key, value);
                    if membership.get(key) == Some(&new_key) {
                        continue;
                    }
                    if let Some(old_key) = membership.get(key).cloned() {
                        group_edits.entry(old_key).or_default().push(Change::remove(key.clone(), value.clone()));
                    }
                    membership.insert(key.clone(), new_key.clone());
                    group_edits.entry(new_key).or_default().push(Change::add(key.clone(), value.clone()));
                }

                let builder = commit_groups_immutable(&mut groups, group_edits);
                if let Some(set) = builder.build(ChangeSetKind::Unsorted) {
                    (*observer_for_controller.borrow_mut())(Ok(Rc::new(set)));
                }
            });

            Subscription::new(move || {
                drop(source_subscription);
                drop(controller_subscription);
            })
        })
    }
}

pub trait Group<K, V> {
    /// Equivalent to [`Group::group_with_controller`] with a controller the
    /// caller never signals.
    fn group<GK>(&self, group_key: impl Fn(&K, &V) -> GK + 'static) -> ChangeSetObservable<GK, GroupHandle<GK, K, V>>
    where
        GK: Hash + Eq + Clone + 'static;

    /// As `group`, but [`RegroupController::regroup`] forces every currently
    /// cached item's group key to be recomputed even though nothing about
    /// the item itself changed upstream — for a `group_key` function that
    /// reads state outside the item.
    fn group_with_controller<GK>(
        &self,
        group_key: impl Fn(&K, &V) -> GK + 'static,
        controller: &RegroupController,
    ) -> ChangeSetObservable<GK, GroupHandle<GK, K, V>>
    where
        GK: Hash + Eq + Clone + 'static;
}

/// Applies one item's net effect (`reason`/`current`/`previous`) to
/// `membership`/`group_edits`, moving it between groups if `new_key` differs
/// from what `membership` last recorded for `key`.
fn reassign<GK, K, V>(
    key: &K,
    new_key: GK,
    member_change: Change<K, V>,
    previous_value: V,
    membership: &mut IndexMap<K, GK>,
    group_edits: &mut IndexMap<GK, ChangeSetBuilder<K, V>>,
) where
    GK: Hash + Eq + Clone,
    K: Hash + Eq + Clone,
    V: Clone,
{
    let old_key = membership.get(key).cloned();
    if old_key.as_ref() == Some(&new_key) {
        group_edits.entry(new_key).or_default().push(member_change);
    } else {
        if let Some(old_key) = old_key {
            group_edits.entry(old_key).or_default().push(Change::remove(key.clone(), previous_value));
        }
        membership.insert(key.clone(), new_key.clone());
        group_edits.entry(new_key).or_default().push(Change::add(key.clone(), member_change.current().clone()));
    }
}

/// Drains `group_edits` into a builder of `Add`/`Remove`/`Refresh` changes
/// over [`GroupHandle`]s, applying each group's accumulated member edits to
/// its [`ObservableCacheHandle`] exactly once.
fn commit_groups<GK, K, V>(
    groups: &mut IndexMap<GK, ObservableCacheHandle<K, V>>,
    group_edits: IndexMap<GK, ChangeSetBuilder<K, V>>,
) -> ChangeSetBuilder<GK, GroupHandle<GK, K, V>>
where
    GK: Hash + Eq + Clone + 'static,
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    let mut builder = ChangeSetBuilder::new();
    for (key, edits) in group_edits {
        let Some(edit_set) = edits.build_unsorted() else { continue };
        let existed_before = groups.contains_key(&key);
        let handle = groups.entry(key.clone()).or_insert_with(ObservableCacheHandle::new);
        handle.apply(Rc::new(edit_set));
        let now_empty = handle.count() == 0;

        if now_empty {
            let removed_handle = groups.shift_remove(&key).unwrap();
            builder.push(Change::remove(key.clone(), GroupHandle { group_key: key, members: removed_handle }));
        } else if !existed_before {
            builder.push(Change::add(key.clone(), GroupHandle { group_key: key, members: handle.clone() }));
        } else {
            builder.push(Change::refresh(key.clone(), GroupHandle { group_key: key, members: handle.clone() }));
        }
    }
    builder
}

impl<K, V> Group<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    fn group<GK>(&self, group_key: impl Fn(&K, &V) -> GK + 'static) -> ChangeSetObservable<GK, GroupHandle<GK, K, V>>
    where
        GK: Hash + Eq + Clone + 'static,
    {
        self.group_with_controller(group_key, &RegroupController::new())
    }

    fn group_with_controller<GK>(
        &self,
        group_key: impl Fn(&K, &V) -> GK + 'static,
        controller: &RegroupController,
    ) -> ChangeSetObservable<GK, GroupHandle<GK, K, V>>
    where
        GK: Hash + Eq + Clone + 'static,
    {
        let source = self.clone();
        let group_key = Rc::new(group_key);
        let controller = controller.clone();
        ChangeSetObservable::new(move |observer: Box<dyn FnMut(ChangeSetResult<GK, GroupHandle<GK, K, V>>)>| {
            let observer: Rc<std::cell::RefCell<Box<dyn FnMut(ChangeSetResult<GK, GroupHandle<GK, K, V>>)>>> =
                Rc::new(std::cell::RefCell::new(observer));
            // Which group key each item currently belongs to, so a later
            // update/removal can find and shrink its old group even after a
            // re-grouping value change.
            let membership: Rc<std::cell::RefCell<IndexMap<K, GK>>> = Rc::new(std::cell::RefCell::new(IndexMap::new()));
            let groups: Rc<std::cell::RefCell<IndexMap<GK, ObservableCacheHandle<K, V>>>> =
                Rc::new(std::cell::RefCell::new(IndexMap::new()));
            // Raw upstream values, independent of grouping, so a regroup
            // signal can re-derive every item's group key on demand.
            let values: Rc<std::cell::RefCell<IndexMap<K, V>>> = Rc::new(std::cell::RefCell::new(IndexMap::new()));

            let membership_for_source = membership.clone();
            let groups_for_source = groups.clone();
            let values_for_source = values.clone();
            let observer_for_source = observer.clone();
            let group_key_for_source = group_key.clone();
            let source_subscription = source.subscribe(move |result| match result {
                Ok(change_set) => {
                    let mut membership = membership_for_source.borrow_mut();
                    let mut groups = groups_for_source.borrow_mut();
                    let mut values = values_for_source.borrow_mut();

                    // Per-group pending member edits, built up first so each
                    // group's `ObservableCacheHandle::apply` is called at
                    // most once per incoming change set.
                    let mut group_edits: IndexMap<GK, ChangeSetBuilder<K, V>> = IndexMap::new();

                    for change in change_set.iter() {
                        match change.reason() {
                            ChangeReason::Add => {
                                values.insert(change.key().clone(), change.current().clone());
                                let new_key = group_key_for_source(change.key(), change.current());
                                membership.insert(change.key().clone(), new_key.clone());
                                group_edits.entry(new_key).or_default().push(Change::add(change.key().clone(), change.current().clone()));
                            }
                            ChangeReason::Update | ChangeReason::Refresh => {
                                let previous_value = change.previous().cloned().unwrap_or_else(|| change.current().clone());
                                values.insert(change.key().clone(), change.current().clone());
                                let new_key = group_key_for_source(change.key(), change.current());
                                let member_change = if change.reason() == ChangeReason::Update {
                                    Change::update(change.key().clone(), change.current().clone(), previous_value.clone())
                                } else {
                                    Change::refresh(change.key().clone(), change.current().clone())
                                };
                                reassign(change.key(), new_key, member_change, previous_value, &mut membership, &mut group_edits);
                            }
                            ChangeReason::Remove => {
                                values.shift_remove(change.key());
                                if let Some(old_key) = membership.shift_remove(change.key()) {
                                    group_edits
                                        .entry(old_key)
                                        .or_default()
                                        .push(Change::remove(change.key().clone(), change.current().clone()));
                                }
                            }
                            ChangeReason::Moved => {}
                        }
                    }

                    let builder = commit_groups(&mut groups, group_edits);
                    if let Some(set) = builder.build(ChangeSetKind::Unsorted) {
                        (*observer_for_source.borrow_mut())(Ok(Rc::new(set)));
                    }
                }
                Err(error) => (*observer_for_source.borrow_mut())(Err(match error {
                    crate::error::Error::Callback { cause, .. } => crate::error::Error::Callback { key: None, cause },
                    crate::error::Error::Contract(violation) => crate::error::Error::Contract(violation),
                    crate::error::Error::Disposed => crate::error::Error::Disposed,
                })),
            });

            // A regroup signal re-derives every cached item's group key,
            // moving it between groups (Remove from old + Add to new) when
            // the key changed, leaving untouched items alone.
            let membership_for_controller = membership.clone();
            let groups_for_controller = groups.clone();
            let values_for_controller = values.clone();
            let observer_for_controller = observer.clone();
            let group_key_for_controller = group_key.clone();
            let controller_subscription = controller.subscribe(move |()| {
                let mut membership = membership_for_controller.borrow_mut();
                let mut groups = groups_for_controller.borrow_mut();
                let values = values_for_controller.borrow();

                // Only items whose group key actually changed get an event;
                // an unchanged key means the member's own group never hears
                // about this regroup pass at all.
                let mut group_edits: IndexMap<GK, ChangeSetBuilder<K, V>> = IndexMap::new();
                for (key, value) in values.iter() {
                    let new_key = group_key_for_controller(key, value);
                    if membership.get(key) == Some(&new_key) {
                        continue;
                    }
                    if let Some(old_key) = membership.get(key).cloned() {
                        group_edits.entry(old_key).or_default().push(Change::remove(key.clone(), value.clone()));
                    }
                    membership.insert(key.clone(), new_key.clone());
                    group_edits.entry(new_key).or_default().push(Change::add(key.clone(), value.clone()));
                }

                let builder = commit_groups(&mut groups, group_edits);
                if let Some(set) = builder.build(ChangeSetKind::Unsorted) {
                    (*observer_for_controller.borrow_mut())(Ok(Rc::new(set)));
                }
            });

            Subscription::new(move || {
                drop(source_subscription);
                drop(controller_subscription);
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source_cache::SourceCache;

    #[test]
    fn group_buckets_items_by_derived_key() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let grouped = cache.as_observable().group(|_key, value| value % 2 == 0);

        let group_keys: Rc<std::cell::RefCell<Vec<bool>>> = Rc::new(std::cell::RefCell::new(Vec::new()));
        let group_keys_clone = group_keys.clone();
        let _subscription = grouped.subscribe(move |result| {
            for change in result.unwrap().iter() {
                if change.reason() == ChangeReason::Add {
                    group_keys_clone.borrow_mut().push(*change.key());
                }
            }
        });

        cache.edit_infallible(|updater| {
            updater.add_or_update("A", 1);
            updater.add_or_update("B", 2);
        });
        assert_eq!(group_keys.borrow().len(), 2);
        assert!(group_keys.borrow().contains(&true));
        assert!(group_keys.borrow().contains(&false));
    }

    #[test]
    fn regrouping_an_item_moves_it_between_groups_and_removes_an_emptied_one() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let grouped = cache.as_observable().group(|_key, value| value % 2 == 0);

        let last_reasons: Rc<std::cell::RefCell<Vec<(bool, ChangeReason)>>> = Rc::new(std::cell::RefCell::new(Vec::new()));
        let last_reasons_clone = last_reasons.clone();
        let _subscription = grouped.subscribe(move |result| {
            last_reasons_clone.borrow_mut().clear();
            for change in result.unwrap().iter() {
                last_reasons_clone.borrow_mut().push((*change.key(), change.reason()));
            }
        });

        cache.edit_infallible(|updater| updater.add_or_update("A", 1));
        cache.edit_infallible(|updater| updater.add_or_update("A", 2));

        let reasons = last_reasons.borrow();
        assert!(reasons.contains(&(false, ChangeReason::Remove)));
        assert!(reasons.contains(&(true, ChangeReason::Add)));
    }

    #[test]
    fn firing_the_regroup_controller_reassigns_every_cached_item() {
        use std::cell::Cell;

        let cache: SourceCache<&str, i32> = SourceCache::new();
        let parity_flips = Rc::new(Cell::new(false));
        let parity_flips_for_key = parity_flips.clone();
        let controller = RegroupController::new();
        let grouped = cache.as_observable().group_with_controller(
            move |_key, value| (value % 2 == 0) != parity_flips_for_key.get(),
            &controller,
        );

        let last_reasons: Rc<std::cell::RefCell<Vec<(bool, ChangeReason)>>> = Rc::new(std::cell::RefCell::new(Vec::new()));
        let last_reasons_clone = last_reasons.clone();
        let _subscription = grouped.subscribe(move |result| {
            last_reasons_clone.borrow_mut().clear();
            for change in result.unwrap().iter() {
                last_reasons_clone.borrow_mut().push((*change.key(), change.reason()));
            }
        });

        cache.edit_infallible(|updater| {
            updater.add_or_update("A", 1);
            updater.add_or_update("B", 2);
        });

        parity_flips.set(true);
        controller.regroup();

        let reasons = last_reasons.borrow();
        assert!(reasons.contains(&(true, ChangeReason::Remove)));
        assert!(reasons.contains(&(false, ChangeReason::Remove)));
        assert!(reasons.contains(&(false, ChangeReason::Add)));
        assert!(reasons.contains(&(true, ChangeReason::Add)));
    }

    #[test]
    fn immutable_group_emissions_are_a_fresh_snapshot_each_time() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let grouped = cache.as_observable().group_with_immutable_state(|_key, value| value % 2 == 0);

        let snapshots: Rc<std::cell::RefCell<Vec<(bool, ChangeReason, Vec<i32>)>>> = Rc::new(std::cell::RefCell::new(Vec::new()));
        let snapshots_clone = snapshots.clone();
        let _subscription = grouped.subscribe(move |result| {
            for change in result.unwrap().iter() {
                let mut items = change.current().items();
                items.sort();
                snapshots_clone.borrow_mut().push((*change.key(), change.reason(), items));
            }
        });

        cache.edit_infallible(|updater| {
            updater.add_or_update("A", 2);
            updater.add_or_update("B", 4);
        });
        let first_snapshot = {
            let snapshots = snapshots.borrow();
            let (_, _, items) = snapshots.iter().find(|(key, ..)| *key).unwrap();
            items.clone()
        };
        assert_eq!(first_snapshot, vec![2, 4]);

        snapshots.borrow_mut().clear();
        cache.edit_infallible(|updater| updater.add_or_update("C", 6));
        let snapshots = snapshots.borrow();
        let (_, reason, items) = snapshots.iter().find(|(key, ..)| *key).unwrap();
        assert_eq!(*reason, ChangeReason::Refresh);
        assert_eq!(items, &vec![2, 4, 6]);
        // the earlier snapshot's contents are untouched by this later emission.
        assert_eq!(first_snapshot, vec![2, 4]);
    }
}
