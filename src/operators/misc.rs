//! Small, ambient utility operators: `Batch`, `BatchIf`, `ChangeKey`,
//! `ForEachChange`, `IgnoreUpdateWhen`, `QueryWhenChanged`,
//! `WhereReasonsAre`/`WhereReasonsAreNot`. Each is a thin, general-purpose
//! building block rather than a bespoke state machine — `Batch` reuses
//! [`EditAccumulator`](crate::consolidation) wholesale (a batch window is
//! just an edit scope spanning several upstream change sets instead of
//! several `edit()` calls), and the reason/update gates are specialisations
//! of the same per-change pass-through shape `Filter` uses.

use std::cell::RefCell;
use std::collections::HashSet;
use std::hash::Hash;
use std::rc::Rc;
use std::time::Duration;

use crate::change::{Change, ChangeReason};
use crate::change_set::{ChangeSet, ChangeSetBuilder, ChangeSetKind};
use crate::consolidation::EditAccumulator;
use crate::controllers::PauseController;
use crate::observable::{ChangeSetObservable, ChangeSetResult, Subscription};
use crate::scheduler::Scheduler;

/// `.batch(duration, scheduler)`: coalesces every change arriving within
/// a rolling `duration` window into a single consolidated change set, using
/// the same net-effect folding a `SourceCache` edit scope applies to
/// multiple `addOrUpdate`/`remove`/`refresh` calls — here the "calls" are the
/// individual [`Change`]s of however many upstream change sets land before
/// the window's timer fires.
pub trait Batch<K, V> {
    fn batch(&self, duration: Duration, scheduler: Rc<dyn Scheduler>) -> ChangeSetObservable<K, V>;
}

impl<K, V> Batch<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    fn batch(&self, duration: Duration, scheduler: Rc<dyn Scheduler>) -> ChangeSetObservable<K, V> {
        let source = self.clone();
        ChangeSetObservable::new(move |observer: Box<dyn FnMut(ChangeSetResult<K, V>)>| {
            let observer: Rc<RefCell<Box<dyn FnMut(ChangeSetResult<K, V>)>>> = Rc::new(RefCell::new(observer));
            let accumulator: Rc<RefCell<Option<EditAccumulator<K, V>>>> = Rc::new(RefCell::new(None));
            let timer: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

            let source_subscription = {
                let accumulator = accumulator.clone();
                let observer = observer.clone();
                let timer = timer.clone();
                let scheduler = scheduler.clone();
                source.subscribe(move |result| match result {
                    Ok(change_set) => {
                        let starting_window = accumulator.borrow().is_none();
                        {
                            let mut slot = accumulator.borrow_mut();
                            let accumulator = slot.get_or_insert_with(EditAccumulator::new);
                            for change in change_set.iter() {
                                match change.reason() {
                                    ChangeReason::Add => {
                                        accumulator.add_or_update(change.key().clone(), change.current().clone(), || None);
                                    }
                                    ChangeReason::Update => {
                                        let previous = change.previous().cloned();
                                        accumulator.add_or_update(change.key().clone(), change.current().clone(), || previous);
                                    }
                                    ChangeReason::Remove => {
                                        let existing = change.current().clone();
                                        accumulator.remove(change.key().clone(), || Some(existing));
                                    }
                                    ChangeReason::Refresh => {
                                        let existing = change.current().clone();
                                        accumulator.refresh(change.key().clone(), || Some(existing));
                                    }
                                    // A batch window has no ordering of its own; a sorted
                                    // upstream's position churn doesn't apply here.
                                    ChangeReason::Moved => {}
                                }
                            }
                        }
                        if starting_window {
                            let accumulator = accumulator.clone();
                            let observer = observer.clone();
                            let timer_handle = timer.clone();
                            *timer.borrow_mut() = Some(scheduler.schedule_after(
                                duration,
                                Box::new(move || flush(&accumulator, &observer, &timer_handle)),
                            ));
                        }
                    }
                    Err(error) => (*observer.borrow_mut())(Err(error)),
                })
            };

            Subscription::new(move || {
                drop(source_subscription);
                timer.borrow_mut().take();
            })
        })
    }
}

fn flush<K, V>(
    accumulator: &Rc<RefCell<Option<EditAccumulator<K, V>>>>,
    observer: &Rc<RefCell<Box<dyn FnMut(ChangeSetResult<K, V>)>>>,
    timer: &Rc<RefCell<Option<Subscription>>>,
) where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    timer.borrow_mut().take();
    if let Some(accumulator) = accumulator.borrow_mut().take() {
        if let Some(set) = accumulator.finish() {
            (*observer.borrow_mut())(Ok(Rc::new(set)));
        }
    }
}

/// `.batch_if(controller)`: like [`Batch::batch`], but the window is driven
/// by an explicit pause/resume signal rather than a rolling duration —
/// changes accumulate while `controller` is paused and flush as one
/// consolidated change set the moment it resumes. A change set arriving
/// while unpaused passes straight through.
pub trait BatchIf<K, V> {
    fn batch_if(&self, controller: &PauseController) -> ChangeSetObservable<K, V>;
}

impl<K, V> BatchIf<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    fn batch_if(&self, controller: &PauseController) -> ChangeSetObservable<K, V> {
        let source = self.clone();
        let controller = controller.clone();
        ChangeSetObservable::new(move |observer: Box<dyn FnMut(ChangeSetResult<K, V>)>| {
            let observer: Rc<RefCell<Box<dyn FnMut(ChangeSetResult<K, V>)>>> = Rc::new(RefCell::new(observer));
            let accumulator: Rc<RefCell<Option<EditAccumulator<K, V>>>> = Rc::new(RefCell::new(None));

            let accumulator_for_source = accumulator.clone();
            let observer_for_source = observer.clone();
            let controller_for_source = controller.clone();
            let source_subscription = source.subscribe(move |result| match result {
                Ok(change_set) => {
                    if controller_for_source.is_paused() {
                        let mut slot = accumulator_for_source.borrow_mut();
                        let accumulator = slot.get_or_insert_with(EditAccumulator::new);
                        fold_into(accumulator, &change_set);
                    } else {
                        (*observer_for_source.borrow_mut())(Ok(change_set));
                    }
                }
                Err(error) => (*observer_for_source.borrow_mut())(Err(error)),
            });

            let accumulator_for_controller = accumulator.clone();
            let observer_for_controller = observer.clone();
            let controller_subscription = controller.subscribe(move |paused| {
                if !paused {
                    if let Some(accumulator) = accumulator_for_controller.borrow_mut().take() {
                        if let Some(set) = accumulator.finish() {
                            (*observer_for_controller.borrow_mut())(Ok(Rc::new(set)));
                        }
                    }
                }
            });

            Subscription::new(move || {
                drop(source_subscription);
                drop(controller_subscription);
            })
        })
    }
}

fn fold_into<K, V>(accumulator: &mut EditAccumulator<K, V>, change_set: &ChangeSet<K, V>)
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    for change in change_set.iter() {
        match change.reason() {
            ChangeReason::Add => {
                accumulator.add_or_update(change.key().clone(), change.current().clone(), || None);
            }
            ChangeReason::Update => {
                let previous = change.previous().cloned();
                accumulator.add_or_update(change.key().clone(), change.current().clone(), || previous);
            }
            ChangeReason::Remove => {
                let existing = change.current().clone();
                accumulator.remove(change.key().clone(), || Some(existing));
            }
            ChangeReason::Refresh => {
                let existing = change.current().clone();
                accumulator.refresh(change.key().clone(), || Some(existing));
            }
            ChangeReason::Moved => {}
        }
    }
}

/// `.change_key(key_fn)`: re-keys every change via a total function
/// of the old key and current value. Used internally by the join family and
/// tree transform to re-home a stream under a foreign key before combining
/// it with another.
pub trait ChangeKey<K, V> {
    fn change_key<K2>(&self, key_fn: impl Fn(&K, &V) -> K2 + 'static) -> ChangeSetObservable<K2, V>
    where
        K2: Hash + Eq + Clone + 'static;
}

impl<K, V> ChangeKey<K, V> for ChangeSetObservable<K, V>
where
    K: 'static,
    V: Clone + 'static,
{
    fn change_key<K2>(&self, key_fn: impl Fn(&K, &V) -> K2 + 'static) -> ChangeSetObservable<K2, V>
    where
        K2: Hash + Eq + Clone + 'static,
    {
        let source = self.clone();
        let key_fn = Rc::new(key_fn);
        ChangeSetObservable::new(move |mut observer: Box<dyn FnMut(ChangeSetResult<K2, V>)>| {
            let key_fn = key_fn.clone();
            source.subscribe(move |result| match result {
                Ok(change_set) => {
                    let mut builder = ChangeSetBuilder::with_capacity(change_set.len());
                    for change in change_set.iter() {
                        let new_key = key_fn(change.key(), change.current());
                        let rekeyed = match change.reason() {
                            ChangeReason::Add => Change::add(new_key, change.current().clone()),
                            ChangeReason::Update => {
                                Change::update(new_key, change.current().clone(), change.previous().cloned().expect("update carries previous"))
                            }
                            ChangeReason::Remove => Change::remove(new_key, change.current().clone()),
                            ChangeReason::Refresh => Change::refresh(new_key, change.current().clone()),
                            ChangeReason::Moved => Change::moved(
                                new_key,
                                change.current().clone(),
                                change.current_index().expect("moved carries current index"),
                                change.previous_index().expect("moved carries previous index"),
                            ),
                        };
                        builder.push(rekeyed);
                    }
                    if let Some(set) = builder.build_unsorted() {
                        observer(Ok(Rc::new(set)));
                    }
                }
                // The key type changes across this operator, so a `Callback`
                // error's offending key can't be carried over verbatim; it is
                // dropped rather than mistranslated.
                Err(error) => observer(Err(match error {
                    crate::error::Error::Callback { cause, .. } => crate::error::Error::Callback { key: None, cause },
                    crate::error::Error::Contract(violation) => crate::error::Error::Contract(violation),
                    crate::error::Error::Disposed => crate::error::Error::Disposed,
                })),
            })
        })
    }
}

/// `.for_each_change(callback)`: a terminal sink invoking `callback`
/// once per [`Change`] in every emitted batch, in order. The simplest
/// possible adaptor — no `OrderedBuffer`, no accumulated cache.
pub trait ForEachChange<K, V> {
    fn for_each_change(&self, callback: impl FnMut(&Change<K, V>) + 'static) -> Subscription;
}

impl<K, V> ForEachChange<K, V> for ChangeSetObservable<K, V>
where
    K: 'static,
    V: 'static,
{
    fn for_each_change(&self, mut callback: impl FnMut(&Change<K, V>) + 'static) -> Subscription {
        self.subscribe(move |result| {
            if let Ok(change_set) = result {
                for change in change_set.iter() {
                    callback(change);
                }
            }
        })
    }
}

/// `.ignore_update_when(predicate)` / `.include_update_when(predicate)`:
/// per-`Update`-change gates that see both `previous` and `current`
/// without re-deriving membership the way `Filter` does — every other
/// reason passes through untouched.
pub trait IgnoreUpdateWhen<K, V> {
    /// Drops an `Update` change when `predicate(previous, current)` is true.
    fn ignore_update_when(&self, predicate: impl Fn(&V, &V) -> bool + 'static) -> ChangeSetObservable<K, V>;

    /// Keeps an `Update` change only when `predicate(previous, current)` is
    /// true; the complement of [`IgnoreUpdateWhen::ignore_update_when`].
    fn include_update_when(&self, predicate: impl Fn(&V, &V) -> bool + 'static) -> ChangeSetObservable<K, V>
    where
        Self: Sized,
        V: 'static,
    {
        self.ignore_update_when(move |previous, current| !predicate(previous, current))
    }
}

impl<K, V> IgnoreUpdateWhen<K, V> for ChangeSetObservable<K, V>
where
    K: Clone + 'static,
    V: Clone + 'static,
{
    fn ignore_update_when(&self, predicate: impl Fn(&V, &V) -> bool + 'static) -> ChangeSetObservable<K, V> {
        let source = self.clone();
        let predicate = Rc::new(predicate);
        ChangeSetObservable::new(move |mut observer: Box<dyn FnMut(ChangeSetResult<K, V>)>| {
            let predicate = predicate.clone();
            source.subscribe(move |result| match result {
                Ok(change_set) => {
                    let mut builder = ChangeSetBuilder::with_capacity(change_set.len());
                    for change in change_set.iter() {
                        if change.reason() == ChangeReason::Update {
                            let previous = change.previous().expect("update carries previous");
                            if predicate(previous, change.current()) {
                                continue;
                            }
                        }
                        builder.push(change.clone());
                    }
                    if let Some(set) = builder.build(change_set.kind().clone()) {
                        observer(Ok(Rc::new(set)));
                    }
                }
                Err(error) => observer(Err(error)),
            })
        })
    }
}

/// `.query_when_changed(selector)`: suppresses an `Update` whose
/// projection (`selector(current)`) is unchanged from `selector(previous)` —
/// useful when a downstream only cares about part of a wide value and the
/// rest of it churns more often than that part does.
pub trait QueryWhenChanged<K, V> {
    fn query_when_changed<P: PartialEq>(&self, selector: impl Fn(&V) -> P + 'static) -> ChangeSetObservable<K, V>;
}

impl<K, V> QueryWhenChanged<K, V> for ChangeSetObservable<K, V>
where
    K: Clone + 'static,
    V: Clone + 'static,
{
    fn query_when_changed<P: PartialEq>(&self, selector: impl Fn(&V) -> P + 'static) -> ChangeSetObservable<K, V> {
        self.ignore_update_when(move |previous, current| selector(previous) == selector(current))
    }
}

/// `.where_reasons_are(reasons)` / `.where_reasons_are_not(reasons)`:
/// trivial reason-set filters over an already-built change set.
pub trait WhereReasonsAre<K, V> {
    fn where_reasons_are(&self, reasons: HashSet<ChangeReason>) -> ChangeSetObservable<K, V>;
}

impl<K, V> WhereReasonsAre<K, V> for ChangeSetObservable<K, V>
where
    K: Clone + 'static,
    V: Clone + 'static,
{
    fn where_reasons_are(&self, reasons: HashSet<ChangeReason>) -> ChangeSetObservable<K, V> {
        reason_filter(self, move |reason| reasons.contains(&reason))
    }
}

pub trait WhereReasonsAreNot<K, V> {
    fn where_reasons_are_not(&self, reasons: HashSet<ChangeReason>) -> ChangeSetObservable<K, V>;
}

impl<K, V> WhereReasonsAreNot<K, V> for ChangeSetObservable<K, V>
where
    K: Clone + 'static,
    V: Clone + 'static,
{
    fn where_reasons_are_not(&self, reasons: HashSet<ChangeReason>) -> ChangeSetObservable<K, V> {
        reason_filter(self, move |reason| !reasons.contains(&reason))
    }
}

fn reason_filter<K, V>(
    source: &ChangeSetObservable<K, V>,
    keep: impl Fn(ChangeReason) -> bool + 'static,
) -> ChangeSetObservable<K, V>
where
    K: Clone + 'static,
    V: Clone + 'static,
{
    let source = source.clone();
    ChangeSetObservable::new(move |mut observer: Box<dyn FnMut(ChangeSetResult<K, V>)>| {
        let keep = Rc::new(keep);
        source.subscribe(move |result| match result {
            Ok(change_set) => {
                let mut builder = ChangeSetBuilder::with_capacity(change_set.len());
                for change in change_set.iter() {
                    if keep(change.reason()) {
                        builder.push(change.clone());
                    }
                }
                if let Some(set) = builder.build(change_set.kind().clone()) {
                    observer(Ok(Rc::new(set)));
                }
            }
            Err(error) => observer(Err(error)),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::VirtualScheduler;
    use crate::source_cache::SourceCache;

    #[test]
    fn batch_coalesces_several_upstream_change_sets_into_one() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let scheduler = Rc::new(VirtualScheduler::new());
        let batched = cache.as_observable().batch(Duration::from_secs(1), scheduler.clone() as Rc<dyn Scheduler>);

        let received: Rc<RefCell<Vec<crate::change_set::ChangeSet<&str, i32>>>> = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        let _subscription = batched.subscribe(move |result| received_clone.borrow_mut().push(result.unwrap()));

        cache.edit_infallible(|updater| updater.add_or_update("A", 1));
        cache.edit_infallible(|updater| updater.add_or_update("A", 2));
        cache.edit_infallible(|updater| updater.add_or_update("B", 9));
        assert!(received.borrow().is_empty());

        scheduler.advance(Duration::from_secs(1));
        assert_eq!(received.borrow().len(), 1);
        let set = &received.borrow()[0];
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn batch_drops_an_add_then_remove_within_the_same_window() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let scheduler = Rc::new(VirtualScheduler::new());
        let batched = cache.as_observable().batch(Duration::from_secs(1), scheduler.clone() as Rc<dyn Scheduler>);

        let received: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        let _subscription = batched.subscribe(move |result| received_clone.borrow_mut().push(result.unwrap().len()));

        cache.edit_infallible(|updater| updater.add_or_update("A", 1));
        cache.edit_infallible(|updater| updater.remove("A"));
        scheduler.advance(Duration::from_secs(1));
        assert!(received.borrow().is_empty());
    }

    #[test]
    fn batch_if_passes_through_unpaused_and_accumulates_while_paused() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let controller = PauseController::new();
        let batched = cache.as_observable().batch_if(&controller);

        let received: Rc<RefCell<Vec<crate::change_set::ChangeSet<&str, i32>>>> = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        let _subscription = batched.subscribe(move |result| received_clone.borrow_mut().push(result.unwrap()));

        cache.edit_infallible(|updater| updater.add_or_update("A", 1));
        assert_eq!(received.borrow().len(), 1);

        controller.pause();
        cache.edit_infallible(|updater| updater.add_or_update("A", 2));
        cache.edit_infallible(|updater| updater.add_or_update("B", 9));
        assert_eq!(received.borrow().len(), 1);

        controller.resume();
        assert_eq!(received.borrow().len(), 2);
        assert_eq!(received.borrow().last().unwrap().len(), 2);
    }

    #[test]
    fn batch_if_resume_is_a_no_op_when_nothing_accumulated() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let controller = PauseController::new();
        let batched = cache.as_observable().batch_if(&controller);

        let received: Rc<RefCell<Vec<crate::change_set::ChangeSet<&str, i32>>>> = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        let _subscription = batched.subscribe(move |result| received_clone.borrow_mut().push(result.unwrap()));

        controller.pause();
        controller.resume();
        assert!(received.borrow().is_empty());
    }

    #[test]
    fn change_key_rehomes_every_change_under_a_derived_key() {
        let cache: SourceCache<&str, (i32, &str)> = SourceCache::new();
        let rekeyed = cache.as_observable().change_key(|_old_key, value| value.1);

        let seen: Rc<RefCell<Vec<&str>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let _subscription = rekeyed.subscribe(move |result| {
            for change in result.unwrap().iter() {
                seen_clone.borrow_mut().push(*change.key());
            }
        });

        cache.edit_infallible(|updater| updater.add_or_update("A", (1, "team-1")));
        assert_eq!(*seen.borrow(), vec!["team-1"]);
    }

    #[test]
    fn for_each_change_invokes_the_callback_per_change() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let seen: Rc<RefCell<Vec<(&str, ChangeReason)>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let _subscription = cache.as_observable().for_each_change(move |change| {
            seen_clone.borrow_mut().push((*change.key(), change.reason()));
        });

        cache.edit_infallible(|updater| {
            updater.add_or_update("A", 1);
            updater.add_or_update("B", 2);
        });
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn ignore_update_when_drops_only_matching_updates() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let gated = cache.as_observable().ignore_update_when(|previous, current| current - previous < 5);

        cache.edit_infallible(|updater| updater.add_or_update("A", 1));
        let seen: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let _subscription = gated.subscribe(move |result| {
            for change in result.unwrap().iter() {
                seen_clone.borrow_mut().push(*change.current());
            }
        });

        cache.edit_infallible(|updater| updater.add_or_update("A", 2));
        assert!(seen.borrow().is_empty());

        cache.edit_infallible(|updater| updater.add_or_update("A", 20));
        assert_eq!(*seen.borrow(), vec![20]);
    }

    #[test]
    fn query_when_changed_suppresses_updates_with_an_unchanged_projection() {
        let cache: SourceCache<&str, (i32, &str)> = SourceCache::new();
        let projected = cache.as_observable().query_when_changed(|value| value.0);

        cache.edit_infallible(|updater| updater.add_or_update("A", (1, "x")));
        let seen: Rc<RefCell<usize>> = Rc::new(RefCell::new(0));
        let seen_clone = seen.clone();
        let _subscription = projected.subscribe(move |result| *seen_clone.borrow_mut() += result.unwrap().len());

        cache.edit_infallible(|updater| updater.add_or_update("A", (1, "y")));
        assert_eq!(*seen.borrow(), 0);

        cache.edit_infallible(|updater| updater.add_or_update("A", (2, "y")));
        assert_eq!(*seen.borrow(), 1);
    }

    #[test]
    fn where_reasons_are_keeps_only_the_requested_reasons() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let adds_only = cache.as_observable().where_reasons_are(HashSet::from([ChangeReason::Add]));

        let seen: Rc<RefCell<Vec<ChangeReason>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let _subscription = adds_only.subscribe(move |result| {
            for change in result.unwrap().iter() {
                seen_clone.borrow_mut().push(change.reason());
            }
        });

        cache.edit_infallible(|updater| updater.add_or_update("A", 1));
        assert_eq!(*seen.borrow(), vec![ChangeReason::Add]);

        seen.borrow_mut().clear();
        cache.edit_infallible(|updater| updater.add_or_update("A", 2));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn where_reasons_are_not_excludes_the_requested_reasons() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let no_removes = cache.as_observable().where_reasons_are_not(HashSet::from([ChangeReason::Remove]));

        let seen: Rc<RefCell<Vec<ChangeReason>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let _subscription = no_removes.subscribe(move |result| {
            for change in result.unwrap().iter() {
                seen_clone.borrow_mut().push(change.reason());
            }
        });

        cache.edit_infallible(|updater| updater.add_or_update("A", 1));
        assert_eq!(*seen.borrow(), vec![ChangeReason::Add]);

        seen.borrow_mut().clear();
        cache.edit_infallible(|updater| updater.remove("A"));
        assert!(seen.borrow().is_empty());
    }
}
