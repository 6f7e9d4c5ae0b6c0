//! `.transform(selector)`: a stateless per-value projection. Since the
//! key is unchanged and the projection is pure, every upstream reason maps
//! straight across — no membership bookkeeping is needed, unlike `Filter`.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::change_set::ChangeSetBuilder;
use crate::controllers::RetransformTrigger;
use crate::logging::{Logger, TransformFailureEvent};
use crate::observable::{ChangeSetObservable, ChangeSetResult};

pub trait Transform<K, V> {
    /// Equivalent to calling [`Transform::transform_with_trigger`] with a
    /// trigger the caller never fires.
    fn transform<W: Clone + 'static>(&self, selector: impl Fn(&K, &V) -> W + 'static) -> ChangeSetObservable<K, W>;

    /// As `transform`, but `trigger.fire(selector)` asks every currently
    /// cached upstream item matching `selector` to be re-projected and
    /// emitted as an `Update`, even though nothing changed upstream — for
    /// when the projection depends on state outside the item itself.
    fn transform_with_trigger<W: Clone + 'static>(
        &self,
        selector: impl Fn(&K, &V) -> W + 'static,
        trigger: &RetransformTrigger<K, V>,
    ) -> ChangeSetObservable<K, W>;
}

fn map_change<K, V, W>(change: &crate::change::Change<K, V>, project: impl Fn(&V) -> W) -> crate::change::Change<K, W>
where
    K: Clone,
{
    let current = project(change.current());
    let previous = change.previous().map(project);
    let mapped = match change.reason() {
        crate::change::ChangeReason::Add => crate::change::Change::add(change.key().clone(), current),
        crate::change::ChangeReason::Update => {
            crate::change::Change::update(change.key().clone(), current, previous.expect("update carries previous"))
        }
        crate::change::ChangeReason::Remove => crate::change::Change::remove(change.key().clone(), current),
        crate::change::ChangeReason::Refresh => crate::change::Change::refresh(change.key().clone(), current),
        crate::change::ChangeReason::Moved => crate::change::Change::moved(
            change.key().clone(),
            current,
            change.current_index().unwrap_or_default(),
            change.previous_index().unwrap_or_default(),
        ),
    };
    mapped.with_indices(change.current_index(), change.previous_index())
}

fn map_kind<K: Clone>(kind: &crate::change_set::ChangeSetKind<K>) -> crate::change_set::ChangeSetKind<K> {
    match kind {
        crate::change_set::ChangeSetKind::Unsorted => crate::change_set::ChangeSetKind::Unsorted,
        crate::change_set::ChangeSetKind::Sorted { sorted_keys } => {
            crate::change_set::ChangeSetKind::Sorted { sorted_keys: sorted_keys.clone() }
        }
        crate::change_set::ChangeSetKind::Paged { sorted_keys, response } => {
            crate::change_set::ChangeSetKind::Paged { sorted_keys: sorted_keys.clone(), response: *response }
        }
        crate::change_set::ChangeSetKind::Virtual { sorted_keys, response } => {
            crate::change_set::ChangeSetKind::Virtual { sorted_keys: sorted_keys.clone(), response: *response }
        }
    }
}

impl<K, V> Transform<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    fn transform<W: Clone + 'static>(&self, selector: impl Fn(&K, &V) -> W + 'static) -> ChangeSetObservable<K, W> {
        self.transform_with_trigger(selector, &RetransformTrigger::new())
    }

    fn transform_with_trigger<W: Clone + 'static>(
        &self,
        selector: impl Fn(&K, &V) -> W + 'static,
        trigger: &RetransformTrigger<K, V>,
    ) -> ChangeSetObservable<K, W> {
        let source = self.clone();
        let selector = Rc::new(selector);
        let trigger = trigger.clone();
        ChangeSetObservable::new(move |observer: Box<dyn FnMut(ChangeSetResult<K, W>)>| {
            let observer: Rc<RefCell<Box<dyn FnMut(ChangeSetResult<K, W>)>>> = Rc::new(RefCell::new(observer));
            // A shadow copy of every upstream value currently known, so the
            // retransform trigger can re-select items the projection's own
            // inputs say nothing changed for; `projected` remembers the last
            // value emitted per key, so a retransform's `Update` carries a
            // real previous value rather than repeating the new one.
            let cache: Rc<RefCell<IndexMap<K, V>>> = Rc::new(RefCell::new(IndexMap::new()));
            let projected: Rc<RefCell<IndexMap<K, W>>> = Rc::new(RefCell::new(IndexMap::new()));

            let cache_for_source = cache.clone();
            let projected_for_source = projected.clone();
            let observer_for_source = observer.clone();
            let selector_for_source = selector.clone();
            let source_subscription = source.subscribe(move |result| match result {
                Ok(change_set) => {
                    let mut cache = cache_for_source.borrow_mut();
                    let mut projected = projected_for_source.borrow_mut();
                    for change in change_set.iter() {
                        match change.reason() {
                            crate::change::ChangeReason::Remove => {
                                cache.shift_remove(change.key());
                                projected.shift_remove(change.key());
                            }
                            _ => {
                                cache.insert(change.key().clone(), change.current().clone());
                                projected.insert(change.key().clone(), selector_for_source(change.key(), change.current()));
                            }
                        }
                    }

                    let mut builder = ChangeSetBuilder::new();
                    for change in change_set.iter() {
                        builder.push(map_change(change, |value| selector_for_source(change.key(), value)));
                    }
                    if let Some(set) = builder.build(map_kind(change_set.kind())) {
                        (*observer_for_source.borrow_mut())(Ok(Rc::new(set)));
                    }
                }
                Err(error) => (*observer_for_source.borrow_mut())(Err(error)),
            });

            let cache_for_trigger = cache.clone();
            let projected_for_trigger = projected.clone();
            let observer_for_trigger = observer.clone();
            let selector_for_trigger = selector.clone();
            let trigger_subscription = trigger.subscribe(move |select| {
                let cache = cache_for_trigger.borrow();
                let mut projected = projected_for_trigger.borrow_mut();
                let mut builder = ChangeSetBuilder::new();
                for (key, value) in cache.iter() {
                    if !select(key, value) {
                        continue;
                    }
                    let new_value = selector_for_trigger(key, value);
                    let old_value = projected.insert(key.clone(), new_value.clone()).unwrap_or_else(|| new_value.clone());
                    builder.push(crate::change::Change::update(key.clone(), new_value, old_value));
                }
                if let Some(set) = builder.build(crate::change_set::ChangeSetKind::Unsorted) {
                    (*observer_for_trigger.borrow_mut())(Ok(Rc::new(set)));
                }
            });

            crate::observable::Subscription::new(move || {
                drop(source_subscription);
                drop(trigger_subscription);
            })
        })
    }
}

/// `.transform_safe(selector, error_sink)`: like `transform`, but a
/// projection that returns `Err` never reaches the downstream as an
/// `Error::Callback` — the failure is routed to `error_sink` and that one
/// item's change is simply dropped from the emitted batch instead.
pub trait TransformSafe<K, V> {
    fn transform_safe<W: Clone + 'static, E>(
        &self,
        selector: impl Fn(&K, &V) -> Result<W, E> + 'static,
        error_sink: impl FnMut(&K, E) + 'static,
    ) -> ChangeSetObservable<K, W>;

    fn transform_safe_with_logger<W: Clone + 'static, E>(
        &self,
        selector: impl Fn(&K, &V) -> Result<W, E> + 'static,
        error_sink: impl FnMut(&K, E) + 'static,
        operator: &'static str,
        logger: Logger,
    ) -> ChangeSetObservable<K, W>;
}

impl<K, V> TransformSafe<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    fn transform_safe<W: Clone + 'static, E>(
        &self,
        selector: impl Fn(&K, &V) -> Result<W, E> + 'static,
        error_sink: impl FnMut(&K, E) + 'static,
    ) -> ChangeSetObservable<K, W> {
        self.transform_safe_with_logger(selector, error_sink, "transform_safe", Logger::noop())
    }

    fn transform_safe_with_logger<W: Clone + 'static, E>(
        &self,
        selector: impl Fn(&K, &V) -> Result<W, E> + 'static,
        error_sink: impl FnMut(&K, E) + 'static,
        operator: &'static str,
        logger: Logger,
    ) -> ChangeSetObservable<K, W> {
        let source = self.clone();
        let selector = Rc::new(selector);
        let error_sink: Rc<RefCell<dyn FnMut(&K, E)>> = Rc::new(RefCell::new(error_sink));
        ChangeSetObservable::new(move |mut observer: Box<dyn FnMut(ChangeSetResult<K, W>)>| {
            let selector = selector.clone();
            let error_sink = error_sink.clone();
            let logger = logger.clone();
            // `projected` remembers the last successfully-projected value per
            // key, the same shadow cache `transform_with_trigger` keeps, so an
            // `Update` whose previous projection had failed still carries a
            // real previous value rather than panicking.
            let projected: Rc<RefCell<IndexMap<K, W>>> = Rc::new(RefCell::new(IndexMap::new()));
            source.subscribe(move |result| match result {
                Ok(change_set) => {
                    let mut projected = projected.borrow_mut();
                    let mut builder = ChangeSetBuilder::new();
                    for change in change_set.iter() {
                        if change.reason() == crate::change::ChangeReason::Remove {
                            // only forward a removal for a key that was
                            // successfully projected at some point; one whose
                            // every projection attempt failed never appeared
                            // downstream in the first place.
                            if let Some(last_value) = projected.shift_remove(change.key()) {
                                builder.push(crate::change::Change::remove(change.key().clone(), last_value));
                            }
                            continue;
                        }
                        match selector(change.key(), change.current()) {
                            Ok(value) => {
                                let mapped = match change.reason() {
                                    crate::change::ChangeReason::Add => crate::change::Change::add(change.key().clone(), value.clone()),
                                    crate::change::ChangeReason::Update => {
                                        let previous = projected.get(change.key()).cloned().unwrap_or_else(|| value.clone());
                                        crate::change::Change::update(change.key().clone(), value.clone(), previous)
                                    }
                                    crate::change::ChangeReason::Refresh => crate::change::Change::refresh(change.key().clone(), value.clone()),
                                    crate::change::ChangeReason::Moved => crate::change::Change::moved(
                                        change.key().clone(),
                                        value.clone(),
                                        change.current_index().unwrap_or_default(),
                                        change.previous_index().unwrap_or_default(),
                                    ),
                                    crate::change::ChangeReason::Remove => unreachable!("handled above"),
                                };
                                projected.insert(change.key().clone(), value);
                                builder.push(mapped.with_indices(change.current_index(), change.previous_index()));
                            }
                            Err(error) => {
                                logger.log(TransformFailureEvent { operator });
                                (error_sink.borrow_mut())(change.key(), error);
                            }
                        }
                    }
                    if let Some(set) = builder.build_unsorted() {
                        observer(Ok(Rc::new(set)));
                    }
                }
                Err(error) => observer(Err(error)),
            })
        })
    }
}
