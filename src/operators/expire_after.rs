//! `.expire_after(mode, options, scheduler)`: assigns every item an
//! absolute expiry deadline (`now + time_selector(value)`, `None` meaning
//! never) and sweeps due items out in one batch, driven entirely by the
//! injected [`Scheduler`] — never a real sleep or spawned thread.
//!
//! Two sweep triggers, selected by [`ExpireMode`]:
//! - [`ExpireMode::Polling`]: one recurring timer at `options.poll_interval`.
//! - [`ExpireMode::PerItemTimer`]: one one-shot timer per distinct deadline
//!   seen; every fire re-sweeps everything currently due. An item refreshed
//!   after its timer was armed is simply not due yet when that timer fires —
//!   "cancellation" is just this idempotent re-check at sweep time, never an
//!   explicit timer cancel.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;
use std::time::Duration;

use fnv::FnvHashSet;
use indexmap::IndexMap;

use crate::change::{Change, ChangeReason};
use crate::change_set::{ChangeSetBuilder, ChangeSetKind};
use crate::config::ExpireAfterOptions;
use crate::logging::{ExpireEvent, Logger};
use crate::observable::{ChangeSetObservable, ChangeSetResult, Subscription};
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireMode {
    Polling,
    PerItemTimer,
}

struct Entries<K, V> {
    items: IndexMap<K, (V, Option<Duration>)>,
    armed: FnvHashSet<Duration>,
}

pub trait ExpireAfter<K, V> {
    fn expire_after(&self, mode: ExpireMode, options: ExpireAfterOptions, scheduler: Rc<dyn Scheduler>) -> ChangeSetObservable<K, V>
    where
        V: 'static,
    {
        let lifetime = options.lifetime;
        self.expire_after_with(move |_value: &V| Some(lifetime), mode, options, scheduler)
    }

    fn expire_after_with(
        &self,
        time_selector: impl Fn(&V) -> Option<Duration> + 'static,
        mode: ExpireMode,
        options: ExpireAfterOptions,
        scheduler: Rc<dyn Scheduler>,
    ) -> ChangeSetObservable<K, V> {
        self.expire_after_with_logger(time_selector, mode, options, scheduler, "expire_after", Logger::noop())
    }

    fn expire_after_with_logger(
        &self,
        time_selector: impl Fn(&V) -> Option<Duration> + 'static,
        mode: ExpireMode,
        options: ExpireAfterOptions,
        scheduler: Rc<dyn Scheduler>,
        operator: &'static str,
        logger: Logger,
    ) -> ChangeSetObservable<K, V>;
}

/// Removes every entry whose deadline has passed and emits the resulting
/// batch (if non-empty). Shared by both the polling timer and every
/// per-item one-shot timer.
fn sweep<K, V>(
    entries: &Rc<RefCell<Entries<K, V>>>,
    observer: &Rc<RefCell<Box<dyn FnMut(ChangeSetResult<K, V>)>>>,
    scheduler: &Rc<dyn Scheduler>,
    logger: &Logger,
    operator: &'static str,
) where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    let now = scheduler.now();
    let mut entries = entries.borrow_mut();
    let due: Vec<K> = entries
        .items
        .iter()
        .filter(|(_, (_, deadline))| deadline.is_some_and(|deadline| deadline <= now))
        .map(|(key, _)| key.clone())
        .collect();

    let mut builder = ChangeSetBuilder::new();
    for key in due {
        if let Some((value, _)) = entries.items.shift_remove(&key) {
            builder.push(Change::remove(key, value));
        }
    }
    let count = builder.len();
    drop(entries);

    if count > 0 {
        logger.log(ExpireEvent { operator, count });
    }
    if let Some(set) = builder.build(ChangeSetKind::Unsorted) {
        (*observer.borrow_mut())(Ok(Rc::new(set)));
    }
}

impl<K, V> ExpireAfter<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    fn expire_after_with_logger(
        &self,
        time_selector: impl Fn(&V) -> Option<Duration> + 'static,
        mode: ExpireMode,
        options: ExpireAfterOptions,
        scheduler: Rc<dyn Scheduler>,
        operator: &'static str,
        logger: Logger,
    ) -> ChangeSetObservable<K, V> {
        let source = self.clone();
        let time_selector = Rc::new(time_selector);

        ChangeSetObservable::new(move |observer: Box<dyn FnMut(ChangeSetResult<K, V>)>| {
            let observer: Rc<RefCell<Box<dyn FnMut(ChangeSetResult<K, V>)>>> = Rc::new(RefCell::new(observer));
            let entries: Rc<RefCell<Entries<K, V>>> =
                Rc::new(RefCell::new(Entries { items: IndexMap::new(), armed: FnvHashSet::default() }));

            let polling_subscription = if mode == ExpireMode::Polling {
                let entries = entries.clone();
                let observer = observer.clone();
                let scheduler_for_sweep = scheduler.clone();
                let logger = logger.clone();
                Some(scheduler.schedule_recurring(
                    options.poll_interval,
                    Box::new(move || sweep(&entries, &observer, &scheduler_for_sweep, &logger, operator)),
                ))
            } else {
                None
            };

            let pending_timers: Rc<RefCell<Vec<Subscription>>> = Rc::new(RefCell::new(Vec::new()));

            let source_subscription = {
                let entries = entries.clone();
                let observer = observer.clone();
                let time_selector = time_selector.clone();
                let scheduler = scheduler.clone();
                let logger = logger.clone();
                let pending_timers = pending_timers.clone();
                source.subscribe(move |result| match result {
                    Ok(change_set) => {
                        let now = scheduler.now();
                        let mut new_deadlines: Vec<Duration> = Vec::new();
                        {
                            let mut entries = entries.borrow_mut();
                            for change in change_set.iter() {
                                match change.reason() {
                                    ChangeReason::Add | ChangeReason::Update | ChangeReason::Refresh => {
                                        let deadline = time_selector(change.current()).map(|ttl| now + ttl);
                                        entries.items.insert(change.key().clone(), (change.current().clone(), deadline));
                                        if mode == ExpireMode::PerItemTimer {
                                            if let Some(deadline) = deadline {
                                                if entries.armed.insert(deadline) {
                                                    new_deadlines.push(deadline);
                                                }
                                            }
                                        }
                                    }
                                    ChangeReason::Remove => {
                                        entries.items.shift_remove(change.key());
                                    }
                                    ChangeReason::Moved => {}
                                }
                            }
                        }

                        for deadline in new_deadlines {
                            let delay = deadline.saturating_sub(scheduler.now());
                            let entries = entries.clone();
                            let observer = observer.clone();
                            let scheduler_for_sweep = scheduler.clone();
                            let logger = logger.clone();
                            let subscription = scheduler.schedule_after(
                                delay,
                                Box::new(move || sweep(&entries, &observer, &scheduler_for_sweep, &logger, operator)),
                            );
                            pending_timers.borrow_mut().push(subscription);
                        }

                        // expiry only ever removes entries asynchronously via a
                        // sweep; the upstream batch passes straight through.
                        (*observer.borrow_mut())(Ok(change_set));
                    }
                    Err(error) => (*observer.borrow_mut())(Err(error)),
                })
            };

            Subscription::new(move || {
                drop(polling_subscription);
                drop(source_subscription);
                pending_timers.borrow_mut().clear();
            })
        })
    }
}
