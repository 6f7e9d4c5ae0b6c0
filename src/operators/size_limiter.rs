//! `.size_limit(options, scheduler)`: caps a collection at
//! `options.limit` items, evicting the oldest by insertion order (ties
//! broken by insertion sequence, which `IndexMap`'s own order already
//! encodes). Eviction is a scheduled follow-up pass rather than something
//! done inline against the triggering change set — the same
//! [`Scheduler`]-driven shape [`crate::operators::expire_after`] uses, so an
//! add that overflows the cap passes through untouched and the eviction
//! shows up as its own, later change set once the scheduler is driven.

use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::change::{Change, ChangeReason};
use crate::change_set::{ChangeSetBuilder, ChangeSetKind};
use crate::config::SizeLimiterOptions;
use crate::logging::{Logger, SizeLimitEvent};
use crate::observable::{ChangeSetObservable, ChangeSetResult, Subscription};
use crate::scheduler::Scheduler;

pub trait SizeLimit<K, V> {
    fn size_limit(&self, options: SizeLimiterOptions, scheduler: Rc<dyn Scheduler>) -> ChangeSetObservable<K, V>;
    fn size_limit_with_logger(
        &self,
        options: SizeLimiterOptions,
        scheduler: Rc<dyn Scheduler>,
        operator: &'static str,
        logger: Logger,
    ) -> ChangeSetObservable<K, V>;
}

/// Evicts down to `limit` and emits the resulting batch, if anything was
/// actually evicted. Shared by every batch that might have pushed the
/// mirror over the cap.
fn sweep<K, V>(
    mirror: &Rc<std::cell::RefCell<IndexMap<K, V>>>,
    observer: &Rc<std::cell::RefCell<Box<dyn FnMut(ChangeSetResult<K, V>)>>>,
    limit: usize,
    logger: &Logger,
    operator: &'static str,
) where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    let mut evicted: Vec<(K, V)> = Vec::new();
    {
        let mut mirror = mirror.borrow_mut();
        while mirror.len() > limit {
            match mirror.shift_remove_index(0) {
                Some(pair) => evicted.push(pair),
                None => break,
            }
        }
    }
    if evicted.is_empty() {
        return;
    }

    let mut builder = ChangeSetBuilder::new();
    for (key, value) in evicted.iter() {
        builder.push(Change::remove(key.clone(), value.clone()));
    }
    logger.log(SizeLimitEvent { operator, evicted: evicted.len(), limit });
    if let Some(set) = builder.build(ChangeSetKind::Unsorted) {
        (*observer.borrow_mut())(Ok(Rc::new(set)));
    }
}

impl<K, V> SizeLimit<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    fn size_limit(&self, options: SizeLimiterOptions, scheduler: Rc<dyn Scheduler>) -> ChangeSetObservable<K, V> {
        self.size_limit_with_logger(options, scheduler, "size_limiter", Logger::noop())
    }

    fn size_limit_with_logger(
        &self,
        options: SizeLimiterOptions,
        scheduler: Rc<dyn Scheduler>,
        operator: &'static str,
        logger: Logger,
    ) -> ChangeSetObservable<K, V> {
        let source = self.clone();
        ChangeSetObservable::new(move |observer: Box<dyn FnMut(ChangeSetResult<K, V>)>| {
            let observer: Rc<std::cell::RefCell<Box<dyn FnMut(ChangeSetResult<K, V>)>>> = Rc::new(std::cell::RefCell::new(observer));
            let mirror: Rc<std::cell::RefCell<IndexMap<K, V>>> = Rc::new(std::cell::RefCell::new(IndexMap::new()));
            let logger = logger.clone();
            let scheduler = scheduler.clone();
            let pending_sweeps: Rc<std::cell::RefCell<Vec<Subscription>>> = Rc::new(std::cell::RefCell::new(Vec::new()));

            let source_subscription = {
                let mirror = mirror.clone();
                let observer = observer.clone();
                let logger = logger.clone();
                let scheduler = scheduler.clone();
                let pending_sweeps = pending_sweeps.clone();
                source.subscribe(move |result| match result {
                    Ok(change_set) => {
                        {
                            let mut mirror = mirror.borrow_mut();
                            for change in change_set.iter() {
                                match change.reason() {
                                    ChangeReason::Add | ChangeReason::Update | ChangeReason::Refresh => {
                                        mirror.insert(change.key().clone(), change.current().clone());
                                    }
                                    ChangeReason::Remove => {
                                        mirror.shift_remove(change.key());
                                    }
                                    ChangeReason::Moved => {}
                                }
                            }
                        }

                        // the triggering batch passes straight through; eviction
                        // (if the cap was exceeded) is its own, later batch.
                        (*observer.borrow_mut())(Ok(change_set));

                        let mirror = mirror.clone();
                        let observer = observer.clone();
                        let logger = logger.clone();
                        let limit = options.limit;
                        let sweep_subscription = scheduler.schedule(Box::new(move || sweep(&mirror, &observer, limit, &logger, operator)));
                        pending_sweeps.borrow_mut().push(sweep_subscription);
                    }
                    Err(error) => (*observer.borrow_mut())(Err(error)),
                })
            };

            Subscription::new(move || {
                drop(source_subscription);
                pending_sweeps.borrow_mut().clear();
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::VirtualScheduler;
    use crate::source_cache::SourceCache;

    #[test]
    fn exceeding_the_limit_evicts_the_oldest_entry_once_the_scheduler_runs() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let scheduler = Rc::new(VirtualScheduler::new());
        let limited = cache.as_observable().size_limit(SizeLimiterOptions::new(2), scheduler.clone() as Rc<dyn Scheduler>);

        let reasons: Rc<std::cell::RefCell<Vec<(&str, ChangeReason)>>> = Rc::new(std::cell::RefCell::new(Vec::new()));
        let reasons_clone = reasons.clone();
        let _subscription = limited.subscribe(move |result| {
            for change in result.unwrap().iter() {
                reasons_clone.borrow_mut().push((*change.key(), change.reason()));
            }
        });

        cache.edit_infallible(|updater| updater.add_or_update("A", 1));
        cache.edit_infallible(|updater| updater.add_or_update("B", 2));
        scheduler.run_until_idle();
        reasons.borrow_mut().clear();

        cache.edit_infallible(|updater| updater.add_or_update("C", 3));
        assert!(reasons.borrow().contains(&("C", ChangeReason::Add)));
        assert!(!reasons.borrow().contains(&("A", ChangeReason::Remove)), "eviction hasn't run yet");

        scheduler.run_until_idle();
        assert!(reasons.borrow().contains(&("A", ChangeReason::Remove)));
    }

    #[test]
    fn an_add_that_overflows_the_cap_is_forwarded_before_its_eviction_runs() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let scheduler = Rc::new(VirtualScheduler::new());
        let limited = cache.as_observable().size_limit(SizeLimiterOptions::new(1), scheduler.clone() as Rc<dyn Scheduler>);

        let batches: Rc<std::cell::RefCell<Vec<Vec<(&str, ChangeReason)>>>> = Rc::new(std::cell::RefCell::new(Vec::new()));
        let batches_clone = batches.clone();
        let _subscription = limited.subscribe(move |result| {
            let batch = result.unwrap().iter().map(|change| (*change.key(), change.reason())).collect();
            batches_clone.borrow_mut().push(batch);
        });

        cache.edit_infallible(|updater| {
            updater.add_or_update("A", 1);
            updater.add_or_update("B", 2);
        });
        assert_eq!(batches.borrow().len(), 1, "the overflowing add is forwarded in its own triggering batch");
        assert_eq!(batches.borrow()[0], vec![("A", ChangeReason::Add), ("B", ChangeReason::Add)]);

        scheduler.run_until_idle();
        assert_eq!(batches.borrow().len(), 2, "eviction arrives as a distinct, later batch");
        assert_eq!(batches.borrow()[1], vec![("A", ChangeReason::Remove)]);
    }
}
