//! Cross-module black-box scenarios against the public API, each exercising
//! one operator chain end to end rather than a single operator's internals
//! (those live alongside their operator under `src/`).

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::time::Duration;

use reactive_collections::change::ChangeReason;
use reactive_collections::change_set::{ChangeSetKind, PageRequest};
use reactive_collections::controllers::{FilterController, PageController, RetransformTrigger};
use reactive_collections::operators::expire_after::{ExpireAfter, ExpireMode};
use reactive_collections::operators::filter::Filter;
use reactive_collections::operators::group::Group;
use reactive_collections::operators::join::RightJoin;
use reactive_collections::operators::page::Page;
use reactive_collections::operators::size_limiter::SizeLimit;
use reactive_collections::operators::sort::Sort;
use reactive_collections::operators::transform::Transform;
use reactive_collections::config::{ExpireAfterOptions, SizeLimiterOptions};
use reactive_collections::scheduler::{Scheduler, VirtualScheduler};
use reactive_collections::source_cache::SourceCache;

#[test]
fn an_edit_scope_that_fully_cancels_reports_request_level_counts_but_emits_nothing() {
    let cache: SourceCache<&str, i32> = SourceCache::new();

    let emitted: Rc<RefCell<usize>> = Rc::new(RefCell::new(0));
    let emitted_clone = emitted.clone();
    let _subscription = cache.connect(move |_result| *emitted_clone.borrow_mut() += 1);

    let summary = cache.edit_infallible(|updater| {
        updater.add_or_update("A", 1);
        updater.add_or_update("A", 2);
        updater.add_or_update("A", 3);
        updater.add_or_update("A", 4);
        updater.refresh("A");
        updater.remove("A");
        updater.refresh("A");
    });

    assert_eq!(summary.counters.adds, 1);
    assert_eq!(summary.counters.updates, 3);
    assert_eq!(summary.counters.removes, 1);
    assert_eq!(summary.counters.refreshes, 2);
    assert!(!summary.emitted);
    assert_eq!(*emitted.borrow(), 0);
    assert_eq!(cache.count(), 0);
}

#[test]
fn swapping_a_filter_controllers_predicate_emits_the_membership_delta_in_one_batch() {
    let cache: SourceCache<i32, i32> = SourceCache::new();
    let controller = FilterController::new(|age: &i32| *age > 20);
    let adults = cache.as_observable().filter_with_controller(&controller);

    let received: Rc<RefCell<Vec<reactive_collections::change_set::ChangeSet<i32, i32>>>> = Rc::new(RefCell::new(Vec::new()));
    let received_clone = received.clone();
    let _subscription = adults.subscribe(move |result| received_clone.borrow_mut().push(result.unwrap()));

    cache.edit_infallible(|updater| {
        for age in 1..=100 {
            updater.add_or_update(age, age);
        }
    });
    assert_eq!(received.borrow().last().unwrap().len(), 80);

    received.borrow_mut().clear();
    controller.change(|age: &i32| *age <= 50);

    let last = received.borrow().last().unwrap().clone();
    let adds = last.iter().filter(|c| c.reason() == ChangeReason::Add).count();
    let removes = last.iter().filter(|c| c.reason() == ChangeReason::Remove).count();
    assert_eq!(adds, 20);
    assert_eq!(removes, 50);

    let member_count = {
        let mut members: HashSet<i32> = (21..=100).collect();
        for change in last.iter() {
            match change.reason() {
                ChangeReason::Add => {
                    members.insert(*change.key());
                }
                ChangeReason::Remove => {
                    members.remove(change.key());
                }
                _ => {}
            }
        }
        members.len()
    };
    assert_eq!(member_count, 50);
}

#[derive(Clone, Debug, PartialEq)]
struct PersonView {
    name: &'static str,
    age: i32,
    category: &'static str,
}

#[test]
fn firing_a_retransform_trigger_reprojects_only_the_selected_items_as_updates() {
    let cache: SourceCache<&str, (&'static str, i32)> = SourceCache::new();
    let trigger: RetransformTrigger<&str, (&'static str, i32)> = RetransformTrigger::new();
    let views = cache.as_observable().transform_with_trigger(
        |_key, (name, age)| PersonView { name, age: *age, category: if *age <= 5 { "junior" } else { "senior" } },
        &trigger,
    );

    let received: Rc<RefCell<Vec<reactive_collections::change_set::ChangeSet<&str, PersonView>>>> = Rc::new(RefCell::new(Vec::new()));
    let received_clone = received.clone();
    let _subscription = views.subscribe(move |result| received_clone.borrow_mut().push(result.unwrap()));

    let names = ["Name1", "Name2", "Name3", "Name4", "Name5", "Name6", "Name7", "Name8", "Name9", "Name10"];
    cache.edit_infallible(|updater| {
        for (index, name) in names.iter().enumerate() {
            updater.add_or_update(*name, (*name, (index + 1) as i32));
        }
    });
    assert_eq!(received.borrow().len(), 1);

    trigger.fire(|_key, (_name, age)| *age <= 5);

    assert_eq!(received.borrow().len(), 2);
    let last = received.borrow().last().unwrap().clone();
    assert_eq!(last.len(), 5);
    for change in last.iter() {
        assert_eq!(change.reason(), ChangeReason::Update);
        assert_eq!(change.current().category, "junior");
        assert!(change.current().age <= 5);
    }
}

#[test]
fn expire_after_with_a_per_item_selector_honours_three_distinct_lifetimes() {
    let cache: SourceCache<i32, i32> = SourceCache::new();
    let scheduler = Rc::new(VirtualScheduler::new());
    // The value doubles as its own key here so the selector (which only
    // sees `&V`) can still branch per item.
    let expiring = cache.as_observable().expire_after_with(
        |value: &i32| {
            Some(match value {
                1 => Duration::from_secs(5),
                2 => Duration::from_secs(10),
                _ => Duration::from_secs(20),
            })
        },
        ExpireMode::Polling,
        ExpireAfterOptions::new(Duration::from_secs(5)).with_poll_interval(Duration::from_secs(1)),
        scheduler.clone() as Rc<dyn Scheduler>,
    );

    let removed: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));
    let removed_clone = removed.clone();
    let _subscription = expiring.subscribe(move |result| {
        for change in result.unwrap().iter() {
            if change.reason() == ChangeReason::Remove {
                removed_clone.borrow_mut().push(*change.current());
            }
        }
    });

    cache.edit_infallible(|updater| {
        updater.add_or_update(1, 1);
        updater.add_or_update(2, 2);
        updater.add_or_update(3, 3);
    });

    scheduler.advance(Duration::from_secs(5));
    assert_eq!(*removed.borrow(), vec![1]);

    scheduler.advance(Duration::from_secs(5));
    assert_eq!(*removed.borrow(), vec![1, 2]);

    scheduler.advance(Duration::from_secs(10));
    assert_eq!(*removed.borrow(), vec![1, 2, 3]);
}

#[test]
fn size_limiting_a_single_large_batch_keeps_only_the_most_recently_inserted_items() {
    let cache: SourceCache<i32, i32> = SourceCache::new();
    let scheduler = Rc::new(VirtualScheduler::new());
    let limited = cache.as_observable().size_limit(SizeLimiterOptions::new(10), scheduler.clone() as Rc<dyn Scheduler>);

    let members: Rc<RefCell<HashSet<i32>>> = Rc::new(RefCell::new(HashSet::new()));
    let batches: Rc<RefCell<usize>> = Rc::new(RefCell::new(0));
    let members_clone = members.clone();
    let batches_clone = batches.clone();
    let _subscription = limited.subscribe(move |result| {
        *batches_clone.borrow_mut() += 1;
        for change in result.unwrap().iter() {
            match change.reason() {
                ChangeReason::Add => {
                    members_clone.borrow_mut().insert(*change.key());
                }
                ChangeReason::Remove => {
                    members_clone.borrow_mut().remove(change.key());
                }
                _ => {}
            }
        }
    });

    cache.edit_infallible(|updater| {
        for key in 1..=100 {
            updater.add_or_update(key, key);
        }
    });
    // the +100 adds arrive as their own batch; eviction hasn't run yet.
    assert_eq!(*batches.borrow(), 1);
    assert_eq!(members.borrow().len(), 100);

    scheduler.run_until_idle();
    // the -90 removes arrive as a second, distinct batch.
    assert_eq!(*batches.borrow(), 2);
    assert_eq!(members.borrow().len(), 10);
    assert_eq!(*members.borrow(), (91..=100).collect::<HashSet<_>>());
}

#[test]
fn paging_a_sorted_collection_clamps_past_the_last_page_and_reslices_on_request() {
    let cache: SourceCache<i32, i32> = SourceCache::new();
    let sorted = cache.as_observable().sort(|a, b| a.cmp(b));
    let controller = PageController::new(PageRequest::new(1, 25));
    let paged = sorted.page(&controller);

    let received: Rc<RefCell<Vec<reactive_collections::change_set::ChangeSet<i32, i32>>>> = Rc::new(RefCell::new(Vec::new()));
    let received_clone = received.clone();
    let _subscription = paged.subscribe(move |result| received_clone.borrow_mut().push(result.unwrap()));

    cache.edit_infallible(|updater| {
        for key in 0..100 {
            updater.add_or_update(key, key);
        }
    });
    received.borrow_mut().clear();

    controller.set(PageRequest::new(10, 25));
    let last = received.borrow().last().unwrap().clone();
    match last.kind() {
        ChangeSetKind::Paged { sorted_keys, response } => {
            assert_eq!(response.page, 4);
            assert_eq!(response.total_pages, 4);
            assert_eq!(sorted_keys, &(75..100).collect::<Vec<_>>());
        }
        _ => panic!("expected a Paged change set"),
    }
}

#[derive(Clone, Debug, PartialEq)]
struct Child {
    parent_name: &'static str,
}

#[test]
fn grouping_children_by_parent_then_right_joining_against_parents_keeps_every_group_key() {
    let parents: SourceCache<&str, &str> = SourceCache::new();
    let children: SourceCache<&str, Child> = SourceCache::new();

    parents.edit_infallible(|updater| {
        for name in ["Person1", "Person2", "Person3", "Person4", "Person5", "Person6", "Person7", "Person8", "Person9", "Person10"] {
            updater.add_or_update(name, name);
        }
    });
    children.edit_infallible(|updater| {
        updater.add_or_update("Child1", Child { parent_name: "Person1" });
        updater.add_or_update("Child2", Child { parent_name: "Person1" });
        updater.add_or_update("Child3", Child { parent_name: "Person2" });
        updater.add_or_update("Child4", Child { parent_name: "Person3" });
        updater.add_or_update("Child5", Child { parent_name: "Person3" });
    });

    let grouped = children.as_observable().group(|_key, child| child.parent_name);
    let joined = grouped.right_join(&parents.as_observable());

    let snapshot: Rc<RefCell<std::collections::HashMap<&str, Option<usize>>>> = Rc::new(RefCell::new(std::collections::HashMap::new()));
    let snapshot_clone = snapshot.clone();
    let _subscription = joined.subscribe(move |result| {
        for change in result.unwrap().iter() {
            match change.reason() {
                ChangeReason::Remove => {
                    snapshot_clone.borrow_mut().remove(change.key());
                }
                _ => {
                    let (parent_name, group) = change.current();
                    assert_eq!(parent_name, change.key(), "the joined key always names a real parent");
                    snapshot_clone.borrow_mut().insert(change.key(), group.as_ref().map(|g| g.count()));
                }
            }
        }
    });

    // Every parent appears, including the five with no children at all.
    let snapshot = snapshot.borrow();
    assert_eq!(snapshot.len(), 10);
    assert_eq!(snapshot.get("Person1"), Some(&Some(2)));
    assert_eq!(snapshot.get("Person2"), Some(&Some(1)));
    assert_eq!(snapshot.get("Person3"), Some(&Some(2)));
    assert_eq!(snapshot.get("Person4"), Some(&None));
    assert_eq!(snapshot.get("Person10"), Some(&None));
}

#[test]
fn randomised_edit_sequences_against_a_sorted_view_always_match_a_shadow_model() {
    use itertools::Itertools;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;

    let cache: SourceCache<i32, i32> = SourceCache::new();
    let sorted = cache.as_observable().sort(|a, b| a.cmp(b));

    let last_order: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));
    let last_order_clone = last_order.clone();
    let _subscription = sorted.subscribe(move |result| {
        let change_set = result.unwrap();
        if let Some(sorted_keys) = change_set.kind().sorted_keys() {
            *last_order_clone.borrow_mut() = sorted_keys.to_vec();
        }
    });

    let mut shadow: HashMap<i32, i32> = HashMap::new();
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..200 {
        let key = rng.gen_range(0..20);
        if shadow.contains_key(&key) && rng.gen_bool(0.3) {
            shadow.remove(&key);
            cache.edit_infallible(|updater| updater.remove(key));
        } else {
            let value = rng.gen_range(0..1000);
            shadow.insert(key, value);
            cache.edit_infallible(|updater| updater.add_or_update(key, value));
        }
    }

    let expected: Vec<i32> = shadow.keys().cloned().sorted().collect();
    assert_eq!(*last_order.borrow(), expected);
    assert_eq!(last_order.borrow().len(), shadow.len());
}
