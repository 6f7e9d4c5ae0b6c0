//! The scheduler abstraction ("no thread spawning; a host
//! supplies a `now`/`schedule`/`scheduleAfter`/`scheduleRecurring`
//! injectable") plus [`VirtualScheduler`], the deterministic, manually-advanced
//! scheduler this crate's own tests run against.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::Duration;

use fnv::{FnvHashMap, FnvHashSet};

use crate::observable::Subscription;

/// An injectable source of time and deferred/periodic work. Operators that
/// need to defer (`expire_after`'s polling mode, `deferUntilLoaded`'s retry,
/// batching windows) take a `Rc<dyn Scheduler>` rather than spawning a
/// thread or calling a wall-clock sleep directly.
pub trait Scheduler {
    /// Elapsed virtual time since this scheduler was created.
    fn now(&self) -> Duration;

    /// Runs `action` the next time this scheduler is driven. Returns a
    /// subscription that cancels the action if disposed before it runs.
    fn schedule(&self, action: Box<dyn FnOnce()>) -> Subscription;

    /// Runs `action` once, after at least `delay` has elapsed.
    fn schedule_after(&self, delay: Duration, action: Box<dyn FnOnce()>) -> Subscription;

    /// Runs `action` every `period`, starting after the first `period`
    /// elapses, until the returned subscription is disposed.
    fn schedule_recurring(&self, period: Duration, action: Box<dyn FnMut()>) -> Subscription;
}

struct Scheduled {
    due: Duration,
    sequence: u64,
    id: u64,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.sequence == other.sequence
    }
}
impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest-due item sorts highest.
        other.due.cmp(&self.due).then_with(|| other.sequence.cmp(&self.sequence))
    }
}

enum Action {
    Once(Box<dyn FnOnce()>),
    Recurring { period: Duration, action: Box<dyn FnMut()> },
}

struct Inner {
    now: Duration,
    next_sequence: u64,
    next_id: u64,
    queue: BinaryHeap<Scheduled>,
    actions: FnvHashMap<u64, Action>,
    cancelled: FnvHashSet<u64>,
}

/// A deterministic scheduler with no wall-clock dependency: time only
/// advances when [`VirtualScheduler::advance`] (or [`VirtualScheduler::run_until_idle`])
/// is called. This is the primary vehicle for testing anything time-sensitive
/// in this crate (expiry, batching windows, retry backoff) without real
/// sleeps.
#[derive(Clone)]
pub struct VirtualScheduler {
    inner: Rc<RefCell<Inner>>,
}

impl Default for VirtualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualScheduler {
    pub fn new() -> Self {
        VirtualScheduler {
            inner: Rc::new(RefCell::new(Inner {
                now: Duration::ZERO,
                next_sequence: 0,
                next_id: 0,
                queue: BinaryHeap::new(),
                actions: FnvHashMap::default(),
                cancelled: FnvHashSet::default(),
            })),
        }
    }

    /// Advances virtual time by `delta`, running every action whose due time
    /// falls at or before the new `now`, in due-time order (ties broken by
    /// schedule order). Recurring actions are re-queued for `due + period`.
    pub fn advance(&self, delta: Duration) {
        let target = self.inner.borrow().now + delta;
        loop {
            let next_due = {
                let inner = self.inner.borrow();
                inner.queue.peek().map(|scheduled| scheduled.due)
            };
            match next_due {
                Some(due) if due <= target => {
                    let scheduled = self.inner.borrow_mut().queue.pop().unwrap();
                    self.inner.borrow_mut().now = due;
                    self.run_due(scheduled.id);
                }
                _ => break,
            }
        }
        self.inner.borrow_mut().now = target;
    }

    /// Repeatedly advances to the next scheduled due time until nothing
    /// remains queued. Useful in tests that don't care about exact timing,
    /// only that everything eventually runs.
    pub fn run_until_idle(&self) {
        loop {
            let next_due = self.inner.borrow().queue.peek().map(|scheduled| scheduled.due);
            match next_due {
                Some(due) => {
                    let now = self.inner.borrow().now;
                    self.advance(due.saturating_sub(now));
                }
                None => break,
            }
        }
    }

    fn run_due(&self, id: u64) {
        if self.inner.borrow().cancelled.contains(&id) {
            self.inner.borrow_mut().cancelled.remove(&id);
            self.inner.borrow_mut().actions.remove(&id);
            return;
        }
        let action = self.inner.borrow_mut().actions.remove(&id);
        match action {
            Some(Action::Once(action)) => action(),
            Some(Action::Recurring { period, mut action }) => {
                action();
                let mut inner = self.inner.borrow_mut();
                let due = inner.now + period;
                let sequence = inner.next_sequence;
                inner.next_sequence += 1;
                inner.queue.push(Scheduled { due, sequence, id });
                inner.actions.insert(id, Action::Recurring { period, action });
            }
            None => {}
        }
    }

    fn enqueue(&self, due: Duration, action: Action) -> Subscription {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.queue.push(Scheduled { due, sequence, id });
        inner.actions.insert(id, action);
        drop(inner);

        let inner = self.inner.clone();
        Subscription::new(move || {
            inner.borrow_mut().cancelled.insert(id);
        })
    }
}

impl Scheduler for VirtualScheduler {
    fn now(&self) -> Duration {
        self.inner.borrow().now
    }

    fn schedule(&self, action: Box<dyn FnOnce()>) -> Subscription {
        let due = self.now();
        self.enqueue(due, Action::Once(action))
    }

    fn schedule_after(&self, delay: Duration, action: Box<dyn FnOnce()>) -> Subscription {
        let due = self.now() + delay;
        self.enqueue(due, Action::Once(action))
    }

    fn schedule_recurring(&self, period: Duration, action: Box<dyn FnMut()>) -> Subscription {
        let due = self.now() + period;
        self.enqueue(due, Action::Recurring { period, action })
    }
}
