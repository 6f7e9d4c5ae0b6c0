//! Structured diagnostic events: a closed, `Serialize`/`Deserialize`-derived
//! enum of typed events plus a thin callback `Logger`, rather than an
//! external `log`/`tracing` facade. A host wires a `Logger` to whatever sink
//! it likes (stdout, a file, an actual `tracing` subscriber) — this crate
//! never assumes one exists.

use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One diagnostic event. Every variant names the collection or operator
/// producing it by a plain `&'static str` identifier rather than a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// An edit scope was opened and closed.
    EditScope(EditScopeEvent),
    /// A change set was emitted downstream from some source or operator.
    Emit(EmitEvent),
    /// A new subscription was established.
    Subscribe(SubscribeEvent),
    /// A subscription was disposed.
    Unsubscribe(UnsubscribeEvent),
    /// One or more items were expired by `expire_after`.
    Expire(ExpireEvent),
    /// `SizeLimiter` evicted items to stay within its bound.
    SizeLimit(SizeLimitEvent),
    /// `TransformSafe`'s projection failed for one item and was routed to
    /// its error sink instead of propagating.
    TransformFailure(TransformFailureEvent),
}

impl From<EditScopeEvent> for Event {
    fn from(event: EditScopeEvent) -> Self {
        Event::EditScope(event)
    }
}
impl From<EmitEvent> for Event {
    fn from(event: EmitEvent) -> Self {
        Event::Emit(event)
    }
}
impl From<SubscribeEvent> for Event {
    fn from(event: SubscribeEvent) -> Self {
        Event::Subscribe(event)
    }
}
impl From<UnsubscribeEvent> for Event {
    fn from(event: UnsubscribeEvent) -> Self {
        Event::Unsubscribe(event)
    }
}
impl From<ExpireEvent> for Event {
    fn from(event: ExpireEvent) -> Self {
        Event::Expire(event)
    }
}
impl From<SizeLimitEvent> for Event {
    fn from(event: SizeLimitEvent) -> Self {
        Event::SizeLimit(event)
    }
}
impl From<TransformFailureEvent> for Event {
    fn from(event: TransformFailureEvent) -> Self {
        Event::TransformFailure(event)
    }
}

/// A `SourceCache::edit` scope closed, successfully or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditScopeEvent {
    pub source: &'static str,
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
    pub refreshes: usize,
    pub emitted: bool,
}

/// A change set left an operator or source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitEvent {
    pub operator: &'static str,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeEvent {
    pub operator: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeEvent {
    pub operator: &'static str,
}

/// Items expired from an `expire_after` operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireEvent {
    pub operator: &'static str,
    pub count: usize,
}

/// Items evicted by a `SizeLimiter`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeLimitEvent {
    pub operator: &'static str,
    pub evicted: usize,
    pub limit: usize,
}

/// A `TransformSafe` projection raised an error for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformFailureEvent {
    pub operator: &'static str,
}

/// A sink for [`Event`]s. Cheap to clone (an `Rc` around the callback), so it
/// can be threaded through an operator chain the way a `Scheduler` is.
#[derive(Clone)]
pub struct Logger {
    sink: Rc<dyn Fn(Duration, Event)>,
    start: std::time::Instant,
}

impl Logger {
    pub fn new(sink: impl Fn(Duration, Event) + 'static) -> Self {
        Logger { sink: Rc::new(sink), start: std::time::Instant::now() }
    }

    /// A logger that discards every event; the default when a host doesn't
    /// care to observe diagnostics.
    pub fn noop() -> Self {
        Logger::new(|_, _| {})
    }

    pub fn log(&self, event: impl Into<Event>) {
        (self.sink)(self.start.elapsed(), event.into());
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn logger_forwards_every_event_to_its_sink() {
        let events: Rc<RefCell<Vec<Event>>> = Rc::new(RefCell::new(Vec::new()));
        let events_clone = events.clone();
        let logger = Logger::new(move |_elapsed, event| events_clone.borrow_mut().push(event));
        logger.log(EditScopeEvent { source: "orders", adds: 1, updates: 0, removes: 0, refreshes: 0, emitted: true });
        assert_eq!(events.borrow().len(), 1);
    }

    #[test]
    fn noop_logger_drops_events_silently() {
        let logger = Logger::noop();
        logger.log(SubscribeEvent { operator: "filter" });
    }
}
