//! The error taxonomy surfaced at this crate's API boundary.
//!
//! Every edit and every user callback (predicate, projection, comparator,
//! selector) is a potential failure point that must be attributable to a
//! key, so failures are reported through a small, matchable `Error<K>`
//! enum rather than propagated as panics. `thiserror` derives the
//! boilerplate (see `DESIGN.md`).

use std::fmt;
use std::rc::Rc;

use thiserror::Error;

/// Failures that are detected synchronously, independent of any user
/// callback: malformed parameters, or use of a disposed resource.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContractViolation {
    #[error("page must be >= 1, got {0}")]
    NonPositivePage(i64),
    #[error("page size must be >= 1, got {0}")]
    NonPositivePageSize(i64),
    #[error("start index must be >= 0, got {0}")]
    NegativeStartIndex(i64),
    #[error("window size must be >= 0, got {0}")]
    NegativeWindowSize(i64),
    #[error("limit must be >= 0, got {0}")]
    NegativeLimit(i64),
    #[error("operation attempted on a disposed source")]
    Disposed,
}

/// A type-erased cause for a [`Error::Callback`] failure. Callbacks are
/// arbitrary user closures (predicates, projections, comparators,
/// selectors); the engine cannot know their error type ahead of time.
///
/// `Rc` rather than `Box` so `Error<K>` itself can be `Clone` — every change-
/// set stream is a `Result<Rc<ChangeSet<K, V>>, Error<K>>` broadcast through
/// a `Subject`, which clones its payload to each subscriber.
pub type CallbackCause = Rc<dyn std::error::Error + 'static>;

/// The unified error type surfaced at the edges of the engine: from
/// `SourceCache::edit`, and from any non-`safe` operator whose user callback
/// errored.
///
/// `thiserror`'s derive can't express the `Callback` variant's
/// key-dependent message (it needs a `K: Debug` bound the macro can't infer),
/// so `Display`/`Error` are implemented by hand for this one type; every
/// other error type in the crate uses the derive.
#[derive(Debug, Clone)]
pub enum Error<K> {
    /// A predicate, projection, comparator or selector failed.
    Callback { key: Option<K>, cause: CallbackCause },
    /// A parameter or precondition was violated, independent of user data.
    Contract(ContractViolation),
    /// The source this stream is attached to has been disposed.
    Disposed,
}

impl<K: fmt::Debug> fmt::Display for Error<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Callback { key: Some(key), .. } => write!(f, "callback failed for key {key:?}"),
            Error::Callback { key: None, .. } => write!(f, "callback failed"),
            Error::Contract(violation) => write!(f, "{violation}"),
            Error::Disposed => write!(f, "source has been disposed"),
        }
    }
}

impl<K: fmt::Debug> std::error::Error for Error<K> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Callback { cause, .. } => Some(cause.as_ref()),
            Error::Contract(violation) => Some(violation),
            Error::Disposed => None,
        }
    }
}

impl<K> From<ContractViolation> for Error<K> {
    fn from(violation: ContractViolation) -> Self {
        Error::Contract(violation)
    }
}

impl<K> Error<K> {
    pub fn callback(key: Option<K>, cause: impl std::error::Error + 'static) -> Self {
        Error::Callback { key, cause: Rc::new(cause) }
    }

    pub fn key(&self) -> Option<&K> {
        match self {
            Error::Callback { key, .. } => key.as_ref(),
            Error::Contract(_) | Error::Disposed => None,
        }
    }
}

/// The outcome of a single `SourceCache::edit` scope.
pub type EditResult<T> = Result<T, ContractViolation>;
