//! An incremental, keyed reactive collection engine.
//!
//! A [`source_cache::SourceCache`] is the root of a dataflow: a host mutates
//! it inside an [`source_cache::SourceCache::edit`] scope, and every
//! downstream [`observable::ChangeSetObservable`] built from it (via the
//! operator traits in [`operators`]) receives one consolidated
//! [`change_set::ChangeSet`] per scope, describing exactly what changed and
//! why — a "batch of changes in, batch of changes out" contract for one
//! host process's in-memory collections, where a collection is keyed (one
//! value per key) rather than a general multiset.
//!
//! # Example
//!
//! ```
//! use reactive_collections::operators::Filter;
//! use reactive_collections::source_cache::SourceCache;
//!
//! let cache: SourceCache<&str, i32> = SourceCache::new();
//! let adults = cache.as_observable().filter(|age: &i32| *age >= 18);
//!
//! let mut last_count = 0;
//! let _subscription = adults.subscribe(move |result| {
//!     last_count = result.unwrap().len();
//! });
//!
//! cache.edit_infallible(|updater| {
//!     updater.add_or_update("Alice", 30);
//!     updater.add_or_update("Bob", 12);
//! });
//! ```

pub mod adaptors;
pub mod cache;
pub mod change;
pub mod change_set;
pub mod config;
pub mod consolidation;
pub mod controllers;
pub mod error;
pub mod logging;
pub mod node;
pub mod observable;
pub mod operators;
pub mod scheduler;
pub mod source_cache;
pub mod status;

pub use change::{Change, ChangeReason};
pub use change_set::{ChangeSet, ChangeSetBuilder, ChangeSetKind};
pub use error::Error;
pub use observable::{ChangeSetObservable, ChangeSetResult, ChangeSetSource, Subject, Subscription};
pub use source_cache::SourceCache;
