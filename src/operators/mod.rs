//! The operator algebra: each operator is a trait with one extension
//! method, implemented for [`crate::observable::ChangeSetObservable`].
//! `use reactive_collections::operators::*;` brings every `.filter(...)`,
//! `.sort(...)`, `.group(...)` etc. into scope.

pub mod distinct;
pub mod expire_after;
pub mod filter;
pub mod group;
pub mod join;
pub mod misc;
pub mod observable_cache;
pub mod page;
pub mod publish_ref_count;
pub mod set_algebra;
pub mod size_limiter;
pub mod sort;
pub mod subscribe_many;
pub mod top;
pub mod transform;
pub mod transform_many;
pub mod transform_to_tree;
pub mod virtualise;

pub use distinct::Distinct;
pub use expire_after::ExpireAfter;
pub use filter::Filter;
pub use group::{Group, GroupWithImmutableState, ImmutableGroup};
pub use join::{FullJoin, InnerJoin, LeftJoin, RightJoin};
pub use misc::{
    Batch, BatchIf, ChangeKey, ForEachChange, IgnoreUpdateWhen, QueryWhenChanged, WhereReasonsAre, WhereReasonsAreNot,
};
pub use observable_cache::{AsObservableCache, ObservableCache};
pub use page::Page;
pub use publish_ref_count::PublishRefCount;
pub use set_algebra::{And, Except, Or, Xor};
pub use size_limiter::SizeLimit;
pub use sort::Sort;
pub use subscribe_many::{DisposeMany, SubscribeMany};
pub use top::Top;
pub use transform::{Transform, TransformSafe};
pub use transform_many::TransformMany;
pub use transform_to_tree::TransformToTree;
pub use virtualise::Virtualise;
