//! Timeline: chronological organization of merged events and their
//! clustering into episodes.
//!
//! Both stages are pure functions over an immutable event snapshot: the
//! organizer filters to the disclosure window and orders, the clusterer
//! groups the dated sequence into hospital/category runs.

pub mod category;
pub mod episodes;
pub mod organize;
pub mod types;

pub use category::{categorize, default_rules, CategoryRule, FALLBACK_CATEGORY};
pub use episodes::{cluster_events, validate_episodes, ClusterConfig};
pub use organize::{sort_and_filter, window_start};
pub use types::*;
