//! State tracking for the harvest pipeline
//!
//! # Components
//!
//! - `SiteState`: where a site's listing/pagination loop currently is
//! - `TargetState`: where a single detail target is in its fetch → persist path
//! - `SitePacing`: per-site request spacing used by the rate limiter

mod pacing;
mod target_state;

pub use pacing::SitePacing;
pub use target_state::{SiteState, TargetState};
