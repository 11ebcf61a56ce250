//! URL handling for the harvester
//!
//! Listing and detail pages hand back links in whatever shape the remote
//! site prints them. Two helpers live here:
//!
//! - `resolve_link` turns an `href` into an absolute, fetchable URL
//! - `canonical_url` produces the stable form used inside identity keys

mod normalize;

pub use normalize::{canonical_url, resolve_link};
