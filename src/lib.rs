//! Fitfeed - image caching and feed prefetching for a fitness social feed.
//!
//! This crate provides a cost-bounded memory cache of display-sized images,
//! a cancellable per-view fetcher, a batch prefetcher for feed posts and a
//! reachability-gated retry helper for best-effort background work.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing the fetcher, prefetcher and gate services.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for external services.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "fitfeed";
