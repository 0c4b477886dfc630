//! Application layer with the services callers drive.

/// Fetcher, prefetcher and reachability gate.
pub mod services;

pub use services::{
    BackoffOutcome, BackoffPolicy, FeedPrefetcher, ImageFetcher, PrefetchConfig, PrefetchSummary,
    ReachabilityGate,
};
