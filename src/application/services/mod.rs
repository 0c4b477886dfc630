pub mod feed_prefetcher;
pub mod image_fetcher;
pub mod reachability_gate;

pub use feed_prefetcher::{FeedPrefetcher, PrefetchConfig, PrefetchSummary};
pub use image_fetcher::ImageFetcher;
pub use reachability_gate::{BackoffOutcome, BackoffPolicy, ReachabilityGate};
