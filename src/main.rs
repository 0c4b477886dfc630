use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use fitfeed::application::{
    BackoffOutcome, FeedPrefetcher, ImageFetcher, PrefetchConfig, ReachabilityGate,
};
use fitfeed::domain::{FeedError, FeedPost};
use fitfeed::domain::entities::PurgeReason;
use fitfeed::infrastructure::image::target_pixel_size;
use fitfeed::infrastructure::{
    AppConfig, CliArgs, Command, FeedClient, HttpImageSource, ImageLoader, MemoryImageCache,
    StorageManager, TcpPathMonitor,
};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let storage = StorageManager::new()?;
    let mut config = storage.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

fn build_loader(config: &AppConfig) -> Result<Arc<ImageLoader>> {
    let mut cache = MemoryImageCache::new(config.cache.cost_limit_bytes());
    if let Some(max_age) = config.cache.max_age() {
        cache = cache.with_max_age(max_age);
    }

    let source = HttpImageSource::new(&config.http_source_config())?;

    Ok(Arc::new(ImageLoader::new(
        Arc::new(cache),
        Arc::new(source),
        config.loader_config(),
    )))
}

async fn run_load(
    loader: &Arc<ImageLoader>,
    config: &AppConfig,
    url: &str,
    points: f32,
    repeat: u32,
) {
    let pixel_size = target_pixel_size(points, config.prefetch.display_scale);
    let fetcher = ImageFetcher::new(loader.clone(), pixel_size);

    for attempt in 1..=repeat.max(1) {
        match fetcher.load(url).await {
            Some(image) => println!(
                "#{attempt}: {}x{} ({} px bound)",
                image.width(),
                image.height(),
                pixel_size
            ),
            None => println!("#{attempt}: no image ({:?})", fetcher.state()),
        }
    }
}

async fn download_feed(
    config: &AppConfig,
    feed_client: &FeedClient,
    source: &str,
) -> Result<Vec<FeedPost>> {
    if !(source.starts_with("http://") || source.starts_with("https://")) {
        return Ok(feed_client.load(source).await?);
    }

    let monitor = TcpPathMonitor::new(
        config.network.probe_addr.clone(),
        config.network.probe_interval(),
        config.network.probe_timeout(),
    );
    let (mut reachability, _monitor_task) = monitor.start();
    let gate = ReachabilityGate::new(reachability.clone());

    // Give the first probe a chance before the gate looks at the state.
    let _ = tokio::time::timeout(
        config.network.probe_timeout().saturating_mul(2),
        reachability.changed(),
    )
    .await;

    let slot: Mutex<Option<Vec<FeedPost>>> = Mutex::new(None);
    let (client, slot_ref) = (feed_client, &slot);
    let outcome = gate
        .run_with_backoff_filtered(
            move || async move {
                let posts = client.fetch_page(source).await?;
                *slot_ref.lock() = Some(posts);
                Ok::<(), FeedError>(())
            },
            FeedError::is_retryable,
        )
        .await;
    monitor.stop();

    match outcome {
        BackoffOutcome::Abandoned { attempt } => {
            return Err(eyre!(
                "feed source {source} rejected the request on attempt {attempt}"
            ));
        }
        BackoffOutcome::BestEffort => warn!("Feed download ran past its retry budget"),
        BackoffOutcome::Skipped | BackoffOutcome::Succeeded { .. } => {}
    }

    slot.into_inner().ok_or_else(|| eyre!("could not download feed from {source}"))
}

async fn run_prefetch(loader: &Arc<ImageLoader>, config: &AppConfig, source: &str) -> Result<()> {
    let feed_client = FeedClient::new(
        config.network.request_timeout(),
        &config.http_source_config().user_agent,
    )?;
    let posts = download_feed(config, &feed_client, source).await?;
    info!(posts = posts.len(), "Feed loaded");

    let prefetcher = FeedPrefetcher::new(
        loader.clone(),
        PrefetchConfig {
            max_items: config.prefetch.max_items,
            avatar_pixel_size: config.prefetch.avatar_pixel_size(),
            thumbnail_pixel_size: config.prefetch.thumbnail_pixel_size(),
            index_capacity: config.prefetch.index_capacity,
        },
    );

    let summary = prefetcher.prefetch(&posts).await;
    println!(
        "requested {}, already cached {}, fetched {}, failed {}",
        summary.requested, summary.already_cached, summary.fetched, summary.failed
    );

    for post in posts.iter().take(config.prefetch.max_items) {
        println!(
            "{} @{}: {} image(s) ready",
            post.id,
            post.author.username,
            prefetcher.images_for(&post.id).len()
        );
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(version = fitfeed::VERSION, "Starting fitfeed");

    let loader = build_loader(&config)?;
    let (purge_tx, purge_rx) = broadcast::channel(4);
    let purge_listener = loader.spawn_purge_listener(purge_rx);

    match &args.command {
        Command::Load {
            url,
            points,
            repeat,
        } => run_load(&loader, &config, url, *points, *repeat).await,
        Command::Prefetch { feed } => run_prefetch(&loader, &config, feed).await?,
    }

    println!("{}", loader.memory_cache_stats());

    let _ = purge_tx.send(PurgeReason::Backgrounded);
    drop(purge_tx);
    purge_listener.await?;

    Ok(())
}
