use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use asset_cache::{endpoints::app, network::HttpOrigin, store::CacheStorage, worker::CacheWorker};
use clap::Parser;
use common::config::Config;
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the cached assets on
    #[clap(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Base URL of the server the assets originally come from
    #[clap(long)]
    origin: String,

    /// Name of the cache store, overrides the config file
    #[clap(long)]
    cache_name: Option<String>,

    /// Asset to install, may be repeated. Overrides the manifest from the config file
    #[clap(long = "asset")]
    assets: Vec<String>,

    /// Directory holding the cache stores, defaults to the user cache directory
    #[clap(long)]
    cache_dir: Option<PathBuf>,

    /// Optional TOML config file
    #[clap(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let config = Config::load_or_default(args.config.as_deref())?;
    let cache_name = args.cache_name.unwrap_or(config.cache.name);
    let manifest = if args.assets.is_empty() {
        config.cache.assets
    } else {
        args.assets
    };

    let storage = match args.cache_dir {
        Some(dir) => CacheStorage::new(dir),
        None => CacheStorage::in_user_cache_dir()
            .ok_or_else(|| anyhow!("no cache directory available, pass --cache-dir"))?,
    };
    let origin = HttpOrigin::new(reqwest::Client::new(), &args.origin)?;

    let worker = CacheWorker::open(&storage, &cache_name, manifest, Arc::new(origin)).await?;
    // Only serve once every asset is available offline
    worker.install().await?;

    log::info!("Serving cache {} on {}", cache_name, args.listen);
    axum::Server::bind(&args.listen)
        .serve(app(Arc::new(worker)).into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {err}");
            }
            log::info!("Shutting down");
        })
        .await?;

    Ok(())
}
