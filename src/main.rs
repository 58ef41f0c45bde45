#![recursion_limit = "128"]

pub use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};
use tracing_subscriber::{
    fmt::{format::FmtSpan, Subscriber},
    prelude::*,
    EnvFilter,
};

use poi_crawler::config::{self, Config, DataSource};
use poi_crawler::crawler::CrawlerWorker;
use poi_crawler::persistence::{PersistenceWorker, PgPoiStore};
use poi_crawler::poi::RecordSource;
use poi_crawler::seeder::{self, TaskSeeder};
use poi_crawler::store::redis::Redis;
use poi_crawler::store::{CoordinationStore, CoordinationStoreNew};
use poi_crawler::upstream::baidu::BaiduClient;
use poi_crawler::upstream::gaode::GaodeClient;
use poi_crawler::upstream::proxy::HttpProxyPool;
use poi_crawler::upstream::{self, shared_http_client, UpstreamClient};
use poi_crawler::{akmanager, monitor, rehydrator};

/// Default local proxy-rotation service endpoint, queried for a fresh
/// proxy address before each upstream request when `common.proxy = true`.
const DEFAULT_PROXY_ENDPOINT: &str = "http://127.0.0.1:5010/get";

/// Our command-line arguments.
#[derive(Debug, Parser)]
#[command(author, version, about = "distributed point-of-interest crawler")]
struct Opt {
    /// Path to the INI configuration file.
    #[arg(long = "config", short = 'c', default_value = "poi-crawler.ini")]
    config_path: PathBuf,

    /// Command to run.
    #[command(subcommand)]
    cmd: Command,
}

/// Subcommands for poi-crawler, one per original standalone script
/// (`AkManager.py`, `Monitor.py`, `PushRegion.py`, `PushVisitStatus.py`,
/// `Spider.py`, `Persist.py`).
#[derive(Debug, Subcommand)]
enum Command {
    /// Manage the credential pool.
    Akmanager {
        #[command(subcommand)]
        action: AkAction,
    },
    /// Print the four coordination-store collection sizes.
    Monitor,
    /// Seed the task queue for one region/keyword pair. Whether `region`
    /// names a city (city mode) or is resolved against the configured grid
    /// file (grid mode) is controlled by the config file's `common.mode`.
    PushRegion {
        /// A city name (city mode) or a city/province name/`"*"` resolved
        /// against `common.city_file` (grid mode).
        region: String,
        /// The search keyword/category to crawl.
        keyword: String,
    },
    /// Rehydrate the visited set from the downstream Poi table.
    PushVisitStatus,
    /// Launch a crawler worker, draining the task queue forever.
    Spider {
        /// Re-fetch and re-store POIs already marked visited, without
        /// duplicating their result-queue entry. Defaults to the config
        /// file's `common.update`.
        #[arg(long)]
        update: bool,
    },
    /// Launch the persistence worker, draining the result queue forever.
    Persist,
}

#[derive(Debug, Subcommand)]
enum AkAction {
    /// Replace the credential set with the contents of a file.
    Reset {
        /// Path to a file of credentials, one per line.
        path: PathBuf,
    },
    /// Print how many credentials remain.
    Count,
    /// Print every remaining credential.
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env();
    Subscriber::builder()
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_env_filter(filter)
        .finish()
        .init();
    let _span = info_span!("poi-crawler").entered();
    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let opt = Opt::parse();
    let config = Config::from_path(&opt.config_path)?;

    let store: Arc<dyn CoordinationStore> = Arc::new(Redis::new(&config.redis).await?);
    store.ping().await?;

    match opt.cmd {
        Command::Akmanager { action } => run_akmanager(&store, action).await,
        Command::Monitor => run_monitor(&store).await,
        Command::PushRegion { region, keyword } => {
            run_push_region(&store, &config, &region, &keyword).await
        }
        Command::PushVisitStatus => run_push_visit_status(&config, store.as_ref()).await,
        Command::Spider { update } => run_spider(store, &config, update || config.update).await,
        Command::Persist => run_persist(store, &config).await,
    }
}

async fn run_akmanager(store: &Arc<dyn CoordinationStore>, action: AkAction) -> Result<()> {
    match action {
        AkAction::Reset { path } => {
            let n = akmanager::reset(store, &path).await?;
            println!("reset credential set: {} credentials loaded", n);
        }
        AkAction::Count => {
            println!("{}", akmanager::count(store).await?);
        }
        AkAction::List => {
            for credential in akmanager::list(store).await? {
                println!("{}", credential);
            }
        }
    }
    Ok(())
}

async fn run_monitor(store: &Arc<dyn CoordinationStore>) -> Result<()> {
    println!("{}", monitor::snapshot(store).await?);
    Ok(())
}

async fn run_push_region(
    store: &Arc<dyn CoordinationStore>,
    config: &Config,
    region: &str,
    keyword: &str,
) -> Result<()> {
    let seeder = TaskSeeder::new(store.clone());
    let count = match config.mode {
        config::SeedMode::City if region == "*" => seeder.seed_cities(&config.cities, keyword).await?,
        config::SeedMode::City => {
            seeder.push_task(region, keyword).await?;
            1
        }
        config::SeedMode::Grid => {
            let city_file = config
                .city_file
                .as_deref()
                .ok_or_else(|| anyhow::format_err!("grid mode requires common.city_file"))?;
            let entries = seeder::load_grid_file(city_file)?;
            seeder
                .seed_grid_region(&entries, region, config.geohash_length, keyword)
                .await?
        }
    };
    info!(count, "seeded tasks");
    Ok(())
}

async fn run_push_visit_status(config: &Config, store: &dyn CoordinationStore) -> Result<()> {
    let count = rehydrator::rehydrate(&config.database, store).await?;
    println!("rehydrated {} visited uids", count);
    Ok(())
}

async fn run_spider(store: Arc<dyn CoordinationStore>, config: &Config, update: bool) -> Result<()> {
    let http = shared_http_client();
    let proxy = if config.proxy {
        let endpoint = DEFAULT_PROXY_ENDPOINT.parse().expect("built-in proxy endpoint is valid");
        Some(Arc::new(HttpProxyPool::new(http.clone(), endpoint)) as Arc<dyn upstream::proxy::ProxyPool>)
    } else {
        None
    };
    let upstream: Arc<dyn UpstreamClient> = match (config.data_source, proxy) {
        (DataSource::Baidu, Some(proxy)) => Arc::new(BaiduClient::with_proxy(http, proxy)),
        (DataSource::Baidu, None) => Arc::new(BaiduClient::new(http)),
        (DataSource::Gaode, Some(proxy)) => Arc::new(GaodeClient::with_proxy(http, proxy)),
        (DataSource::Gaode, None) => Arc::new(GaodeClient::new(http)),
    };
    let source = RecordSource::from(config.data_source);
    let worker = CrawlerWorker::new(store, upstream, config.categories.clone(), source, update);
    warn!("spider worker starting");
    worker.run().await
}

async fn run_persist(store: Arc<dyn CoordinationStore>, config: &Config) -> Result<()> {
    let poi_store = PgPoiStore::new(&config.database).await?;
    let mut worker = PersistenceWorker::new(store, poi_store);
    worker.run().await
}
