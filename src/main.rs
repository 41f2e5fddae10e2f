use anyhow::Context;
use clap::{Parser, Subcommand};
use event_harvester::apis::eventful::{parse_search_page, EventfulClient};
use event_harvester::app::{EventSearchPort, RecordStore, Startup};
use event_harvester::config::Config;
use event_harvester::infra::{ConnectionManager, RemoteStore};
use event_harvester::observability::{init_logging, metrics};
use event_harvester::pipeline::processing::EventNormalizer;
use event_harvester::pipeline::{ExpirySweeper, FetchCityHandler, RefreshHandler, RemoteSink};
use event_harvester::queue::{JobQueue, JobState, JobStore, JobType, NewJob, SqliteJobStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "event_harvester")]
#[command(about = "Harvests event listings from Eventful into the shared event store")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the store and process jobs until Ctrl-C
    Worker,
    /// Enqueue a page-0 fetch for each city
    Seed {
        /// Cities to seed (comma-separated). Defaults to crawl.cities from the config
        #[arg(long)]
        cities: Option<String>,
    },
    /// Enqueue one expiry sweep
    Refresh,
    /// Show the job queue
    Jobs {
        /// Only list jobs in this state (pending, running, completed, failed)
        #[arg(long)]
        state: Option<String>,
    },
    /// Normalize a saved search response and print the result
    Normalize {
        /// JSON file holding one search API response
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(Path::new("logs"));

    match cli.command {
        Commands::Worker => run_worker(&load_config(&cli.config)?).await,
        Commands::Seed { cities } => {
            let config = load_config(&cli.config)?;
            let cities: Vec<String> = match cities {
                Some(list) => list
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                None => config.crawl.cities.clone(),
            };
            if cities.is_empty() {
                warn!("No cities to seed");
                return Ok(());
            }
            let queue = open_queue(&config)?;
            for city in &cities {
                let job = queue.enqueue(NewJob::fetch_city(city.as_str(), 0)).await?;
                println!("Enqueued fetchCity {} ({})", city, job.id);
            }
            Ok(())
        }
        Commands::Refresh => {
            let queue = open_queue(&load_config(&cli.config)?)?;
            let job = queue.enqueue(NewJob::refresh()).await?;
            println!("Enqueued refresh ({})", job.id);
            Ok(())
        }
        Commands::Jobs { state } => {
            let store = SqliteJobStore::open(&load_config(&cli.config)?.queue.db_path)?;
            show_jobs(&store, state.as_deref()).await
        }
        Commands::Normalize { file } => normalize_file(&file),
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::load(path).with_context(|| format!("loading {}", path.display()))
}

fn open_queue(config: &Config) -> anyhow::Result<JobQueue> {
    let store = SqliteJobStore::open(&config.queue.db_path)
        .with_context(|| format!("opening job store {}", config.queue.db_path.display()))?;
    Ok(JobQueue::new(Arc::new(store)).with_poll_interval(config.queue.poll_interval()))
}

async fn run_worker(config: &Config) -> anyhow::Result<()> {
    if let Err(e) = metrics::init(config.metrics.listen) {
        warn!("Metrics disabled: {}", e);
    }

    let connection = Arc::new(ConnectionManager::new(&config.store, config.upstream.timeout())?);
    let startup = Startup::new();
    startup
        .run(connection.as_ref())
        .await
        .context("connecting to the event store")?;

    let store: Arc<dyn RecordStore> = Arc::new(RemoteStore::new(connection.clone()));
    let search: Arc<dyn EventSearchPort> = Arc::new(EventfulClient::new(&config.upstream)?);

    let mut queue = open_queue(config)?;
    let fetch = FetchCityHandler::new(
        search.clone(),
        RemoteSink::new(store.clone()),
        queue.enqueuer(),
        config.crawl.max_pages_per_city,
    );
    queue.register_handler(JobType::FetchCity, Arc::new(fetch))?;
    queue.register_handler(
        JobType::Refresh,
        Arc::new(RefreshHandler::new(ExpirySweeper::new(store, search))),
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested, finishing in-flight jobs"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    info!("Worker running ({})", startup.phase());
    Arc::new(queue).run(shutdown_rx).await?;
    Ok(())
}

async fn show_jobs(store: &SqliteJobStore, state: Option<&str>) -> anyhow::Result<()> {
    let filter = match state {
        Some(s) => Some(JobState::parse(s).with_context(|| format!("unknown job state '{}'", s))?),
        None => None,
    };

    let counts = store.counts().await?;
    for state in [JobState::Pending, JobState::Running, JobState::Completed, JobState::FailedTerminal] {
        println!("{:<10} {}", state, counts.get(&state).copied().unwrap_or(0));
    }
    println!();

    for job in store.list(filter).await? {
        let last_failure = job.failure_log.last().map(|f| f.reason.as_str()).unwrap_or("");
        println!(
            "{}  {:<9} {:<9} {:<8} failures={} run_after={}  {}",
            job.id,
            job.job_type(),
            job.state,
            format!("{:?}", job.priority).to_lowercase(),
            job.failures,
            job.run_after.format("%Y-%m-%d %H:%M:%S"),
            last_failure
        );
    }
    Ok(())
}

fn normalize_file(path: &Path) -> anyhow::Result<()> {
    let body = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let page = parse_search_page(&body)?;
    let normalizer = EventNormalizer::new();
    let events: Vec<_> = page.events.iter().filter_map(|raw| normalizer.normalize(raw)).collect();
    info!("Normalized {} of {} events", events.len(), page.events.len());
    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(())
}
