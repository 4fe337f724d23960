use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use resilient_fetch::config::{load_config, ResilienceConfig};
use resilient_fetch::connection::{ConnectionMonitor, ManualNetwork, NetworkPlatform, ProbeNetwork};
use resilient_fetch::http::{HttpRequest, ReqwestSender};
use resilient_fetch::observability::logging;
use resilient_fetch::queue::{DrainOutcome, FileStorage, NewRequest, OfflineQueue, RequestPriority};

#[derive(Parser)]
#[command(name = "queue-cli")]
#[command(about = "Inspect and edit the persisted offline request queue", long_about = None)]
struct Cli {
    /// Agent configuration file (storage location, transport, probe URL)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Counts by state
    Status,
    /// Every entry in replay order
    List,
    /// Queue a request for replay
    Enqueue {
        #[arg(short = 'X', long, default_value = "POST")]
        method: String,
        url: String,
        #[arg(short, long)]
        data: Option<String>,
        /// `Name: value`, repeatable
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        #[arg(short, long, default_value = "normal")]
        priority: RequestPriority,
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Remove one entry by id
    Remove { id: String },
    /// Remove succeeded and failed entries
    ClearCompleted,
    /// Remove every entry
    ClearAll,
    /// Remove entries older than the given age (default from config)
    PurgeStale {
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
    /// Probe the connection and replay pending entries now
    Drain,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        ResilienceConfig::default()
    };
    logging::init(&config.observability);

    // Only `drain` talks to the backend; every other command sees the
    // network as offline so nothing is dispatched behind the user's back.
    let probe = Arc::new(ProbeNetwork::new(config.connection.clone()));
    let platform: Arc<dyn NetworkPlatform> = match cli.command {
        Commands::Drain => probe.clone(),
        _ => Arc::new(ManualNetwork::new(false)),
    };
    let monitor = Arc::new(ConnectionMonitor::new(platform, &config.connection));
    monitor.refresh();
    let storage = Arc::new(FileStorage::open(
        &config.storage.directory,
        config.storage.max_bytes,
    )?);
    let sender = Arc::new(ReqwestSender::new(&config.transport)?);
    let queue = Arc::new(OfflineQueue::load(
        config.queue.clone(),
        storage,
        sender,
        monitor.clone(),
    ));

    match cli.command {
        Commands::Status => {
            print_json(&queue.status())?;
        }
        Commands::List => {
            print_json(&queue.snapshot())?;
        }
        Commands::Enqueue {
            method,
            url,
            data,
            headers,
            priority,
            max_attempts,
        } => {
            let mut request = HttpRequest::new(method, url);
            for header in &headers {
                let Some((name, value)) = header.split_once(':') else {
                    return Err(format!("malformed header '{}', expected 'Name: value'", header).into());
                };
                request = request.header(name.trim(), value.trim());
            }
            if let Some(data) = data {
                request = request.body(data);
            }

            let mut new = NewRequest::new(request).priority(priority);
            if let Some(max_attempts) = max_attempts {
                new = new.max_attempts(max_attempts);
            }
            println!("{}", queue.enqueue(new));
        }
        Commands::Remove { id } => {
            if !queue.remove(&id) {
                eprintln!("Error: no queued request with id {}", id);
                std::process::exit(1);
            }
        }
        Commands::ClearCompleted => {
            println!("{}", queue.clear_completed());
        }
        Commands::ClearAll => {
            println!("{}", queue.clear_all());
        }
        Commands::PurgeStale { max_age_secs } => {
            let removed = match max_age_secs {
                Some(secs) => queue.remove_stale(Duration::from_secs(secs)),
                None => queue.remove_stale_default(),
            };
            println!("{}", removed);
        }
        Commands::Drain => {
            probe.probe_once().await;
            monitor.refresh();
            match queue.drain().await {
                DrainOutcome::Completed(report) => print_json(&report)?,
                DrainOutcome::Offline => {
                    eprintln!("Error: backend unreachable at {}", config.connection.probe_url);
                    std::process::exit(1);
                }
                DrainOutcome::AlreadyRunning => eprintln!("Drain already running"),
            }
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
