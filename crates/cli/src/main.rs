//! Headless front door for the resilient chunked downloader core: queue
//! URLs, run them to completion, and check on progress. A graphical
//! progress UI is a deliberately separate concern this crate doesn't take
//! on.

mod config;
mod queue;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::Config;
use queue::{QueueEntry, QueueFile};

#[derive(Parser)]
#[command(name = "rangefetch", about = "Resilient multi-file downloader")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Queue a URL for download.
    Add {
        url: String,
        /// Destination filename; defaults to the last path segment of the URL.
        #[arg(long = "out")]
        out: Option<String>,
    },
    /// Run every queued download to completion.
    Run,
    /// Print the status of in-progress downloads.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().await.context("loading configuration")?;

    match cli.command {
        Command::Add { url, out } => add(url, out).await,
        Command::Run => run(&config).await,
        Command::Status => status().await,
    }
}

async fn add(url: String, out: Option<String>) -> Result<()> {
    let filename = out.unwrap_or_else(|| {
        url.rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .unwrap_or("download.bin")
            .to_string()
    });

    let mut queue = QueueFile::load().await?;
    queue.entries.push(QueueEntry { url, filename });
    let count = queue.entries.len();
    queue.save().await?;
    println!("queued ({count} total)");
    Ok(())
}

async fn run(config: &Config) -> Result<()> {
    let queue = QueueFile::load().await?;
    if queue.entries.is_empty() {
        println!("nothing queued");
        return Ok(());
    }

    let store = storage::ChunkStore::open_default()
        .await
        .context("opening chunk store")?;
    let client = reqwest::Client::new();
    let network: Arc<dyn platform::NetworkMonitor> = Arc::new(platform::AlwaysOnline);

    let urls: Vec<String> = queue.entries.iter().map(|e| e.url.clone()).collect();
    let filenames: Vec<String> = queue.entries.iter().map(|e| e.filename.clone()).collect();

    let job = api::Job::new(urls, filenames, config.dest_dir(), client, store, network);
    let scheduler = api::Scheduler::new(config.concurrency);

    let done = Arc::new(tokio::sync::Notify::new());
    let done_signal = Arc::clone(&done);
    job.on("complete", move |_event| done_signal.notify_one());

    job.on("taskProgress", |event| {
        if let api::JobEvent::TaskProgress {
            index,
            loaded,
            total,
        } = event
        {
            if *total > 0 {
                println!("task {index}: {loaded}/{total} bytes");
            }
        }
    });
    job.on("taskComplete", |event| {
        if let api::JobEvent::TaskComplete { index } = event {
            println!("task {index}: complete");
        }
    });
    job.on("taskError", |event| {
        if let api::JobEvent::TaskError { index, kind } = event {
            println!("task {index}: error: {kind}");
        }
    });

    for task in job.tasks() {
        scheduler
            .add(Arc::clone(task))
            .context("scheduling task")?;
    }
    scheduler.start();

    done.notified().await;
    Ok(())
}

async fn status() -> Result<()> {
    let queue = QueueFile::load().await?;
    if queue.entries.is_empty() {
        println!("nothing queued");
        return Ok(());
    }

    let store = storage::ChunkStore::open_default()
        .await
        .context("opening chunk store")?;
    for entry in &queue.entries {
        match store.get_metadata(&entry.url).await? {
            Some(meta) if meta.total_bytes > 0 => {
                let percent = 100.0 * meta.downloaded_bytes as f64 / meta.total_bytes as f64;
                println!(
                    "{}: {}/{} bytes ({percent:.1}%)",
                    entry.filename, meta.downloaded_bytes, meta.total_bytes
                );
            }
            Some(meta) => {
                println!(
                    "{}: {} bytes (total size unknown)",
                    entry.filename, meta.downloaded_bytes
                );
            }
            None => println!("{}: not started, or already finished", entry.filename),
        }
    }
    Ok(())
}
