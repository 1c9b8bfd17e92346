//! Pulse — live monitor for background customer-analysis jobs
//!
//! Watches the backend's analysis queue through a status snapshot plus
//! the live event stream, and logs job activity and completion notices
//! to the terminal.

use clap::Parser;
use pulse::api::ApiClient;
use pulse::config;
use pulse::engine::Engine;
use pulse::notify::NoticeKind;
use pulse::stream;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "pulse", about = "Live monitor for background analysis jobs")]
struct Cli {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Backend base URL (overrides the configured value)
    #[arg(long)]
    server: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Print the current queued/running jobs once and exit
    Status,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_env("PULSE_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = config::load_config();
    if let Some(server) = cli.server {
        config.server_url = server;
    }

    let api = ApiClient::new(&config.server_url);

    if let Some(Command::Status) = cli.command {
        let jobs = api.fetch_status().await;
        if jobs.is_empty() {
            println!("no analysis jobs in flight");
            return;
        }
        for job in jobs {
            println!(
                "{:<8} {:<24} {}",
                job.phase.as_str(),
                job.customer_id,
                job.customer_name
            );
        }
        return;
    }

    let engine = Arc::new(Engine::new(api, config.notice_durations()));

    // Log registry changes (replace-and-render)
    let mut contents = engine.subscribe();
    tokio::spawn(async move {
        while contents.changed().await.is_ok() {
            let jobs = contents.borrow_and_update().clone();
            info!("{} analysis job(s) in flight", jobs.len());
        }
    });

    // Log notices as they fire
    let mut notices = engine.notices();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => match notice.kind {
                    NoticeKind::Success => {
                        info!("analysis completed for {}", notice.customer_name)
                    }
                    NoticeKind::Info => {
                        info!("analysis did not finish for {}", notice.customer_name)
                    }
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    });

    // Notice expiry sweeper — sleeps until the next notice is due to
    // expire instead of polling at a fixed interval.
    let sweeper = Arc::clone(&engine);
    tokio::spawn(async move {
        loop {
            let sleep_for = sweeper
                .notifier()
                .next_expiry_at()
                .map(|at| at.saturating_duration_since(Instant::now()) + Duration::from_millis(50))
                .unwrap_or(Duration::from_secs(30));
            tokio::time::sleep(sleep_for).await;
            sweeper.notifier().purge_expired();
        }
    });

    info!(server = %config.server_url, "pulse starting");
    stream::run(Arc::clone(&engine), &config.ws_events_url()).await;
    engine.shutdown();
}
