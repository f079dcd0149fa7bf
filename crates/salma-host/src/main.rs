//! Salma host - drives the offline worker from the command line.
//!
//! Runs the install and activate events against a disk-backed cache store,
//! then routes each URL given on the command line through the worker and
//! prints where the answer came from.

use anyhow::{Context, Result};
use clap::Parser;
use salma_common::{init_logging, LogConfig, LogFormat, WorkerConfig};
use salma_net::{Destination, HttpFetcher, LoaderConfig, Request, RequestMode};
use salma_sw::{
    DiskCacheStorage, EventOutcome, FetchEvent, FetchOutcome, LogNotifier, MessageEvent,
    OfflineWorker, WorkerEvent,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "salma-host")]
#[command(about = "Run the Salma offline worker against a disk cache and route URLs through it")]
struct Args {
    /// Worker configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format: pretty, compact or json
    #[arg(long, default_value = "pretty", value_parser = parse_log_format)]
    log_format: LogFormat,

    /// Log filter directives, e.g. "salma_sw=debug,reqwest=warn"
    #[arg(long)]
    log_filter: Option<String>,

    /// Directory holding the cache stores
    #[arg(long, default_value = ".salma-cache")]
    cache_dir: PathBuf,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,

    /// URLs to route, absolute or relative to the origin
    urls: Vec<String>,
}

fn parse_log_format(name: &str) -> Result<LogFormat, String> {
    LogFormat::from_name(name).ok_or_else(|| format!("unknown log format `{}`", name))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_config = if args.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    let log_config = log_config.with_format(args.log_format);
    init_logging(match &args.log_filter {
        Some(filter) => log_config.with_filter(filter.as_str()),
        None => log_config,
    });

    let config = match &args.config {
        Some(path) => WorkerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => WorkerConfig::default(),
    };
    info!(store = %config.store_name(), origin = %config.origin, "Starting worker");

    let storage = DiskCacheStorage::new(&args.cache_dir)
        .await
        .with_context(|| format!("opening cache directory {}", args.cache_dir.display()))?;
    let fetcher = HttpFetcher::new(LoaderConfig::new(config.origin.clone()))?;
    let origin = config.origin.clone();
    let worker = OfflineWorker::new(
        config,
        Arc::new(storage),
        Arc::new(fetcher),
        Arc::new(LogNotifier::new()),
    )?;

    for event in [WorkerEvent::Install, WorkerEvent::Activate] {
        let dispatched = worker.dispatch(event).await;
        match &dispatched.outcome {
            EventOutcome::Installed(report) => {
                println!(
                    "install  {}: {} cached, {} failed",
                    report.store,
                    report.cached.len(),
                    report.failed.len()
                );
                for (entry, reason) in &report.failed {
                    println!("  ! {} ({})", entry, reason);
                }
            }
            EventOutcome::Activated(report) => {
                println!(
                    "activate {}: {} stale store(s) deleted, {} client(s) claimed",
                    report.active_store,
                    report.deleted.len(),
                    report.claimed
                );
            }
            other => warn!(?other, "Unexpected lifecycle outcome"),
        }
        dispatched.lifetime.settled().await;
    }

    for raw in &args.urls {
        let url = origin
            .join(raw)
            .with_context(|| format!("invalid URL {}", raw))?;
        let request = request_for(url, &origin);
        let shown = request.url.to_string();

        let dispatched = worker
            .dispatch(WorkerEvent::Fetch(FetchEvent::new(request)))
            .await;
        let line = match dispatched.outcome {
            EventOutcome::Fetch(outcome) => describe(outcome).await,
            other => format!("unexpected outcome {:?}", other),
        };
        println!("{}  {}", shown, line);

        let settled = dispatched.lifetime.settled().await;
        if settled.failed > 0 || settled.panicked > 0 {
            warn!(url = %shown, ?settled, "Background writes did not all complete");
        }
    }

    let (message, reply) = MessageEvent::with_reply(json!({"type": "GET_VERSION"}));
    worker.dispatch(WorkerEvent::Message(message)).await;
    if let Ok(reply) = reply.await {
        println!("version  {}", reply["version"]);
    }

    Ok(())
}

/// Build the request a browser would issue for `url`.
fn request_for(url: Url, origin: &Url) -> Request {
    let destination = Destination::guess(&url);
    let is_page = destination == Destination::Document
        || (destination == Destination::Other && url.path().ends_with('/'));

    if is_page {
        Request::navigate(url)
    } else {
        let request = Request::get(url).destination(destination);
        if request.is_same_origin(origin) {
            request.mode(RequestMode::SameOrigin)
        } else {
            request.mode(RequestMode::NoCors)
        }
    }
}

async fn describe(outcome: FetchOutcome) -> String {
    let response = match outcome {
        FetchOutcome::PassThrough => return "pass-through".to_string(),
        FetchOutcome::Respond(None) => return "no response".to_string(),
        FetchOutcome::Respond(Some(response)) => response,
    };

    let source = if response.from_cache {
        "cache"
    } else if response.url.is_some() {
        "network"
    } else {
        "generated"
    };
    let status = response.status;
    let content_type = response.content_type().unwrap_or("-").to_string();

    match response.bytes().await {
        Ok(body) => format!("{} {} {} ({} bytes)", status.as_u16(), source, content_type, body.len()),
        Err(e) => format!("{} {} {} (body failed: {})", status.as_u16(), source, content_type, e),
    }
}
