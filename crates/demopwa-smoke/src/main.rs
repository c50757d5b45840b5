//! DemoPWA Smoke Harness
//!
//! Drives the service worker through install, activate, a fetch of every
//! precached page, push, notification click and sync, then prints a JSON
//! summary. With `--offline` the manifest is served from canned responses.

use anyhow::{bail, Context};
use demopwa_common::{init_logging, LogConfig, LogFormat};
use demopwa_sw::{
    CacheStorage, Client, DiagnosticSink, EventKind, EventOutcome, FanoutSink, Fetcher,
    HttpFetcher, MemoryCacheStorage, MemoryClients, MemoryRegistration, MemorySink,
    NotificationClickEvent, PushEvent, Response, ServiceWorker, StaticFetcher, SyncEvent,
    TracingSink, WorkerConfig, WorkerEvent,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Parse command line arguments
struct Args {
    config: Option<PathBuf>,
    offline: bool,
    log_format: LogFormat,
    summary: Option<PathBuf>,
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        let mut args = std::env::args().skip(1);
        let mut config = None;
        let mut offline = false;
        let mut log_format = LogFormat::Pretty;
        let mut summary = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    config = args.next().map(PathBuf::from);
                }
                "--offline" => {
                    offline = true;
                }
                "--log-format" => {
                    if let Some(val) = args.next() {
                        log_format = val.parse()?;
                    }
                }
                "--summary" => {
                    summary = args.next().map(PathBuf::from);
                }
                other => {
                    eprintln!("Warning: ignoring unknown argument {}", other);
                }
            }
        }

        Ok(Self {
            config,
            offline,
            log_format,
            summary,
        })
    }
}

/// Wall-clock time spent per event kind.
#[derive(Default)]
struct EventTimings {
    timings: HashMap<EventKind, Vec<Duration>>,
}

impl EventTimings {
    fn record(&mut self, kind: EventKind, duration: Duration) {
        self.timings.entry(kind).or_default().push(duration);
    }

    fn summary(&self) -> serde_json::Value {
        let mut summary = serde_json::Map::new();
        for (kind, durations) in &self.timings {
            let count = durations.len();
            let total_ms: f64 = durations.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
            summary.insert(
                kind.to_string(),
                json!({
                    "count": count,
                    "total_ms": total_ms,
                    "avg_ms": total_ms / count.max(1) as f64,
                }),
            );
        }
        serde_json::Value::Object(summary)
    }
}

fn offline_fetcher(config: &WorkerConfig) -> anyhow::Result<StaticFetcher> {
    let mut fetcher = StaticFetcher::new();
    for request in config.precache_requests()? {
        let body = format!("<!-- offline copy of {} -->", request.url);
        fetcher = fetcher.with_response(request.url.as_str(), Response::ok(body));
    }
    Ok(fetcher)
}

async fn run(args: Args) -> anyhow::Result<serde_json::Value> {
    let config = match args.config {
        Some(ref path) => WorkerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => WorkerConfig::default(),
    };
    info!(
        cache = %config.cache_name,
        scope = %config.scope,
        offline = args.offline,
        "Starting DemoPWA smoke harness"
    );

    let fetcher: Arc<dyn Fetcher> = if args.offline {
        Arc::new(offline_fetcher(&config)?)
    } else {
        Arc::new(HttpFetcher::new()?)
    };

    let caches = Arc::new(MemoryCacheStorage::new());
    let (clients, mut inbox) = MemoryClients::new();
    let clients = Arc::new(clients.with_origin(config.scope.clone()));
    clients
        .add(Client::window(config.focus_url.clone()).uncontrolled())
        .await;
    let registration = Arc::new(MemoryRegistration::new());
    let memory = Arc::new(MemorySink::new());
    let sink: Arc<dyn DiagnosticSink> = Arc::new(
        FanoutSink::new()
            .with(Arc::new(TracingSink))
            .with(memory.clone()),
    );

    let worker = ServiceWorker::builder(config.clone())
        .caches(caches.clone())
        .fetcher(fetcher)
        .clients(clients.clone())
        .registration(registration.clone())
        .diagnostics(sink)
        .build()?;

    let mut script = vec![WorkerEvent::Install, WorkerEvent::Activate];
    for request in config.precache_requests()? {
        script.push(WorkerEvent::Fetch(request));
    }
    script.push(WorkerEvent::Push(PushEvent::default()));

    let mut timings = EventTimings::default();
    let mut outcomes: Vec<EventOutcome> = Vec::new();
    let mut dispatch = |outcome: EventOutcome, started: Instant| {
        timings.record(outcome.kind, started.elapsed());
        outcomes.push(outcome);
    };

    for event in script {
        let started = Instant::now();
        dispatch(worker.dispatch(event).await, started);
    }

    // Click the notification the push produced, then fire a sync.
    if let Some(notification) = registration.shown().await.into_iter().next() {
        let started = Instant::now();
        let click = WorkerEvent::NotificationClick(NotificationClickEvent {
            notification,
            action: Some(demopwa_sw::config::ACTION_YES.to_string()),
        });
        dispatch(worker.dispatch(click).await, started);
    }
    if let Some(tag) = config.sync_tags.first() {
        let started = Instant::now();
        dispatch(worker.dispatch(WorkerEvent::Sync(SyncEvent::new(tag.clone()))).await, started);
    }

    let mut messages = Vec::new();
    while let Ok(message) = inbox.try_recv() {
        messages.push(message.data);
    }

    let failed: Vec<String> = outcomes
        .iter()
        .filter(|o| !o.is_ok())
        .map(|o| o.kind.to_string())
        .collect();
    for kind in &failed {
        warn!(event = %kind, "Event did not complete cleanly");
    }

    let cached = match caches.get(&config.cache_name).await {
        Some(cache) => cache.len().await,
        None => 0,
    };

    Ok(json!({
        "cache_name": config.cache_name,
        "caches": caches.keys().await?,
        "cached_entries": cached,
        "events": outcomes.len(),
        "failed_events": failed,
        "notifications_shown": registration.shown().await.len(),
        "skip_waiting_calls": registration.skip_waiting_calls(),
        "windows_focused": clients.focus_calls(),
        "windows_opened": clients.open_calls(),
        "messages": messages,
        "diagnostics": memory.records().iter().map(|d| d.to_string()).collect::<Vec<_>>(),
        "timings": timings.summary(),
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse()?;
    init_logging(LogConfig::default().with_format(args.log_format));

    let summary_path = args.summary.clone();
    let summary = run(args).await?;
    let rendered = serde_json::to_string_pretty(&summary)?;

    match summary_path {
        Some(path) => {
            std::fs::write(&path, &rendered)
                .with_context(|| format!("writing summary to {}", path.display()))?;
            info!(path = %path.display(), "Summary written");
        }
        None => println!("{}", rendered),
    }

    let failed = summary["failed_events"].as_array().map_or(0, |f| f.len());
    if failed > 0 {
        bail!("{} event(s) failed", failed);
    }
    Ok(())
}
