//! bindmgrd - Segment Binding Manager Daemon
//!
//! Reads port binding events as JSON lines (from a file or stdin), applies
//! them through [`BindMgr`] and logs the resulting switch configuration and
//! agent notifications.

use anyhow::Context;
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use segbind_bindmgrd::{
    ApplyOutcome, BindMgr, BindMgrConfig, BindingEvent, ChannelMessenger, CliDeviceDriver,
    LogSink, MemoryBindingStore,
};
use segbind_common::{EventQueue, QueuedEvent};

type Mgr = BindMgr<MemoryBindingStore, CliDeviceDriver<LogSink>, ChannelMessenger>;

/// Segment binding manager daemon
#[derive(Parser, Debug)]
#[command(name = "bindmgrd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Topology and naming configuration (TOML)
    #[arg(short = 'c', long, default_value = "/etc/segbind/bindmgrd.toml")]
    config: PathBuf,

    /// JSON-lines event file; stdin when omitted
    #[arg(short = 'e', long)]
    events: Option<PathBuf>,

    /// Pending events that trigger a processing batch
    #[arg(short = 'b', long, default_value = "128")]
    batch_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

/// Initializes tracing/logging subsystem
fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("--- Starting bindmgrd ---");

    match run(args).await {
        Ok(()) => {
            info!("bindmgrd finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("bindmgrd failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = BindMgrConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    info!(switches = config.switches.len(), "Loaded topology");
    let config = Arc::new(config);

    let driver = CliDeviceDriver::new(Arc::new(config.bindings.clone()), LogSink);
    let (messenger, mut rx) = ChannelMessenger::new();
    let delivery = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            info!(
                destination = %message.destination(),
                method = %message.method,
                payload = %message.payload,
                "Agent notification"
            );
        }
    });

    let mgr = Arc::new(BindMgr::new(
        config,
        Arc::new(MemoryBindingStore::new()),
        driver,
        messenger,
    ));

    let input: Box<dyn AsyncRead + Unpin + Send> = match &args.events {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    let batch_size = args.batch_size.max(1);
    let mut lines = BufReader::new(input).lines();
    let mut queue = EventQueue::new();
    while let Some(line) = lines.next_line().await.context("reading events")? {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match BindingEvent::from_json(trimmed) {
            Ok(event) => queue.add_to_sync([event]),
            Err(e) => warn!(error = %e, "Skipping malformed event"),
        }
        if queue.pending_count() >= batch_size {
            process_batch(&mgr, &mut queue).await;
        }
    }
    process_batch(&mgr, &mut queue).await;

    // Dropping the manager closes the notification channel.
    drop(mgr);
    delivery.await.context("notification delivery task")?;
    Ok(())
}

/// Applies pending events; resources run in parallel, each in order.
async fn process_batch(mgr: &Arc<Mgr>, queue: &mut EventQueue<BindingEvent>) {
    if !queue.has_pending() {
        return;
    }

    let mut per_resource: BTreeMap<String, Vec<BindingEvent>> = BTreeMap::new();
    for event in queue.drain() {
        per_resource
            .entry(event.key().to_string())
            .or_default()
            .push(event);
    }
    debug!(resources = per_resource.len(), "Processing batch");

    let mut tasks = JoinSet::new();
    for (_, events) in per_resource {
        let mgr = Arc::clone(mgr);
        tasks.spawn(async move {
            for event in events {
                handle(&mgr, &event).await;
            }
        });
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Event task failed");
        }
    }
}

async fn handle(mgr: &Mgr, event: &BindingEvent) {
    match mgr.handle_event(event).await {
        Ok(ApplyOutcome::Ignored { reason }) => {
            debug!(resource = event.resource_id(), %reason, "Event ignored");
        }
        Ok(ApplyOutcome::Applied { results }) => {
            debug!(resource = event.resource_id(), results = results.len(), "Event applied");
        }
        Ok(ApplyOutcome::DevicePushFailed {
            pending,
            failed_target,
            error,
            ..
        }) => {
            // The bindings are committed; converge the switches left behind.
            warn!(
                resource = event.resource_id(),
                switch = %failed_target,
                error = %error,
                pending = pending.len(),
                "Device push failed, recovering"
            );
            if let Err(e) = mgr.recover(&pending).await {
                error!(resource = event.resource_id(), error = %e, "Recovery failed");
            }
        }
        Err(e) => {
            error!(resource = event.resource_id(), error = %e, "Failed to apply event");
        }
    }
}
