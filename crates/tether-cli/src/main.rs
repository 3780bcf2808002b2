//! tether - operator CLI for a SQLite-backed offline queue.
//!
//! enqueue で積んだ item は DB に残り、`drain` / `run` が実行するまで保持されます。

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tether_core::handlers::HandlerRegistry;
use tether_core::{
    ApiCallPayload, DataSyncPayload, FileUploadPayload, HttpConfig, ItemKind, OfflineQueue,
    Priority, QueueConfig, SqliteStore, SyncOperation,
};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Durable offline queue for API calls, record syncs and file uploads")]
#[command(version, propagate_version = true)]
struct Cli {
    /// SQLite database holding the queue
    #[arg(long, env = "TETHER_DB", default_value = "tether-queue.db", global = true)]
    db: PathBuf,

    /// JSON config file: `{ "queue": {...}, "http": {...} }`
    #[arg(long, env = "TETHER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Queue an HTTP request
    Api {
        method: String,
        endpoint: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
        /// Extra header as NAME=VALUE (repeatable)
        #[arg(long = "header", value_parser = parse_key_value)]
        headers: Vec<(String, String)>,
        #[command(flatten)]
        opts: EnqueueOpts,
    },

    /// Queue a record write against the REST backend
    Sync {
        entity: String,
        #[arg(value_enum)]
        operation: SyncOp,
        /// Record id (required for update and delete)
        #[arg(long)]
        id: Option<String>,
        /// JSON record data
        #[arg(long)]
        data: Option<String>,
        #[command(flatten)]
        opts: EnqueueOpts,
    },

    /// Queue a multipart file upload
    Upload {
        file: PathBuf,
        destination: String,
        #[arg(long, default_value = "file")]
        field: String,
        #[arg(long)]
        content_type: Option<String>,
        /// Extra form field as NAME=VALUE (repeatable)
        #[arg(long = "form", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
        #[command(flatten)]
        opts: EnqueueOpts,
    },

    /// Print queue statistics as JSON
    Stats,

    /// Tick until the queue is empty (or Ctrl-C)
    Drain {
        /// Give up after this many ticks
        #[arg(long)]
        max_ticks: Option<u32>,
    },

    /// Run the periodic timer until Ctrl-C
    Run,

    /// Delete every queued item
    Clear,
}

#[derive(Args)]
struct EnqueueOpts {
    #[arg(long, short, default_value = "medium")]
    priority: Priority,

    /// Attempts before the item is abandoned (default: queue.max_retries)
    #[arg(long)]
    max_attempts: Option<u32>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SyncOp {
    Create,
    Update,
    Upsert,
    Delete,
}

impl From<SyncOp> for SyncOperation {
    fn from(op: SyncOp) -> Self {
        match op {
            SyncOp::Create => SyncOperation::Create,
            SyncOp::Update => SyncOperation::Update,
            SyncOp::Upsert => SyncOperation::Upsert,
            SyncOp::Delete => SyncOperation::Delete,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CliConfig {
    queue: QueueConfig,
    http: HttpConfig,
}

impl CliConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    if key.trim().is_empty() {
        return Err(format!("empty name in '{s}'"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

fn parse_json(label: &str, raw: Option<String>) -> Result<Option<serde_json::Value>> {
    raw.map(|s| serde_json::from_str(&s).with_context(|| format!("--{label} is not valid JSON")))
        .transpose()
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    // ignore: a subscriber may already be installed
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

async fn open_queue(cli: &Cli, config: CliConfig) -> Result<OfflineQueue> {
    let store = SqliteStore::open(&cli.db)
        .with_context(|| format!("failed to open queue database {}", cli.db.display()))?;
    let handlers = HandlerRegistry::http(config.http).context("failed to set up http handlers")?;
    let queue = OfflineQueue::builder()
        .config(config.queue)
        .store(store)
        .handlers(handlers)
        .autostart(false)
        .build()
        .await
        .context("failed to build queue")?;
    Ok(queue)
}

fn build_kind(command: Command) -> Result<(ItemKind, EnqueueOpts)> {
    let built = match command {
        Command::Api {
            method,
            endpoint,
            body,
            headers,
            opts,
        } => {
            let mut payload = ApiCallPayload::new(method, endpoint);
            if let Some(body) = parse_json("body", body)? {
                payload = payload.with_body(body);
            }
            for (name, value) in headers {
                payload = payload.with_header(name, value);
            }
            (ItemKind::ApiCall(payload), opts)
        }
        Command::Sync {
            entity,
            operation,
            id,
            data,
            opts,
        } => {
            let mut payload = DataSyncPayload::new(entity, operation.into());
            if let Some(id) = id {
                payload = payload.with_record_id(id);
            }
            if let Some(data) = parse_json("data", data)? {
                payload = payload.with_data(data);
            }
            (ItemKind::DataSync(payload), opts)
        }
        Command::Upload {
            file,
            destination,
            field,
            content_type,
            fields,
            opts,
        } => {
            let file = std::fs::canonicalize(&file)
                .with_context(|| format!("cannot resolve {}", file.display()))?;
            let mut payload = FileUploadPayload::new(file, destination);
            payload.field_name = field;
            if let Some(content_type) = content_type {
                payload = payload.with_content_type(content_type);
            }
            for (name, value) in fields {
                payload = payload.with_field(name, value);
            }
            (ItemKind::FileUpload(payload), opts)
        }
        _ => bail!("not an enqueue command"),
    };
    Ok(built)
}

async fn drain(queue: &OfflineQueue, max_ticks: Option<u32>) -> Result<()> {
    let mut ticks = 0u32;
    loop {
        let report = queue.process_now().await;
        ticks += 1;
        if report.dispatched > 0 {
            info!(
                dispatched = report.dispatched,
                succeeded = report.succeeded,
                retried = report.retried,
                abandoned = report.abandoned,
                "tick"
            );
        }

        let stats = queue.stats().await?;
        if stats.total == 0 {
            info!(ticks, "queue drained");
            return Ok(());
        }
        if max_ticks.is_some_and(|max| ticks >= max) {
            warn!(ticks, remaining = stats.total, "tick limit reached");
            return Ok(());
        }

        // idle ticks mean everything left is backing off
        let pause = if report.is_idle() {
            Duration::from_millis(250)
        } else {
            Duration::ZERO
        };
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = tokio::signal::ctrl_c() => {
                warn!(remaining = stats.total, "interrupted");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = CliConfig::load(cli.config.as_deref())?;
    config.queue.validate().context("invalid queue config")?;
    let queue = open_queue(&cli, config).await?;

    match cli.command {
        Command::Stats => {
            let stats = queue.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Clear => {
            let removed = queue.clear().await?;
            println!("removed {removed} item(s)");
        }
        Command::Drain { max_ticks } => drain(&queue, max_ticks).await?,
        Command::Run => {
            queue.start();
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            queue.stop().await;
        }
        command => {
            let (kind, opts) = build_kind(command)?;
            let id = queue
                .enqueue(kind, opts.priority, opts.max_attempts)
                .await?;
            println!("{id}");
        }
    }
    Ok(())
}
