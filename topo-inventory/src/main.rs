use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use topo_inventory::persister::DEFAULT_BATCH_SIZE;
use topo_inventory::{
    Persister, PersisterConfig, RefreshBatch, RefreshMode, Source, SqliteStore, default_graph,
};

#[derive(Parser)]
#[command(name = "topo-inventory")]
#[command(about = "Apply a collected inventory batch to the inventory store")]
struct Args {
    /// Data directory holding the inventory database
    #[arg(short, long, default_value = "/var/lib/topo-inventory")]
    data_dir: PathBuf,

    /// Tenant owning the source
    #[arg(long)]
    tenant_id: i64,

    /// Source the batch was collected from
    #[arg(long)]
    source_id: i64,

    /// Provider type of the source (e.g. openshift, amazon)
    #[arg(long, default_value = "openshift")]
    source_type: String,

    /// Records written per transaction
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Treat every collection as fully enumerated
    #[arg(long)]
    full: bool,

    /// JSON refresh batch
    input: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("topo_inventory=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let raw = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let batch: RefreshBatch = serde_json::from_str(&raw).context("Invalid refresh batch")?;

    tokio::fs::create_dir_all(&args.data_dir).await?;
    let data_dir = args
        .data_dir
        .to_str()
        .context("Data directory is not valid UTF-8")?;
    let store = Arc::new(SqliteStore::new(data_dir).await?);

    let mode = if args.full {
        RefreshMode::Full
    } else {
        RefreshMode::Targeted
    };
    let persister = Persister::new(
        store,
        default_graph(mode)?,
        Source::new(args.tenant_id, args.source_id, args.source_type),
        PersisterConfig {
            batch_size: args.batch_size,
        },
    );

    info!(
        tenant_id = args.tenant_id,
        source_id = args.source_id,
        collections = batch.collections.len(),
        "Applying refresh batch"
    );

    // Stop between collections on SIGINT
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received SIGINT");
            let _ = cancel_tx.send(true);
        }
    });

    let summary = persister.persist_cancellable(&batch, cancel_rx).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !summary.is_complete() {
        for report in summary.failed() {
            warn!(collection = %report.name, status = ?report.status, error = ?report.error, "Collection not reconciled");
        }
        bail!("Refresh pass {} did not complete", summary.pass_id);
    }
    Ok(())
}
