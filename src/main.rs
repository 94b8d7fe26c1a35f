use anyhow::Context;
use clap::{Parser, Subcommand};
use shard_topk::config::{load_config, TopKConfig};
use shard_topk::mapreduce::{FormatType, LocalTransport, Orchestrator, ReportFormatter};
use shard_topk::storage::backends::load_cluster;
use shard_topk::storage::ClusterLayout;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace};

/// Rank entities by summed amount across a partitioned data set
#[derive(Parser)]
#[command(name = "shard-topk")]
#[command(about = "Distributed top-K aggregation over partitioned invoice data", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the top-K customers from CSV exports
    Run {
        /// Invoice lines CSV (invoice_line_id,customer_id,unit_price,quantity)
        #[arg(long)]
        invoice_lines: PathBuf,

        /// Customers CSV (customer_id,first_name,last_name,city,country)
        #[arg(long)]
        customers: PathBuf,

        /// Number of entries to rank (overrides configuration)
        #[arg(short)]
        k: Option<usize>,

        /// Number of partitions to spread the data over
        #[arg(long, default_value = "4")]
        partitions: u32,

        /// Number of nodes owning the partitions
        #[arg(long, default_value = "2")]
        nodes: usize,

        /// Fan-in deadline, e.g. "500ms" or "2m" (overrides configuration)
        #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
        timeout: Option<Duration>,

        /// Path to configuration file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: FormatType,
    },
    /// Print the effective configuration as TOML
    Config {
        /// Path to configuration file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn,shard_topk=info",
        1 => "debug",
        2 => "trace",
        _ => "trace,tokio=debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .with_target(cli.verbose >= 2)
        .with_thread_ids(cli.verbose >= 3)
        .with_line_number(cli.verbose >= 3)
        .init();

    debug!("shard-topk started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match cli.command {
        Commands::Run {
            invoice_lines,
            customers,
            k,
            partitions,
            nodes,
            timeout,
            config,
            format,
        } => {
            let layout = ClusterLayout::new(partitions, nodes);
            run_top_k(invoice_lines, customers, k, layout, timeout, config, format).await
        }
        Commands::Config { config } => show_config(config).await,
    };

    if let Err(e) = result {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn resolve_config(
    path: Option<PathBuf>,
    k: Option<usize>,
    timeout: Option<Duration>,
) -> anyhow::Result<TopKConfig> {
    let mut config = load_config(path.as_deref())
        .await
        .context("Failed to load configuration")?;
    if let Some(k) = k {
        config.k = k;
    }
    if let Some(timeout) = timeout {
        config.fan_in_timeout = timeout;
    }
    config.validate()?;
    Ok(config)
}

async fn run_top_k(
    invoice_lines: PathBuf,
    customers: PathBuf,
    k: Option<usize>,
    layout: ClusterLayout,
    timeout: Option<Duration>,
    config: Option<PathBuf>,
    format: FormatType,
) -> anyhow::Result<()> {
    let config = resolve_config(config, k, timeout).await?;

    let cluster = tokio::task::spawn_blocking(move || {
        load_cluster(&invoice_lines, &customers, &layout)
    })
    .await?
    .context("Failed to load input data")?;
    let cluster = Arc::new(cluster);

    let orchestrator = Orchestrator::new(
        cluster.clone(),
        Arc::new(LocalTransport::new(cluster.clone())),
        cluster,
        config,
    );
    let report = orchestrator.run().await?;

    let output = ReportFormatter::new(format).format(&report)?;
    print!("{output}");
    if !output.ends_with('\n') {
        println!();
    }
    Ok(())
}

async fn show_config(path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = resolve_config(path, None, None).await?;
    print!("{}", toml::to_string(&config)?);
    Ok(())
}
