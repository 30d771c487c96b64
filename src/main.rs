use clap::{Parser, Subcommand};
use kube::{Client, ResourceExt};
use node_taint_helper::{labels::parse_labels, parse_taint, Config, KubeNodeStore, Reconciler};
use std::collections::BTreeMap;
use tracing::info;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "node-taint-helper", about = "Bulk node taint and label reconciliation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add taints (key[=value]:Effect) to every worker node
    TaintWorkers {
        #[arg(required = true)]
        taints: Vec<String>,
    },
    /// Remove taints (key[=value]:Effect) from every node
    UntaintAll {
        #[arg(required = true)]
        taints: Vec<String>,
    },
    /// Remove label keys from every node
    UnlabelAll {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Set labels (key=value) on one node
    Label {
        node: String,
        #[arg(required = true)]
        labels: Vec<String>,
    },
    /// Set labels (key=value) on every worker node
    LabelWorkers {
        #[arg(required = true)]
        labels: Vec<String>,
    },
    /// Print node names
    List {
        /// Only nodes without a master taint
        #[arg(long)]
        workers: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::filter::Targets::new()
        .with_target("node_taint_helper", tracing::Level::DEBUG);
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let client = Client::try_default().await?;
    info!("Using master taint keys {:?}", config.master_taint_keys);
    let reconciler = Reconciler::new(KubeNodeStore::new(client), config);

    let report = match cli.command {
        Command::TaintWorkers { taints } => {
            let taints = taints
                .iter()
                .map(|t| parse_taint(t))
                .collect::<Result<Vec<_>, _>>()?;
            reconciler.taint_workers(&taints).await?
        }
        Command::UntaintAll { taints } => {
            let taints = taints
                .iter()
                .map(|t| parse_taint(t))
                .collect::<Result<Vec<_>, _>>()?;
            reconciler.untaint_all(&taints).await?
        }
        Command::UnlabelAll { keys } => reconciler.unlabel_all(&keys).await?,
        Command::LabelWorkers { labels } => {
            reconciler.label_workers(&parse_labels(&labels)?).await?
        }
        Command::Label { node, labels } => {
            let updated = reconciler.label(&node, &parse_labels(&labels)?).await?;
            println!("{}", serde_json::to_string_pretty(updated.labels())?);
            return Ok(());
        }
        Command::List { workers } => {
            let nodes = if workers {
                reconciler.list_workers().await?
            } else {
                reconciler.list().await?
            };
            for node in nodes {
                println!("{}", node.name_any());
            }
            return Ok(());
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
