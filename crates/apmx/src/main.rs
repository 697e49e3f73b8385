mod output;
mod telemetry;

use std::path::{Path, PathBuf};

use anyhow::Context;
use apmx_core::config::{AgentConfig, ConfigWatcher};
use apmx_core::model::transaction::ImmutableTransaction;
use apmx_transform::{
    PipelineConfig, RecordingAggregators, TransactionTransformer, TransformPipeline,
};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::output::{TransformReport, print_config_human, print_report_human};
use crate::telemetry::init_cli_tracing;

#[derive(Parser, Debug)]
#[command(name = "apmx")]
#[command(about = "Turn finished APM transactions into metrics, events and traces")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Transform transactions read from a JSON file")]
    Transform {
        #[arg(help = "A transaction object or an array of them")]
        file: PathBuf,
    },
    #[command(about = "Print the resolved agent config")]
    Config,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TransactionInput {
    Many(Vec<ImmutableTransaction>),
    One(Box<ImmutableTransaction>),
}

impl TransactionInput {
    fn into_vec(self) -> Vec<ImmutableTransaction> {
        match self {
            Self::Many(v) => v,
            Self::One(tx) => vec![*tx],
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_cli_tracing();

    match cli.command {
        Commands::Transform { file } => run_transform(&file, cli.json).await,
        Commands::Config => {
            let cfg = AgentConfig::load().context("load agent config")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&cfg)?);
            } else {
                print_config_human(&cfg);
            }
            Ok(())
        }
    }
}

async fn run_transform(file: &Path, json: bool) -> anyhow::Result<()> {
    let cfg = AgentConfig::load().context("load agent config")?;
    let transactions = read_transactions(file)?;
    tracing::debug!(count = transactions.len(), path = %file.display(), "read transactions");

    let recorded = RecordingAggregators::new();
    let transformer = TransactionTransformer::new(recorded.aggregators())?;
    let (pipeline, worker) = TransformPipeline::spawn(
        transformer,
        ConfigWatcher::new(cfg),
        PipelineConfig::default(),
    );
    for tx in transactions {
        pipeline.submit(tx).await;
    }
    drop(pipeline);
    let stats = worker.await.context("transform worker panicked")?;

    let report = TransformReport::drain(stats, &recorded);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report_human(&report);
    }

    if stats.failed > 0 {
        anyhow::bail!("{} transaction(s) failed to transform", stats.failed);
    }
    Ok(())
}

fn read_transactions(file: &Path) -> anyhow::Result<Vec<ImmutableTransaction>> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("read {}", file.display()))?;
    parse_transactions(&raw).with_context(|| format!("parse {}", file.display()))
}

fn parse_transactions(raw: &str) -> anyhow::Result<Vec<ImmutableTransaction>> {
    let input: TransactionInput = serde_json::from_str(raw)?;
    Ok(input.into_vec())
}
