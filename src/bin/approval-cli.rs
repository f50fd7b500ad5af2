use alloy::primitives::U256;
use approval_engine::chain::ChainId;
use approval_engine::config::{load_config, EngineConfig};
use approval_engine::gas::{check_gas_and_nonce, GasCheckItem, GasCheckParams};
use approval_engine::observability::logging::init_logging;
use approval_engine::transaction::{normalize_batch, RawTransaction, RequestHints};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Parser)]
#[command(name = "approval-cli")]
#[command(about = "Offline inspection for the approval engine", long_about = None)]
struct Cli {
    /// Engine config; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a config file
    ValidateConfig { path: PathBuf },
    /// Normalize a JSON array of raw transactions
    Normalize {
        batch: PathBuf,
        /// Chain the caller is connected to
        #[arg(long)]
        chain: Option<u64>,
    },
    /// Run the gas, balance and nonce checks over a scenario file
    CheckGas { scenario: PathBuf },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Scenario {
    chain_id: Option<u64>,
    /// Wei, decimal or 0x-hex.
    balance: String,
    recommended_nonce: Option<u64>,
    #[serde(default)]
    is_multisig: bool,
    txs: Vec<ScenarioTx>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScenarioTx {
    tx: RawTransaction,
    recommended_gas: u64,
    max_gas_cost: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    init_logging(&config.observability);

    match cli.command {
        Commands::ValidateConfig { path } => match load_config(&path) {
            Ok(config) => {
                println!(
                    "{} is valid ({} chains, default gas ratio {})",
                    path.display(),
                    config.chains.len(),
                    config.gas.default_gas_limit_ratio
                );
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Normalize { batch, chain } => {
            let txs: Vec<RawTransaction> = read_json(&batch)?;
            let drafts = normalize_batch(&txs, chain.map(ChainId), &RequestHints::default())?;
            println!("{}", serde_json::to_string_pretty(&drafts)?);
        }
        Commands::CheckGas { scenario } => {
            let scenario: Scenario = read_json(&scenario)?;
            check_gas(&config, scenario)?;
        }
    }

    Ok(())
}

fn check_gas(config: &EngineConfig, scenario: Scenario) -> Result<(), Box<dyn std::error::Error>> {
    let raw: Vec<RawTransaction> = scenario.txs.iter().map(|t| t.tx.clone()).collect();
    let drafts = normalize_batch(&raw, scenario.chain_id.map(ChainId), &RequestHints::default())?;
    let chain_id = drafts.first().map(|d| d.chain_id.0).unwrap_or(1);

    let mut items = Vec::with_capacity(drafts.len());
    for (draft, tx) in drafts.iter().zip(&scenario.txs) {
        items.push(GasCheckItem {
            draft,
            gas_limit: draft.gas_limit.unwrap_or(tx.recommended_gas),
            recommended_gas: tx.recommended_gas,
            max_gas_cost: U256::from_str(&tx.max_gas_cost)?,
            recommended_nonce: scenario.recommended_nonce,
        });
    }

    let errors = check_gas_and_nonce(
        &items,
        U256::from_str(&scenario.balance)?,
        &GasCheckParams {
            ratio: config.gas.ratio_for(chain_id),
            default_ratio: config.gas.default_gas_limit_ratio,
            min_gas_limit: config.gas.min_gas_limit,
            is_multisig: scenario.is_multisig,
        },
    );

    if errors.is_empty() {
        println!("No gas check errors");
    } else {
        println!("{}", serde_json::to_string_pretty(&errors)?);
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
