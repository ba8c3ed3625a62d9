//! # CLI Interface
//!
//! Command-line arguments for `blobchain-node`, defined with `clap` derive.
//! Subcommands: `run`, `genesis` and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// Single-node host for the blobchain protocol.
///
/// Runs the VM with an auto-accepting consensus stand-in, gossips pending
/// transactions through a logging transport, and exposes Prometheus
/// metrics.
#[derive(Parser, Debug)]
#[command(
    name = "blobchain-node",
    about = "Blobchain single-node host",
    version,
    propagate_version = true
)]
pub struct BlobchainCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Write a genesis file with default parameters.
    Genesis(GenesisArgs),
    /// Print version information and exit.
    Version,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the chain database. Created on first run.
    #[arg(long, short = 'd', env = "BLOBCHAIN_DATA_DIR", default_value = ".blobchain")]
    pub data_dir: PathBuf,

    /// Genesis JSON. Only read when the database is empty.
    #[arg(long, short = 'g', env = "BLOBCHAIN_GENESIS")]
    pub genesis: PathBuf,

    /// Airdrop JSON whose keccak256 must match the genesis `airdropHash`.
    #[arg(long, env = "BLOBCHAIN_AIRDROP")]
    pub airdrop: Option<PathBuf>,

    /// Node-local runtime settings (JSON). Defaults apply when omitted.
    #[arg(long, short = 'c', env = "BLOBCHAIN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "BLOBCHAIN_METRICS_PORT", default_value_t = 9652)]
    pub metrics_port: u16,

    /// Log output format.
    #[arg(long, value_enum, env = "BLOBCHAIN_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Parser, Debug)]
pub struct GenesisArgs {
    /// Chain magic. Must be non-zero.
    #[arg(long)]
    pub magic: u64,

    /// Where to write the genesis JSON. Prints to stdout when omitted.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Airdrop JSON to commit to; its keccak256 becomes `airdropHash`.
    #[arg(long)]
    pub airdrop: Option<PathBuf>,

    /// Units every airdrop recipient receives.
    #[arg(long, default_value_t = 0)]
    pub airdrop_units: u64,

    /// Explicit starting balance, as `0xADDRESS=BALANCE`. Repeatable.
    #[arg(long = "allocation", value_name = "ADDR=BALANCE")]
    pub allocations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        BlobchainCli::command().debug_assert();
    }

    #[test]
    fn parses_run_arguments() {
        let cli = BlobchainCli::try_parse_from([
            "blobchain-node",
            "run",
            "--genesis",
            "genesis.json",
            "--log-format",
            "json",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.genesis, PathBuf::from("genesis.json"));
                assert_eq!(args.log_format, LogFormat::Json);
                assert!(args.airdrop.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
