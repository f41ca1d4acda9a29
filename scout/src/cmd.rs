//! The `scout` cli command.

use crate::{analyzer::AddressAnalyzer, engine::DiscoveryEngine, errors::DiscoveryError, output};
use clap::Parser;
use ethers_core::types::Chain;
use ethers_etherscan::Client;
use ethers_providers::{Http, HttpRateLimitRetryPolicy, Provider, RetryClientBuilder};
use scout_common::{
    EtherscanSourceService, OfflineSourceService, PinnedClient, SourceCodeService,
    DEFAULT_CONCURRENCY,
};
use scout_config::read_config;
use std::{path::PathBuf, process::ExitCode, str::FromStr, sync::Arc, time::Duration};
use tracing::warn;

/// Exit code for configuration errors (schema violations, cycles).
const EXIT_CONFIG: u8 = 1;
/// Exit code for unrecoverable infrastructure errors.
const EXIT_INFRA: u8 = 2;
/// Exit code when `--strict` is set and the address cap truncated the run.
const EXIT_CAP: u8 = 3;

#[derive(Clone, Debug, Parser)]
pub struct DiscoverArgs {
    #[clap(help = "Path to the project config (JSONC)", value_name = "CONFIG")]
    pub config: PathBuf,

    #[clap(long, short = 'r', help = "URL of the JSON-RPC endpoint", env = "SCOUT_RPC_URL")]
    pub rpc_url: String,

    #[clap(long, help = "Block height to pin the run to; defaults to the current head")]
    pub block: Option<u64>,

    #[clap(
        long,
        help = "Etherscan-compatible API key for verified source; without one every contract reads as unverified",
        env = "ETHERSCAN_API_KEY"
    )]
    pub etherscan_api_key: Option<String>,

    #[clap(long, help = "Template bundle directory", default_value = "templates")]
    pub templates: PathBuf,

    #[clap(long, short, help = "File the artifact is written to", default_value = "discovered.json")]
    pub out: PathBuf,

    #[clap(long, help = "Maximum outstanding provider requests", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    #[clap(long, help = "Number of retries for transient provider failures", default_value = "5")]
    pub retries: u32,

    #[clap(long, help = "Fail (exit 3) when maxAddresses truncates discovery")]
    pub strict: bool,

    #[clap(long, help = "don't print anything on success")]
    pub silent: bool,
}

impl DiscoverArgs {
    pub async fn run(self) -> ExitCode {
        let config = match read_config(&self.config) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("scout: {err}");
                return ExitCode::from(EXIT_CONFIG)
            }
        };

        let templates = match crate::template::TemplateService::load(&self.templates) {
            Ok(templates) => Arc::new(templates),
            Err(err) => {
                eprintln!("scout: {err}");
                return ExitCode::from(EXIT_CONFIG)
            }
        };

        let http = match Http::from_str(&self.rpc_url) {
            Ok(http) => http,
            Err(err) => {
                eprintln!("scout: invalid rpc url: {err}");
                return ExitCode::from(EXIT_CONFIG)
            }
        };
        let retry_client = RetryClientBuilder::default()
            .rate_limit_retries(self.retries)
            .timeout_retries(self.retries)
            .initial_backoff(Duration::from_millis(500))
            .build(http, Box::new(HttpRateLimitRetryPolicy::default()));
        let inner = Provider::new(retry_client);

        let provider = match self.block {
            Some(block) => PinnedClient::with_concurrency(inner, block, self.concurrency),
            None => match PinnedClient::latest(inner).await {
                Ok(provider) => provider,
                Err(err) => {
                    eprintln!("scout: could not reach the rpc endpoint: {err}");
                    return ExitCode::from(EXIT_INFRA)
                }
            },
        };
        let block_number = scout_common::DiscoveryProvider::block_number(&provider);

        let sources: Arc<dyn SourceCodeService> = match &self.etherscan_api_key {
            Some(key) => {
                let chain = parse_chain(&config.chain);
                match Client::new(chain, key.clone()) {
                    Ok(client) => Arc::new(EtherscanSourceService::new(client)),
                    Err(err) => {
                        eprintln!("scout: could not build the explorer client: {err}");
                        return ExitCode::from(EXIT_CONFIG)
                    }
                }
            }
            None => {
                warn!(target: "scout::cli", "no explorer api key, sources read as unverified");
                Arc::new(OfflineSourceService)
            }
        };

        let engine = DiscoveryEngine::new(AddressAnalyzer::new(sources, templates));
        let outcome = match engine.discover(&provider, &config).await {
            Ok(outcome) => outcome,
            Err(DiscoveryError::Config(err)) => {
                eprintln!("scout: {err}");
                return ExitCode::from(EXIT_CONFIG)
            }
            Err(err) => {
                eprintln!("scout: {err}");
                return ExitCode::from(EXIT_INFRA)
            }
        };

        let artifact = output::materialize(&config, block_number, &outcome.analyses);
        let serialized = match artifact.to_pretty_json() {
            Ok(serialized) => serialized,
            Err(err) => {
                eprintln!("scout: could not serialize the artifact: {err}");
                return ExitCode::from(EXIT_INFRA)
            }
        };
        if let Err(err) = std::fs::write(&self.out, serialized) {
            eprintln!("scout: could not write {}: {err}", self.out.display());
            return ExitCode::from(EXIT_INFRA)
        }

        if !self.silent {
            println!(
                "Discovered {} entries at block {block_number} -> {}",
                artifact.entries.len(),
                self.out.display()
            );
        }

        if !outcome.dropped.is_empty() && self.strict {
            eprintln!(
                "scout: maxAddresses truncated discovery, {} relatives dropped",
                outcome.dropped.len()
            );
            return ExitCode::from(EXIT_CAP)
        }

        ExitCode::SUCCESS
    }
}

fn parse_chain(chain: &str) -> Chain {
    match chain {
        "ethereum" => Chain::Mainnet,
        other => other.parse().unwrap_or_else(|_| {
            warn!(target: "scout::cli", chain = other, "unknown chain name, assuming mainnet");
            Chain::Mainnet
        }),
    }
}

/// Initializes the subscriber; `RUST_LOG` wins when set.
pub fn init_tracing() {
    use tracing_subscriber::prelude::*;

    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::from_default_env()
    } else {
        tracing_subscriber::EnvFilter::new("scout=info")
    };
    tracing_subscriber::Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
