//! apercu: `tail -f` for EVM contract event logs.
//!
//! # Usage
//! ```text
//! apercu <ADDRESS> --rpc <URL> [--topic0 <HASH>] [-n <N>] [--no-follow] [--format pretty|jsonl]
//! ```

use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use apercu_core::{run_tail, ConfigError, OutputFormat, RetryPolicy, TailConfig, TailEngine, WriterSink};
use apercu_ws::{chain_rpc, WsClientConfig};

mod logging;

/// Conventional exit status after SIGINT.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "apercu",
    about = "tail -f for EVM logs",
    long_about = "
apercu: stream a contract's event logs from a WebSocket JSON-RPC node.
Optionally replays the last N blocks, then follows new heads and reports
chain reorganizations as they happen.

ENVIRONMENT VARIABLES:
  APERCU_RPC_URL    WebSocket RPC endpoint (instead of --rpc)
  RUST_LOG          Log filter when --log-level is not given
",
    version,
    arg_required_else_help = true
)]
struct Cli {
    /// Contract address
    address: String,

    /// WebSocket RPC endpoint (ws:// or wss://)
    #[arg(long, env = "APERCU_RPC_URL")]
    rpc: Option<String>,

    /// Filter by event signature (topic0)
    #[arg(long)]
    topic0: Option<String>,

    /// Replay last N blocks before following
    #[arg(short = 'n', long = "replay", value_name = "N", default_value_t = 0)]
    replay: u64,

    /// Follow new blocks (default)
    #[arg(short = 'f', long, overrides_with = "no_follow")]
    follow: bool,

    /// Disable following new blocks
    #[arg(long = "no-follow", overrides_with = "follow")]
    no_follow: bool,

    /// Output format: pretty | jsonl
    #[arg(long, default_value = "pretty")]
    format: String,

    /// Ceiling for a single retry delay, in milliseconds (default: none)
    #[arg(long, value_name = "MS")]
    max_backoff_ms: Option<u64>,

    /// Give up after this many consecutive retries (default: retry forever)
    #[arg(long, value_name = "N")]
    max_retries: Option<u32>,

    /// Log filter, e.g. "info" or "apercu_ws=debug" (logs go to stderr)
    #[arg(long, value_name = "FILTER")]
    log_level: Option<String>,
}

impl Cli {
    fn to_config(&self) -> Result<TailConfig, ConfigError> {
        let rpc_url = self.rpc.clone().ok_or(ConfigError::MissingRpcUrl)?;
        let mut config = TailConfig::new(self.address.clone(), rpc_url);
        config.topic0 = self.topic0.clone();
        config.replay_blocks = self.replay;
        config.follow = !self.no_follow;
        config.format = self.format.parse::<OutputFormat>()?;
        config.retry.max_backoff = self.max_backoff_ms.map(Duration::from_millis);
        config.retry.max_retries = self.max_retries;
        config.validate()?;
        Ok(config)
    }
}

enum Outcome {
    Finished,
    Interrupted,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(cli.log_level.as_deref());

    match run(cli).await {
        Ok(Outcome::Finished) => ExitCode::SUCCESS,
        Ok(Outcome::Interrupted) => ExitCode::from(EXIT_INTERRUPTED),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Outcome> {
    let config = cli.to_config()?;
    tracing::info!(
        address = %config.address,
        rpc = %config.rpc_url,
        replay = config.replay_blocks,
        follow = config.follow,
        "starting tail"
    );

    let rpc = chain_rpc(
        &config.rpc_url,
        WsClientConfig::default(),
        RetryPolicy::new(config.retry.clone()),
    );
    let events = TailEngine::new(Arc::new(rpc), &config).stream();
    let mut sink = WriterSink::new(io::stdout().lock());

    // Dropping the stream on Ctrl-C unsubscribes and closes both sockets.
    tokio::select! {
        result = run_tail(events, config.format, &mut sink) => {
            result?;
            Ok(Outcome::Finished)
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            Ok(Outcome::Interrupted)
        }
    }
}
