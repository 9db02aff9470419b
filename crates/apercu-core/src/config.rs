//! Invocation settings for one tail run.

use url::Url;

use crate::error::ConfigError;
use crate::format::OutputFormat;
use crate::policy::RetryConfig;
use crate::types::{Hex, LogFilter};

/// Everything one `apercu` invocation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct TailConfig {
    /// Contract address whose logs are tailed.
    pub address: Hex,
    /// Optional event signature filter (`topics[0]`).
    pub topic0: Option<Hex>,
    /// WebSocket JSON-RPC endpoint (`ws://` or `wss://`).
    pub rpc_url: String,
    /// Number of most recent blocks to replay before following. `0` = no replay.
    pub replay_blocks: u64,
    /// Keep following new heads after replay.
    pub follow: bool,
    pub format: OutputFormat,
    pub retry: RetryConfig,
}

impl TailConfig {
    /// Follow `address` on `rpc_url` with no replay and default retry.
    pub fn new(address: impl Into<Hex>, rpc_url: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            topic0: None,
            rpc_url: rpc_url.into(),
            replay_blocks: 0,
            follow: true,
            format: OutputFormat::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Check local input. Runs before any network activity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::MissingAddress);
        }
        if self.rpc_url.trim().is_empty() {
            return Err(ConfigError::MissingRpcUrl);
        }
        let url = Url::parse(&self.rpc_url).map_err(|e| ConfigError::InvalidRpcUrl {
            url: self.rpc_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidRpcUrl {
                url: self.rpc_url.clone(),
                reason: format!("scheme must be ws or wss, got {}", url.scheme()),
            });
        }
        if matches!(&self.topic0, Some(t) if t.trim().is_empty()) {
            return Err(ConfigError::invalid_option("--topic0", "must not be empty"));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::invalid_option(
                "retry multiplier",
                format!("must be a finite number >= 1, got {}", self.retry.multiplier),
            ));
        }
        Ok(())
    }

    /// Address/topic filter with an unset block range.
    pub fn base_filter(&self) -> LogFilter {
        LogFilter::new(self.address.clone(), self.topic0.clone())
    }
}
