//! Line rendering for tail events.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::types::TailEvent;

/// How each event is rendered on stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable `key=value` lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Jsonl,
}

impl OutputFormat {
    pub fn render(self, event: &TailEvent) -> String {
        match self {
            Self::Pretty => format_pretty(event),
            Self::Jsonl => format_jsonl(event),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pretty" => Ok(Self::Pretty),
            "jsonl" => Ok(Self::Jsonl),
            other => Err(ConfigError::invalid_option(
                "--format",
                format!("expected 'pretty' or 'jsonl', got '{other}'"),
            )),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Jsonl => "jsonl",
        })
    }
}

pub fn format_pretty(event: &TailEvent) -> String {
    match event {
        TailEvent::Log(log) => format!(
            "block={} tx={} log={} addr={} topic0={} data={}",
            log.block_number,
            log.transaction_hash,
            log.log_index,
            log.address,
            log.topic0().unwrap_or(""),
            log.data
        ),
        TailEvent::Reorg { old_head, new_head } => format!(
            "reorg detected: old={} new={} height={}",
            old_head.hash, new_head.hash, new_head.number
        ),
    }
}

/// Compact JSON with an inline `type` tag.
pub fn format_jsonl(event: &TailEvent) -> String {
    // TailEvent is plain strings; serialization cannot fail.
    serde_json::to_string(event).unwrap_or_default()
}
