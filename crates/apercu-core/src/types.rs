//! Shared types for the tail pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::RpcError;

/// A `0x`-prefixed hex string: address, hash or quantity.
pub type Hex = String;

// ─── Log ──────────────────────────────────────────────────────────────────────

/// A contract event log, normalized from the raw `eth_getLogs` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: Hex,
    /// `topics[0]` is conventionally the event signature hash.
    pub topics: Vec<Hex>,
    pub data: Hex,
    pub block_number: Hex,
    pub block_hash: Hex,
    pub transaction_hash: Hex,
    pub transaction_index: Hex,
    pub log_index: Hex,
}

impl Log {
    /// Normalize a raw wire object by string coercion of every field.
    ///
    /// A non-array `topics` becomes empty. Topic positions are significant,
    /// so a non-scalar topic entry is an error, as is any missing field.
    pub fn from_raw(raw: &Value) -> Result<Self, RpcError> {
        let topics = match raw.get("topics").and_then(Value::as_array) {
            Some(items) => items
                .iter()
                .enumerate()
                .map(|(i, t)| coerce_string(t).ok_or_else(|| RpcError::malformed(format_args!("log: topics[{i}] is {t}"))))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        Ok(Self {
            address: field(raw, "log", "address")?,
            topics,
            data: field(raw, "log", "data")?,
            block_number: field(raw, "log", "blockNumber")?,
            block_hash: field(raw, "log", "blockHash")?,
            transaction_hash: field(raw, "log", "transactionHash")?,
            transaction_index: field(raw, "log", "transactionIndex")?,
            log_index: field(raw, "log", "logIndex")?,
        })
    }

    /// The event signature topic, if any.
    pub fn topic0(&self) -> Option<&str> {
        self.topics.first().map(String::as_str)
    }
}

// ─── Head ─────────────────────────────────────────────────────────────────────

/// A minimal block header: enough to check chain continuity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Head {
    pub number: Hex,
    pub hash: Hex,
    pub parent_hash: Hex,
}

impl Head {
    /// Parse a `newHeads` notification payload.
    pub fn from_raw(raw: &Value) -> Result<Self, RpcError> {
        Ok(Self {
            number: field(raw, "head", "number")?,
            hash: field(raw, "head", "hash")?,
            parent_hash: field(raw, "head", "parentHash")?,
        })
    }

    /// Returns `true` if `previous` is the parent of `self`.
    pub fn extends(&self, previous: &Head) -> bool {
        self.parent_hash == previous.hash
    }
}

// ─── LogFilter ────────────────────────────────────────────────────────────────

/// Filter for one `eth_getLogs` call over an inclusive block range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    pub address: Hex,
    pub topic0: Option<Hex>,
    pub from_block: Hex,
    pub to_block: Hex,
}

impl LogFilter {
    /// Filter for `address`, optionally narrowed to one event signature.
    pub fn new(address: impl Into<Hex>, topic0: Option<Hex>) -> Self {
        Self {
            address: address.into(),
            topic0,
            from_block: "0x0".into(),
            to_block: "0x0".into(),
        }
    }

    /// Same address/topic filter over `[from, to]`.
    pub fn range(&self, from: impl Into<Hex>, to: impl Into<Hex>) -> Self {
        Self {
            from_block: from.into(),
            to_block: to.into(),
            ..self.clone()
        }
    }

    /// Same address/topic filter over exactly one block.
    pub fn single_block(&self, number: &str) -> Self {
        self.range(number, number)
    }

    /// The `eth_getLogs` parameter array.
    pub fn to_params(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("address".into(), json!(self.address));
        obj.insert("fromBlock".into(), json!(self.from_block));
        obj.insert("toBlock".into(), json!(self.to_block));
        if let Some(topic0) = &self.topic0 {
            obj.insert("topics".into(), json!([topic0]));
        }
        Value::Array(vec![Value::Object(obj)])
    }
}

// ─── TailEvent ────────────────────────────────────────────────────────────────

/// One item of the tail output.
///
/// Serialized with an inline `type` tag: `{"type":"log", ...}` or
/// `{"type":"reorg","oldHead":{..},"newHead":{..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TailEvent {
    Log(Log),
    Reorg {
        #[serde(rename = "oldHead")]
        old_head: Head,
        #[serde(rename = "newHead")]
        new_head: Head,
    },
}

impl TailEvent {
    /// A reorg event if `head` does not extend `previous`.
    pub fn reorg_between(previous: Option<&Head>, head: &Head) -> Option<Self> {
        match previous {
            Some(prev) if !head.extends(prev) => Some(Self::Reorg {
                old_head: prev.clone(),
                new_head: head.clone(),
            }),
            _ => None,
        }
    }

    pub fn is_reorg(&self) -> bool {
        matches!(self, Self::Reorg { .. })
    }
}

impl From<Log> for TailEvent {
    fn from(log: Log) -> Self {
        Self::Log(log)
    }
}

// ─── Field coercion ───────────────────────────────────────────────────────────

fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn field(raw: &Value, what: &str, name: &str) -> Result<String, RpcError> {
    raw.get(name)
        .and_then(coerce_string)
        .ok_or_else(|| RpcError::malformed(format_args!("{what}: missing {name}")))
}

/// Coerce a scalar JSON-RPC result to a string.
pub(crate) fn scalar(value: &Value, what: &str) -> Result<String, RpcError> {
    coerce_string(value).ok_or_else(|| RpcError::malformed(format_args!("{what}: {value}")))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
