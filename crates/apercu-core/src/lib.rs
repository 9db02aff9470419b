//! apercu-core: `tail -f` for EVM contract event logs.
//!
//! # Overview
//!
//! The core crate holds everything that does not touch a socket:
//!
//! - [`RpcTransport`]: the async trait a JSON-RPC connection implements
//! - [`ChainRpc`] / [`ChainRpcService`]: typed chain calls with retry and resubscription
//! - [`TailEngine`]: replay, live head-following and reorg detection as one stream
//! - [`format`] and [`output`]: pretty and JSONL rendering, the output sink
//! - [`TailConfig`]: validated invocation settings
//! - [`RpcError`] / [`ConfigError`]: structured error types

pub mod config;
pub mod error;
pub mod format;
pub mod hex;
pub mod output;
pub mod policy;
pub mod request;
pub mod rpc;
pub mod tail;
pub mod transport;
pub mod types;

pub use config::TailConfig;
pub use error::{ConfigError, RpcError};
pub use format::{format_jsonl, format_pretty, OutputFormat};
pub use output::{run_tail, OutputSink, TailError, WriterSink};
pub use policy::{RetryConfig, RetryPolicy};
pub use request::{JsonRpcRequest, JsonRpcResponse, RpcId};
pub use rpc::{ChainRpc, ChainRpcService, HeadStream};
pub use tail::{TailEngine, TailStream};
pub use transport::{Notifications, RpcTransport};
pub use types::{Head, Hex, Log, LogFilter, TailEvent};
