//! WsRpcClient against an in-process WebSocket node.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use apercu_core::policy::RetryPolicy;
use apercu_core::rpc::ChainRpc;
use apercu_core::tail::TailEngine;
use apercu_core::transport::RpcTransport;
use apercu_core::types::{Head, TailEvent};
use apercu_core::TailConfig;
use apercu_ws::{chain_rpc, WsClientConfig, WsRpcClient};

type ServerWs = WebSocketStream<TcpStream>;

/// Bind on `127.0.0.1:0` and run `handler` for every accepted socket.
/// Returns the `ws://` URL and a counter of accepted connections.
async fn spawn_node<F, Fut>(handler: F) -> (String, Arc<AtomicUsize>)
where
    F: Fn(ServerWs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepts);
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Ok(ws) = accept_async(tcp).await {
                    handler(ws).await;
                }
            });
        }
    });
    (url, accepts)
}

async fn send(ws: &mut ServerWs, frame: Value) {
    let _ = ws.send(Message::Text(frame.to_string().into())).await;
}

fn result(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn push(subscription: &str, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": {"subscription": subscription, "result": result}
    })
}

fn raw_head(number: &str, hash: &str, parent: &str) -> Value {
    json!({"number": number, "hash": hash, "parentHash": parent, "timestamp": "0x0"})
}

fn raw_log(block: &str, index: &str) -> Value {
    json!({
        "address": "0x5b06224f736a57635b5bcb50b8ef178b189107cb",
        "topics": ["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"],
        "data": "0x",
        "blockNumber": block,
        "blockHash": format!("0xbh{block}"),
        "transactionHash": format!("0xtx{block}{index}"),
        "transactionIndex": "0x0",
        "logIndex": index,
        "removed": false
    })
}

/// A small node: canned answers per method, every request reported on `seen`.
async fn node(mut ws: ServerWs, seen: mpsc::UnboundedSender<Value>) {
    while let Some(Ok(msg)) = ws.next().await {
        let Message::Text(text) = msg else { continue };
        let req: Value = serde_json::from_str(text.as_str()).unwrap();
        let _ = seen.send(req.clone());
        let id = req["id"].clone();
        match req["method"].as_str().unwrap_or_default() {
            "eth_blockNumber" => send(&mut ws, result(&id, json!("0x10"))).await,
            "eth_getLogs" => {
                let filter = &req["params"][0];
                let logs = match (filter["fromBlock"].as_str(), filter["toBlock"].as_str()) {
                    (Some("0xf"), Some("0x10")) => json!([raw_log("0xf", "0x0"), raw_log("0x10", "0x0")]),
                    (Some("0x1"), Some("0x1")) => json!([raw_log("0x1", "0x0")]),
                    (Some("0x2"), Some("0x2")) => json!([raw_log("0x2", "0x0")]),
                    _ => json!([]),
                };
                send(&mut ws, result(&id, logs)).await;
            }
            "eth_subscribe" => {
                // Pushes follow the confirmation back to back.
                send(&mut ws, result(&id, json!("0xsub1"))).await;
                send(&mut ws, push("0xsub1", raw_head("0x1", "0xaaa", "0x000"))).await;
                send(&mut ws, push("0xunknown", raw_head("0x9", "0x999", "0x998"))).await;
                send(&mut ws, push("0xsub1", raw_head("0x2", "0xbbb", "0x999"))).await;
            }
            "eth_unsubscribe" => send(&mut ws, result(&id, json!(true))).await,
            "fail" => {
                send(
                    &mut ws,
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32000, "message": "execution reverted", "data": "0x08c379a0"}
                    }),
                )
                .await
            }
            "garbage" => {
                let _ = ws.send(Message::Text("not json".to_string().into())).await;
                send(&mut ws, result(&json!(999_999), json!("stray"))).await;
                send(&mut ws, json!({"jsonrpc": "2.0", "method": "eth_other", "params": []})).await;
                send(&mut ws, result(&id, json!("after garbage"))).await;
            }
            "hang" => {
                let _ = ws.close(None).await;
                return;
            }
            other => send(&mut ws, result(&id, json!(other))).await,
        }
    }
}

async fn spawn_default_node() -> (String, Arc<AtomicUsize>, mpsc::UnboundedReceiver<Value>) {
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let (url, accepts) = spawn_node(move |ws| node(ws, seen_tx.clone())).await;
    (url, accepts, seen_rx)
}

fn client(url: &str) -> WsRpcClient {
    WsRpcClient::new(url, WsClientConfig::default())
}

#[tokio::test]
async fn request_round_trip() {
    let (url, accepts, mut seen) = spawn_default_node().await;
    let client = client(&url);
    assert_eq!(accepts.load(Ordering::SeqCst), 0, "connect is lazy");

    let value = client.request("eth_blockNumber", json!([])).await.unwrap();
    assert_eq!(value, json!("0x10"));

    let req = seen.recv().await.unwrap();
    assert_eq!(req["jsonrpc"], "2.0");
    assert_eq!(req["method"], "eth_blockNumber");
    assert_eq!(req["params"], json!([]));
    assert!(req["id"].is_u64());
}

#[tokio::test]
async fn out_of_order_responses_reach_their_callers() {
    let (url, _) = spawn_node(|mut ws: ServerWs| async move {
        let mut held = Vec::new();
        while let Some(Ok(Message::Text(text))) = ws.next().await {
            let req: Value = serde_json::from_str(text.as_str()).unwrap();
            held.push(req);
            if held.len() == 2 {
                for req in held.drain(..).rev() {
                    send(&mut ws, result(&req["id"], req["method"].clone())).await;
                }
            }
        }
    })
    .await;
    let client = client(&url);

    let (a, b) = tokio::join!(client.request("first", json!([])), client.request("second", json!([])));
    assert_eq!(a.unwrap(), json!("first"));
    assert_eq!(b.unwrap(), json!("second"));
}

#[tokio::test]
async fn error_response_keeps_code_message_and_data() {
    let (url, _, _seen) = spawn_default_node().await;
    let err = client(&url).request("fail", json!([])).await.unwrap_err();
    assert_eq!(err.message, "execution reverted");
    assert_eq!(err.code, Some(-32000));
    assert_eq!(err.data, Some(json!("0x08c379a0")));
}

#[tokio::test]
async fn close_rejects_pending_and_next_call_reconnects() {
    let (url, accepts, _seen) = spawn_default_node().await;
    let client = client(&url);

    let err = client.request("hang", json!([])).await.unwrap_err();
    assert!(err.is_closed(), "unexpected error: {err}");
    assert_eq!(err.to_string(), "WebSocket closed");

    let value = client.request("eth_blockNumber", json!([])).await.unwrap();
    assert_eq!(value, json!("0x10"));
    assert_eq!(accepts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn concurrent_first_use_opens_one_connection() {
    let (url, accepts, _seen) = spawn_default_node().await;
    let client = client(&url);

    let calls = (0..8).map(|i| client.request("echo", json!([i])));
    let results = futures::future::join_all(calls).await;
    assert!(results.iter().all(|r| r.as_ref().unwrap() == &json!("echo")));
    assert_eq!(accepts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn garbage_frames_do_not_disturb_calls() {
    let (url, accepts, _seen) = spawn_default_node().await;
    let client = client(&url);

    assert_eq!(client.request("garbage", json!([])).await.unwrap(), json!("after garbage"));
    assert_eq!(client.request("eth_blockNumber", json!([])).await.unwrap(), json!("0x10"));
    assert_eq!(accepts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn subscription_receives_pushes_in_order() {
    let (url, _, mut seen) = spawn_default_node().await;
    let client = client(&url);

    let sub = client.subscribe("newHeads", None).await.unwrap();
    let heads: Vec<Value> = sub.take(2).map(|item| item.unwrap()).collect().await;
    assert_eq!(heads[0]["hash"], "0xaaa");
    assert_eq!(heads[1]["hash"], "0xbbb");

    let req = seen.recv().await.unwrap();
    assert_eq!(req["method"], "eth_subscribe");
    assert_eq!(req["params"], json!(["newHeads"]));
}

#[tokio::test]
async fn dropping_a_subscription_unsubscribes() {
    let (url, _, mut seen) = spawn_default_node().await;
    let client = client(&url);

    let sub = client.subscribe("newHeads", None).await.unwrap();
    drop(sub);

    assert_eq!(next_unsubscribe(&mut seen).await["params"], json!(["0xsub1"]));
}

async fn next_unsubscribe(seen: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let req = seen.recv().await.unwrap();
            if req["method"] == "eth_unsubscribe" {
                return req;
            }
        }
    })
    .await
    .expect("no eth_unsubscribe within 5s")
}

#[tokio::test]
async fn unsubscribe_queued_behind_close_is_still_sent() {
    let (url, _, mut seen) = spawn_default_node().await;
    let client = client(&url);

    let sub = client.subscribe("newHeads", None).await.unwrap();
    drop(client);
    drop(sub);

    assert_eq!(next_unsubscribe(&mut seen).await["params"], json!(["0xsub1"]));
}

#[tokio::test]
async fn server_close_ends_subscription_with_error() {
    let (url, _) = spawn_node(|mut ws: ServerWs| async move {
        if let Some(Ok(Message::Text(text))) = ws.next().await {
            let req: Value = serde_json::from_str(text.as_str()).unwrap();
            send(&mut ws, result(&req["id"], json!("0xsub1"))).await;
            send(&mut ws, push("0xsub1", raw_head("0x1", "0xaaa", "0x000"))).await;
            let _ = ws.close(None).await;
        }
    })
    .await;
    let client = client(&url);

    let items: Vec<_> = client.subscribe("newHeads", None).await.unwrap().collect().await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap()["number"], "0x1");
    assert!(items[1].as_ref().unwrap_err().is_closed());
}

#[tokio::test]
async fn connect_failure_is_an_rpc_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let err = client(&url).request("eth_blockNumber", json!([])).await.unwrap_err();
    assert!(err.message.starts_with("WebSocket connect failed"), "{err}");
    assert!(std::error::Error::source(&err).is_some());
}

#[tokio::test]
async fn stalled_handshake_times_out() {
    // Accepted by the kernel backlog but never upgraded.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let config = WsClientConfig {
        connect_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let client = WsRpcClient::new(&url, config);

    let err = tokio::time::timeout(Duration::from_secs(5), client.request("eth_blockNumber", json!([])))
        .await
        .expect("connect did not time out")
        .unwrap_err();
    assert!(err.message.starts_with("WebSocket connect failed: timed out"), "{err}");
    assert!(std::error::Error::source(&err).is_some());
    drop(listener);
}

// ─── End to end through the chain RPC service and tail engine ───────────────

fn tail_config(url: &str, replay_blocks: u64, follow: bool) -> TailConfig {
    let mut config = TailConfig::new("0x5b06224f736a57635b5bcb50b8ef178b189107cb", url);
    config.replay_blocks = replay_blocks;
    config.follow = follow;
    config
}

#[tokio::test]
async fn replay_over_websocket() {
    let (url, _, _seen) = spawn_default_node().await;
    let rpc: Arc<dyn ChainRpc> = Arc::new(chain_rpc(&url, WsClientConfig::default(), RetryPolicy::default()));

    let events: Vec<TailEvent> = TailEngine::new(rpc, &tail_config(&url, 2, false))
        .stream()
        .map(|e| e.unwrap())
        .collect()
        .await;
    let blocks: Vec<&str> = events
        .iter()
        .map(|e| match e {
            TailEvent::Log(log) => log.block_number.as_str(),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(blocks, ["0xf", "0x10"]);
}

#[tokio::test]
async fn follow_over_websocket_reports_reorg() {
    let (url, accepts, _seen) = spawn_default_node().await;
    let rpc: Arc<dyn ChainRpc> = Arc::new(chain_rpc(&url, WsClientConfig::default(), RetryPolicy::default()));

    let events: Vec<TailEvent> = TailEngine::new(rpc, &tail_config(&url, 0, true))
        .stream()
        .take(3)
        .map(|e| e.unwrap())
        .collect()
        .await;

    let h1 = Head { number: "0x1".into(), hash: "0xaaa".into(), parent_hash: "0x000".into() };
    let h2 = Head { number: "0x2".into(), hash: "0xbbb".into(), parent_hash: "0x999".into() };
    assert!(matches!(&events[0], TailEvent::Log(log) if log.block_number == "0x1"));
    assert_eq!(events[1], TailEvent::Reorg { old_head: h1, new_head: h2 });
    assert!(matches!(&events[2], TailEvent::Log(log) if log.block_number == "0x2"));
    // One socket for calls, one for the head subscription.
    assert_eq!(accepts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stopping_a_tail_unsubscribes_from_heads() {
    let (url, _, mut seen) = spawn_default_node().await;
    let rpc: Arc<dyn ChainRpc> = Arc::new(chain_rpc(&url, WsClientConfig::default(), RetryPolicy::default()));

    let mut events = TailEngine::new(rpc, &tail_config(&url, 0, true)).stream();
    let first = events.next().await.unwrap().unwrap();
    assert!(matches!(&first, TailEvent::Log(log) if log.block_number == "0x1"));
    drop(events);

    assert_eq!(next_unsubscribe(&mut seen).await["params"], json!(["0xsub1"]));
}
