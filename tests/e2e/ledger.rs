//! In-process JSON-RPC ledger node for registry E2E tests.
//!
//! Answers `eth_blockNumber` and `eth_call` against the registry lookup
//! function from an in-memory plate table, and can be told to fail the next
//! few requests with HTTP 503.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Registry contract address written to the deployment descriptor.
pub const CONTRACT_ADDRESS: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

const WORD: usize = 32;

#[derive(Default)]
struct LedgerState {
    plates: Mutex<HashMap<String, ([u8; 20], u8)>>,
    block: AtomicU64,
    fail_next: AtomicUsize,
    calls: AtomicUsize,
}

/// A running fake ledger node.
pub struct TestLedger {
    addr: SocketAddr,
    state: Arc<LedgerState>,
    task: JoinHandle<()>,
}

impl TestLedger {
    /// Start the node on an ephemeral port.
    pub async fn start() -> Self {
        let state = Arc::new(LedgerState::default());
        state.block.store(100, Ordering::SeqCst);

        let app = Router::new()
            .route("/", post(handle_rpc))
            .with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ledger");
        let addr = listener.local_addr().expect("ledger addr");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        info!("Test ledger listening on {addr}");
        Self { addr, state, task }
    }

    /// JSON-RPC endpoint.
    pub fn rpc_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Register a plate with an owner byte pattern and raw status code.
    pub fn set_plate(&self, plate: &str, owner_byte: u8, status: u8) {
        self.state
            .plates
            .lock()
            .insert(plate.to_string(), ([owner_byte; 20], status));
    }

    /// Fail the next `n` requests with HTTP 503.
    pub fn fail_next(&self, n: usize) {
        self.state.fail_next.store(n, Ordering::SeqCst);
    }

    /// `eth_call` requests served.
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Write a deployment descriptor for this node's registry into `dir`.
    pub fn write_descriptor(&self, dir: &Path) -> PathBuf {
        let path = dir.join("deployment-info.json");
        let descriptor = json!({
            "address": CONTRACT_ADDRESS,
            "abi": [{
                "type": "function",
                "name": "getVehicle",
                "stateMutability": "view",
                "inputs": [{"name": "plate", "type": "string"}],
                "outputs": [
                    {"name": "owner", "type": "address"},
                    {"name": "status", "type": "uint8"}
                ]
            }]
        });
        std::fs::write(&path, descriptor.to_string()).expect("write descriptor");
        path
    }
}

impl Drop for TestLedger {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_rpc(State(state): State<Arc<LedgerState>>, Json(request): Json<Value>) -> Response {
    let failing = state
        .fail_next
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(Value::as_str).unwrap_or("");
    let result = match method {
        "eth_blockNumber" => {
            json!(format!("0x{:x}", state.block.load(Ordering::SeqCst)))
        }
        "eth_call" => {
            state.calls.fetch_add(1, Ordering::SeqCst);
            let data = request["params"][0]["data"].as_str().unwrap_or("0x");
            let plate = decode_plate(data);
            let (owner, status) = state
                .plates
                .lock()
                .get(&plate)
                .copied()
                .unwrap_or(([0; 20], 0));
            json!(format!("0x{}", hex::encode(encode_vehicle(owner, status))))
        }
        other => {
            return Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("method not found: {other}")}
            }))
            .into_response();
        }
    };

    Json(json!({"jsonrpc": "2.0", "id": id, "result": result})).into_response()
}

/// Pull the string argument out of `selector ‖ offset ‖ length ‖ bytes`.
fn decode_plate(data: &str) -> String {
    let bytes = hex::decode(data.trim_start_matches("0x")).unwrap_or_default();
    let body = bytes.get(4..).unwrap_or_default();
    let len_word = body.get(WORD..2 * WORD).unwrap_or_default();
    let len = len_word
        .get(WORD - 8..)
        .and_then(|b| <[u8; 8]>::try_from(b).ok())
        .map_or(0, u64::from_be_bytes) as usize;
    let text = body.get(2 * WORD..2 * WORD + len).unwrap_or_default();
    String::from_utf8_lossy(text).into_owned()
}

fn encode_vehicle(owner: [u8; 20], status: u8) -> Vec<u8> {
    let mut out = vec![0u8; 2 * WORD];
    out[WORD - 20..WORD].copy_from_slice(&owner);
    out[2 * WORD - 1] = status;
    out
}
