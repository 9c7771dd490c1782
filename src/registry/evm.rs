//! JSON-RPC registry client for the deployed vehicle registry contract.
//!
//! Each lookup pins a block first (`eth_blockNumber`) and then performs an
//! `eth_call` of `<lookup_method>(string) returns (address owner, uint8 status)`
//! at that block, so the returned record carries the height it was read at.

use super::client::{RecordStatus, RegistryClient, RegistryError, RegistryRecord};
use super::deployment::DeploymentDescriptor;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// ABI word size.
const WORD: usize = 32;

/// Registry client speaking Ethereum JSON-RPC.
pub struct EvmRegistryClient {
    http: reqwest::Client,
    rpc_url: String,
    contract: String,
    selector: [u8; 4],
    next_id: AtomicU64,
}

impl EvmRegistryClient {
    /// Create a client for the contract described by `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns an error if the ABI does not declare `lookup_method`, the
    /// contract address is malformed, or the HTTP client cannot be built.
    pub fn new(
        rpc_url: impl Into<String>,
        descriptor: &DeploymentDescriptor,
        lookup_method: &str,
        request_timeout: Duration,
    ) -> Result<Self> {
        if !descriptor.has_function(lookup_method) {
            return Err(Error::Deployment(format!(
                "registry ABI has no function named {lookup_method}"
            )));
        }
        let address = descriptor.address_bytes()?;
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        let rpc_url = rpc_url.into();
        let contract = format!("0x{}", hex::encode(address));
        info!("EVM registry client for {} via {}", contract, rpc_url);

        Ok(Self {
            http,
            rpc_url,
            contract,
            selector: function_selector(&format!("{lookup_method}(string)")),
            next_id: AtomicU64::new(1),
        })
    }

    /// Contract address the client calls.
    #[must_use]
    pub fn contract(&self) -> &str {
        &self.contract
    }

    async fn rpc(&self, method: &str, params: Value) -> std::result::Result<Value, RegistryError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RegistryError::Transient(format!("{method} request failed: {e}")))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RegistryError::Transient(format!("{method} returned HTTP {status}")));
        }
        if !status.is_success() {
            return Err(RegistryError::Permanent(format!("{method} returned HTTP {status}")));
        }

        let mut reply: Value = response
            .json()
            .await
            .map_err(|e| RegistryError::Transient(format!("{method} response unreadable: {e}")))?;

        if let Some(error) = reply.get("error") {
            return Err(classify_rpc_error(method, error));
        }
        match reply.get_mut("result") {
            Some(result) => Ok(result.take()),
            None => Err(RegistryError::Permanent(format!("{method} reply has no result"))),
        }
    }

    async fn block_number(&self) -> std::result::Result<u64, RegistryError> {
        let result = self.rpc("eth_blockNumber", json!([])).await?;
        let hex_number = result
            .as_str()
            .ok_or_else(|| RegistryError::Permanent("eth_blockNumber result is not a string".into()))?;
        parse_quantity(hex_number)
    }
}

#[async_trait]
impl RegistryClient for EvmRegistryClient {
    async fn lookup(&self, plate: &str) -> std::result::Result<Option<RegistryRecord>, RegistryError> {
        let block = self.block_number().await?;
        let data = encode_string_call(self.selector, plate);

        debug!(plate, block, "eth_call registry lookup");
        let result = self
            .rpc(
                "eth_call",
                json!([
                    {"to": self.contract, "data": format!("0x{}", hex::encode(data))},
                    format!("0x{block:x}"),
                ]),
            )
            .await?;

        let encoded = result
            .as_str()
            .ok_or_else(|| RegistryError::Permanent("eth_call result is not a string".into()))?;
        let bytes = hex::decode(encoded.trim_start_matches("0x"))
            .map_err(|e| RegistryError::Permanent(format!("eth_call result is not hex: {e}")))?;

        decode_vehicle(&bytes, block)
    }
}

/// First four bytes of the keccak-256 hash of a function signature.
pub(crate) fn function_selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// ABI-encode a call taking a single `string` argument.
pub(crate) fn encode_string_call(selector: [u8; 4], arg: &str) -> Vec<u8> {
    let bytes = arg.as_bytes();
    let padded_len = bytes.len().div_ceil(WORD) * WORD;

    let mut data = Vec::with_capacity(4 + 2 * WORD + padded_len);
    data.extend_from_slice(&selector);
    data.extend_from_slice(&usize_word(WORD));
    data.extend_from_slice(&usize_word(bytes.len()));
    data.extend_from_slice(bytes);
    data.resize(4 + 2 * WORD + padded_len, 0);
    data
}

fn usize_word(value: usize) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&(value as u64).to_be_bytes());
    word
}

/// Decode `(address owner, uint8 status)`; status 0 or a zero owner means
/// the plate is not registered.
pub(crate) fn decode_vehicle(
    data: &[u8],
    block: u64,
) -> std::result::Result<Option<RegistryRecord>, RegistryError> {
    if data.len() < 2 * WORD {
        return Err(RegistryError::Permanent(format!(
            "registry returned {} bytes, expected at least {}",
            data.len(),
            2 * WORD
        )));
    }

    let owner = &data[WORD - 20..WORD];
    let status_word = &data[WORD..2 * WORD];
    if status_word[..WORD - 1].iter().any(|b| *b != 0) {
        return Err(RegistryError::Permanent("status word out of range".into()));
    }

    let status = match status_word[WORD - 1] {
        0 => return Ok(None),
        1 => RecordStatus::Active,
        2 => RecordStatus::Revoked,
        3 => RecordStatus::Expired,
        other => {
            return Err(RegistryError::Permanent(format!("unknown registry status {other}")));
        }
    };
    if owner.iter().all(|b| *b == 0) {
        return Ok(None);
    }

    Ok(Some(RegistryRecord::new(
        format!("0x{}", hex::encode(owner)),
        status,
        block,
    )))
}

fn parse_quantity(value: &str) -> std::result::Result<u64, RegistryError> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| RegistryError::Permanent(format!("invalid quantity {value}: {e}")))
}

/// Reverts mean the contract rejected the input; anything else is treated as
/// a node-side hiccup.
fn classify_rpc_error(method: &str, error: &Value) -> RegistryError {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");

    if code == 3 || message.contains("revert") || (-32602..=-32600).contains(&code) {
        RegistryError::Permanent(format!("{method} rejected: {message}"))
    } else {
        warn!(code, message, "Registry node error");
        RegistryError::Transient(format!("{method} failed ({code}): {message}"))
    }
}
