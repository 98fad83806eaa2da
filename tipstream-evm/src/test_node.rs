//! Scripted JSON-RPC node for adapter tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const SENDER: &str = "0x1111111111111111111111111111111111111111";

/// Timestamp of block `number` on the fake chain.
pub const fn block_time(number: u64) -> u64 {
    1_700_000_000 + number * 12
}

pub fn hex(n: u64) -> String {
    format!("{n:#x}")
}

pub fn tx_hash(tag: u8) -> String {
    format!("0x{}", format!("{tag:02x}").repeat(32))
}

/// Answers a JSON-RPC request with `result`, echoing its id.
pub fn reply(req: &Request, result: Value) -> ResponseTemplate {
    let body: Value = serde_json::from_slice(&req.body).unwrap();
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": body["id"],
        "result": result,
    }))
}

pub fn rpc_result(result: Value) -> impl Fn(&Request) -> ResponseTemplate {
    move |req: &Request| reply(req, result.clone())
}

pub async fn mount(server: &MockServer, body: Value, result: Value) {
    Mock::given(method("POST"))
        .and(body_partial_json(body))
        .respond_with(rpc_result(result))
        .mount(server)
        .await;
}

/// Full block with legacy value transfers `(hash tag, recipient, wei)`.
pub fn block(number: u64, txs: &[(u8, &str, u128)]) -> Value {
    let block_hash = format!("0x{:064x}", number + 1);
    let transactions: Vec<Value> = txs
        .iter()
        .enumerate()
        .map(|(i, (tag, to, wei))| {
            json!({
                "type": "0x0",
                "hash": tx_hash(*tag),
                "nonce": hex(i as u64),
                "blockHash": block_hash,
                "blockNumber": hex(number),
                "transactionIndex": hex(i as u64),
                "from": SENDER,
                "to": to,
                "value": format!("{wei:#x}"),
                "gasPrice": "0x3b9aca00",
                "gas": "0x5208",
                "input": "0x",
                "v": "0x25",
                "r": "0x1",
                "s": "0x1",
                "chainId": "0x1"
            })
        })
        .collect();
    json!({
        "hash": block_hash,
        "parentHash": format!("0x{}", "00".repeat(32)),
        "sha3Uncles": format!("0x{}", "00".repeat(32)),
        "miner": SENDER,
        "stateRoot": format!("0x{}", "00".repeat(32)),
        "transactionsRoot": format!("0x{}", "00".repeat(32)),
        "receiptsRoot": format!("0x{}", "00".repeat(32)),
        "logsBloom": format!("0x{}", "00".repeat(256)),
        "difficulty": "0x0",
        "number": hex(number),
        "gasLimit": "0x1c9c380",
        "gasUsed": "0x5208",
        "timestamp": hex(block_time(number)),
        "extraData": "0x",
        "mixHash": format!("0x{}", "00".repeat(32)),
        "nonce": "0x0000000000000000",
        "baseFeePerGas": "0x7",
        "uncles": [],
        "transactions": transactions
    })
}

/// A chain whose head can be moved between polls. Every block up to the
/// head exists; blocks above it are `null`.
#[derive(Debug, Default)]
pub struct FakeChain {
    head: AtomicU64,
    txs: HashMap<u64, Vec<(u8, &'static str, u128)>>,
}

impl FakeChain {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            txs: HashMap::new(),
        }
    }

    pub fn with_tx(mut self, number: u64, tag: u8, to: &'static str, wei: u128) -> Self {
        self.txs.entry(number).or_default().push((tag, to, wei));
        self
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    /// Serves `eth_blockNumber` and `eth_getBlockByNumber` from this chain.
    pub async fn mount(self: &Arc<Self>, server: &MockServer) {
        let chain = Arc::clone(self);
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_blockNumber"})))
            .respond_with(move |req: &Request| {
                reply(req, json!(hex(chain.head.load(Ordering::SeqCst))))
            })
            .mount(server)
            .await;

        let chain = Arc::clone(self);
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_getBlockByNumber"})))
            .respond_with(move |req: &Request| {
                let body: Value = serde_json::from_slice(&req.body).unwrap();
                let tag = body["params"][0].as_str().unwrap();
                let number = u64::from_str_radix(tag.trim_start_matches("0x"), 16).unwrap();
                let result = if number <= chain.head.load(Ordering::SeqCst) {
                    block(number, chain.txs.get(&number).map_or(&[][..], Vec::as_slice))
                } else {
                    Value::Null
                };
                reply(req, result)
            })
            .mount(server)
            .await;
    }
}
