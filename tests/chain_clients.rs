//! HTTP client tests against in-process JSON-RPC and TronGrid stubs

mod common;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{config_with, MNEMONIC, TRON_HOT_WALLET};
use depositd::chain::{ChainClient, ChainError, TransferScope, TxStatus};
use depositd::{EvmClient, KeyDerivationService, Network, TronClient};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const EVM_DEPOSIT: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
const EVM_DEPOSIT_WORD: &str = "0x0000000000000000000000005aaeb6053f3e94c9b9a09f33669435e7ef1beaed";
const SENDER_WORD: &str = "0x0000000000000000000000001111111111111111111111111111111111111111";

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn block_param(value: &Value) -> u64 {
    u64::from_str_radix(value.as_str().unwrap().trim_start_matches("0x"), 16).unwrap()
}

#[derive(Default)]
struct EvmStub {
    log_calls: AtomicUsize,
}

async fn evm_rpc(State(stub): State<Arc<EvmStub>>, Json(req): Json<Value>) -> Json<Value> {
    let id = req["id"].clone();
    let params = &req["params"];

    let result = match req["method"].as_str().unwrap_or_default() {
        "eth_blockNumber" => json!("0x64"),
        "eth_getLogs" => {
            stub.log_calls.fetch_add(1, Ordering::SeqCst);
            let filter = &params[0];
            let watched = filter["topics"][2]
                .as_array()
                .is_some_and(|words| words.iter().any(|w| w == EVM_DEPOSIT_WORD));
            let from = block_param(&filter["fromBlock"]);
            let to = block_param(&filter["toBlock"]);

            if watched && from <= 12 && 12 <= to {
                json!([{
                    "transactionHash": "0xAAA",
                    "blockNumber": "0xc",
                    "topics": [filter["topics"][0], SENDER_WORD, EVM_DEPOSIT_WORD],
                    "data": format!("0x{:064x}", 120_500_000u128),
                    "removed": false,
                }])
            } else {
                json!([])
            }
        }
        "eth_getTransactionReceipt" => match params[0].as_str() {
            Some("0xpending") => Value::Null,
            Some("0xreverted") => json!({ "blockNumber": "0x10", "status": "0x0" }),
            _ => json!({ "blockNumber": "0xc", "status": "0x1" }),
        },
        "eth_call" if params[0]["data"].as_str().is_some_and(|d| d.starts_with("0x70a08231")) => {
            json!(format!("0x{:064x}", 60_000_000u128))
        }
        _ => {
            return Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": "method not found" },
            }))
        }
    };

    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

async fn evm_client(max_block_range: &str) -> (EvmClient, Arc<EvmStub>) {
    let stub = Arc::new(EvmStub::default());
    let url = serve(Router::new().route("/", post(evm_rpc)).with_state(stub.clone())).await;
    let config = config_with(&[
        ("DEPOSITD_ETH_RPC", url.as_str()),
        ("DEPOSITD_EVM_MAX_BLOCK_RANGE", max_block_range),
    ]);
    let client = EvmClient::new(
        reqwest::Client::new(),
        config.network(Network::Eth).unwrap(),
        &config.upstream,
    )
    .unwrap();
    (client, stub)
}

#[tokio::test]
async fn test_evm_head_and_balance() {
    let (client, _) = evm_client("2000").await;

    assert_eq!(client.head().await.unwrap(), 100);
    assert_eq!(client.balance_of(EVM_DEPOSIT).await.unwrap(), 60_000_000);
}

#[tokio::test]
async fn test_evm_range_scan_is_windowed() {
    let (client, stub) = evm_client("10").await;

    let transfers = client
        .query_transfers(&TransferScope::Range {
            addresses: vec![EVM_DEPOSIT.to_string()],
            from_block: 1,
            to_block: 25,
        })
        .await
        .unwrap();

    // 1..=10, 11..=20, 21..=25
    assert_eq!(stub.log_calls.load(Ordering::SeqCst), 3);
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].tx_hash, "0xaaa");
    assert_eq!(transfers[0].to, EVM_DEPOSIT);
    assert_eq!(transfers[0].amount, 120_500_000);
    assert_eq!(transfers[0].block_height, Some(12));
}

#[tokio::test]
async fn test_evm_receipt_states() {
    let (client, _) = evm_client("2000").await;

    assert_eq!(client.tx_status("0xpending").await.unwrap(), TxStatus::NotFound);
    assert_eq!(
        client.tx_status("0xreverted").await.unwrap(),
        TxStatus::Failed { block_height: 16 }
    );
    assert_eq!(
        client.tx_status("0xaaa").await.unwrap(),
        TxStatus::Included { block_height: 12 }
    );
}

#[tokio::test]
async fn test_evm_rpc_error_surfaces() {
    let (client, _) = evm_client("2000").await;

    let err = client.native_balance(EVM_DEPOSIT).await.unwrap_err();
    assert!(matches!(err, ChainError::Rpc(_)));
    assert!(err.to_string().contains("method not found"));
}

fn tron_deposit_address() -> String {
    KeyDerivationService::from_mnemonic(MNEMONIC, "")
        .unwrap()
        .derive_address(Network::Tron, 0)
        .unwrap()
        .address
}

async fn trc20_history(
    Path(address): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    if query.get("only_to").map(String::as_str) != Some("true") {
        return Json(json!({ "data": [] }));
    }
    Json(json!({
        "data": [
            {
                "transaction_id": "ABC123",
                "from": TRON_HOT_WALLET,
                "to": address,
                "value": "120500000",
                "token_info": { "address": TRON_HOT_WALLET },
            },
            {
                "transaction_id": "OTHERTOKEN",
                "from": TRON_HOT_WALLET,
                "to": address,
                "value": "1000000",
                "token_info": { "address": "TOtherToken" },
            },
            {
                "transaction_id": "BADVALUE",
                "from": TRON_HOT_WALLET,
                "to": address,
                "value": "lots",
            },
        ]
    }))
}

async fn tron_tx_info(Json(req): Json<Value>) -> Json<Value> {
    Json(match req["value"].as_str() {
        Some("unknown") => json!({}),
        Some("reverted") => json!({ "blockNumber": 4_990, "receipt": { "result": "REVERT" } }),
        _ => json!({ "blockNumber": 4_990, "receipt": { "result": "SUCCESS" } }),
    })
}

async fn tron_client() -> TronClient {
    let router = Router::new()
        .route(
            "/wallet/getnowblock",
            post(|| async { Json(json!({ "block_header": { "raw_data": { "number": 5_000 } } })) }),
        )
        .route("/v1/accounts/:address/transactions/trc20", get(trc20_history))
        .route("/wallet/gettransactioninfobyid", post(tron_tx_info))
        .route(
            "/wallet/triggerconstantcontract",
            post(|| async { Json(json!({ "constant_result": [format!("{:064x}", 25_000_000u128)] })) }),
        )
        .route(
            "/wallet/getchainparameters",
            post(|| async {
                Json(json!({
                    "chainParameter": [
                        { "key": "getMaintenanceTimeInterval", "value": 21_600_000 },
                        { "key": "getEnergyFee", "value": 420 },
                    ]
                }))
            }),
        );

    let url = serve(router).await;
    let config = config_with(&[("DEPOSITD_TRON_RPC", url.as_str())]);
    TronClient::new(
        reqwest::Client::new(),
        config.network(Network::Tron).unwrap(),
        &config.upstream,
    )
    .unwrap()
}

#[tokio::test]
async fn test_tron_head_fee_and_balance() {
    let client = tron_client().await;

    assert_eq!(client.head().await.unwrap(), 5_000);
    assert_eq!(client.fee_price().await.unwrap(), 420);
    assert_eq!(client.balance_of(TRON_HOT_WALLET).await.unwrap(), 25_000_000);
}

#[tokio::test]
async fn test_tron_history_keeps_only_watched_token() {
    let client = tron_client().await;
    let address = tron_deposit_address();

    let transfers = client
        .query_transfers(&TransferScope::History {
            address: address.clone(),
            limit: 50,
        })
        .await
        .unwrap();

    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].tx_hash, "abc123");
    assert_eq!(transfers[0].to, address);
    assert_eq!(transfers[0].amount, 120_500_000);
    assert_eq!(transfers[0].block_height, None);
}

#[tokio::test]
async fn test_tron_transaction_info_states() {
    let client = tron_client().await;

    assert_eq!(client.tx_status("unknown").await.unwrap(), TxStatus::NotFound);
    assert_eq!(
        client.tx_status("reverted").await.unwrap(),
        TxStatus::Failed { block_height: 4_990 }
    );
    assert_eq!(
        client.tx_status("abc123").await.unwrap(),
        TxStatus::Included { block_height: 4_990 }
    );
}

#[tokio::test]
async fn test_tron_rejects_block_range_scope() {
    let client = tron_client().await;

    let err = client
        .query_transfers(&TransferScope::Range {
            addresses: vec![tron_deposit_address()],
            from_block: 1,
            to_block: 2,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::Unsupported(_)));
}
