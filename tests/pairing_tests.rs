//! Device export to node import, and the send path, against a mock node

use coldpair::config::{ConfigStore, MemoryBackend, RpcCache};
use coldpair::rpc::mock::{MockNode, MockReply};
use coldpair::rpc::{ConnectOptions, RetryPolicy, RpcClient};
use coldpair::wallet::export::{self, ExportError};
use coldpair::wallet::send::{self, SendError, SignedFile};
use coldpair::wallet::{Keychain, Wallet};
use coldpair::Network;
use bitcoin::Amount;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

const MAINNET_EXPORT: &str = include_str!("fixtures/summary-mainnet.txt");
const TESTNET_EXPORT: &str = include_str!("fixtures/summary-testnet.txt");

fn client(node: &Arc<MockNode>, url: &str) -> RpcClient {
    let opts = ConnectOptions::new().with_url(url).with_retry(RetryPolicy::none());
    RpcClient::connect(&opts, node.clone()).unwrap()
}

fn checksum_node() -> Arc<MockNode> {
    let node = MockNode::new();
    node.on("getdescriptorinfo", |call| MockReply::Result(json!({"descriptor": call.params[0], "checksum": "deadbeef"})));
    node
}

#[tokio::test]
async fn test_mainnet_export_to_import_arguments() {
    let node = checksum_node();
    let rpc = client(&node, "http://u:p@127.0.0.1:8332");

    let wallet = export::wallet_from_export(MAINNET_EXPORT, &rpc).await.unwrap();
    assert_eq!(wallet.id(), "coldcard-3d88d0cf");

    let pair = wallet.descriptors().expect("descriptors attached");
    assert_eq!(pair.receive().checksum(), "deadbeef");
    assert_eq!(pair.change().checksum(), "deadbeef");
    assert!(pair.receive().base().starts_with("wpkh([3d88d0cf/84h/0h]xpub"));

    let requests = wallet.import_arguments().unwrap();
    assert_eq!(requests.len(), 2);
    assert!(!requests[0].internal);
    assert!(requests[1].internal);
    assert!(requests.iter().all(|r| r.range == [0, 3000] && r.watchonly && r.keypool && r.timestamp == "now"));

    // Checksums were asked for exactly the two bases
    let asked: Vec<Value> = node.calls_to("getdescriptorinfo").into_iter().map(|c| c.params[0].clone()).collect();
    assert_eq!(asked, vec![json!(wallet.descriptor_base(Keychain::Receive)), json!(wallet.descriptor_base(Keychain::Change))]);
}

#[tokio::test]
async fn test_testnet_descriptors_differ_only_in_change() {
    let node = checksum_node();
    let rpc = client(&node, "http://u:p@127.0.0.1:18332");
    let wallet = export::wallet_from_export(TESTNET_EXPORT, &rpc).await.unwrap();

    assert_eq!(wallet.derivation_path(), "/84h/1h/0h");
    let receive = wallet.descriptor_base(Keychain::Receive);
    let change = wallet.descriptor_base(Keychain::Change);
    assert!(receive.starts_with("wpkh([f0ccde95/84h/1h/0h]tpub"));
    assert_eq!(receive.replace("/0/*)", "/1/*)"), change);
}

#[tokio::test]
async fn test_checksum_failure_propagates() {
    let node = MockNode::new();
    node.reject("getdescriptorinfo", -5, "Invalid descriptor");
    let rpc = client(&node, "http://u:p@127.0.0.1:8332");

    match export::wallet_from_export(MAINNET_EXPORT, &rpc).await {
        Err(ExportError::Rpc(err)) => assert!(err.is_code(-5)),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn test_export_network_must_match_node() {
    let summary = export::parse(MAINNET_EXPORT).unwrap();
    assert!(summary.check_network(Network::Bitcoin).is_ok());
    assert!(matches!(summary.check_network(Network::Testnet), Err(ExportError::NetworkMismatch { .. })));

    let summary = export::parse(TESTNET_EXPORT).unwrap();
    assert!(summary.check_network(Network::Regtest).is_ok());
    assert!(summary.check_network(Network::Bitcoin).is_err());
}

#[tokio::test]
async fn test_wallet_survives_config_round_trip() {
    let node = checksum_node();
    let rpc = client(&node, "http://u:p@127.0.0.1:8332");
    let wallet = export::wallet_from_export(MAINNET_EXPORT, &rpc).await.unwrap().with_earliest_block(Some(812_000));

    let backend = Arc::new(MemoryBackend::new());
    let cache = || RpcCache::new(node.clone(), ConnectOptions::new().with_url("http://u:p@127.0.0.1:8332"));
    let mut store = ConfigStore::blank("cfg", backend.clone(), cache());
    store.add_wallet(wallet.clone());
    store.save().unwrap();

    let reloaded = ConfigStore::load("cfg", backend, cache()).unwrap();
    let restored: &Wallet = reloaded.wallet("coldcard-3d88d0cf").unwrap();
    assert_eq!(restored.earliest_block(), Some(812_000));
    assert_eq!(restored.import_arguments().unwrap(), wallet.import_arguments().unwrap());
}

#[tokio::test]
async fn test_coin_controlled_send() {
    let node = MockNode::new();
    node.respond(
        "listunspent",
        serde_json::from_str(
            r#"[{"txid": "aa", "vout": 0, "address": "bc1qone", "amount": 0.2, "confirmations": 3},
                {"txid": "bb", "vout": 1, "address": "bc1qtwo", "amount": 0.3, "confirmations": 1}]"#,
        )
        .unwrap(),
    );
    node.respond("walletcreatefundedpsbt", serde_json::from_str(r#"{"psbt": "cHNidP8BAA==", "fee": 0.0002, "changepos": 1}"#).unwrap());
    node.respond("decodepsbt", json!({"tx": {"txid": "cc", "vin": [], "vout": [
        {"value": 0.1, "n": 0, "scriptPubKey": {"address": "bc1qdest"}},
        {"value": 0.0998, "n": 1, "scriptPubKey": {"address": "bc1qchange"}}
    ]}, "inputs": [{}]}));

    let rpc = client(&node, "http://u:p@127.0.0.1:8332").for_wallet("coldcard-3d88d0cf");
    let dir = TempDir::new().unwrap();
    let from = vec!["bc1qtwo".to_string(), "bc1qunknown".to_string()];
    let prepared = send::prepare_send(&rpc, "bc1qdest", Amount::from_sat(10_000_000), &from, dir.path()).await.unwrap();

    assert_eq!(prepared.fee, Amount::from_sat(20_000));
    assert_eq!(prepared.outputs, 2);
    assert!((prepared.fee_percent(Amount::from_sat(10_000_000)) - 0.2).abs() < 1e-9);
    assert!(prepared.path.starts_with(dir.path()));
    assert!(prepared.path.file_name().unwrap().to_str().unwrap().starts_with("unsigned-"));

    let funded = &node.calls_to("walletcreatefundedpsbt")[0];
    assert_eq!(funded.params[0], json!([{"txid": "bb", "vout": 1}]));
    assert_eq!(funded.params[3], json!({"includeWatching": true}));
}

#[tokio::test]
async fn test_invalid_destination_is_user_error() {
    let node = MockNode::new();
    node.reject("walletcreatefundedpsbt", -5, "Invalid Bitcoin address: nope");
    let rpc = client(&node, "http://u:p@127.0.0.1:8332");
    let dir = TempDir::new().unwrap();

    let err = send::prepare_psbt(&rpc, &[], "nope", Amount::from_sat(1000), dir.path()).await.unwrap_err();
    assert!(matches!(err, SendError::InvalidAddress(_)), "{err}");
}

#[tokio::test]
async fn test_signed_file_formats() {
    let node = MockNode::new();
    node.respond("finalizepsbt", json!({"hex": "02000000", "complete": true}));
    node.respond("decoderawtransaction", json!({"txid": "dd", "vin": [], "vout": []}));
    let rpc = client(&node, "http://u:p@127.0.0.1:8332");

    let binary = b"psbt\xff\x01\x00".to_vec();
    assert_eq!(send::signed_file_to_tx_hex(&rpc, &binary).await.unwrap(), "02000000");
    assert_eq!(send::signed_file_to_tx_hex(&rpc, b"cHNidP8BAA==\n").await.unwrap(), "02000000");
    assert_eq!(send::signed_file_to_tx_hex(&rpc, b"0200000001ab").await.unwrap(), "0200000001ab");
    assert!(matches!(SignedFile::read(b"hello"), Err(SendError::UnrecognizedFormat)));

    node.respond("finalizepsbt", json!({"psbt": "cHNidP8BAA==", "complete": false}));
    assert!(matches!(send::signed_file_to_tx_hex(&rpc, &binary).await, Err(SendError::Incomplete)));
}
