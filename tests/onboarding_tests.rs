//! Onboarding driven tick by tick against a scripted testnet node

use coldpair::config::{ConfigStore, MemoryBackend, RpcCache};
use coldpair::onboard::{Checkpoint, OnboardError, OnboardOptions, Onboarding, QuestionKind, RecordingReporter, Step, Tick};
use coldpair::rpc::mock::{MockNode, MockReply};
use coldpair::rpc::types::parse_btc;
use coldpair::rpc::{ConnectOptions, RetryPolicy};
use coldpair::runtime::Shutdown;
use bitcoin::Amount;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const NODE_URL: &str = "http://u:p@127.0.0.1:18332";
const WALLET_ID: &str = "coldcard-f0ccde95";
const TESTNET_EXPORT: &str = include_str!("fixtures/summary-testnet.txt");
const MAINNET_EXPORT: &str = include_str!("fixtures/summary-mainnet.txt");
/// base64 of `psbt\xff\x01\x00`
const PSBT: &str = "cHNidP8BAA==";

struct Harness {
    node: Arc<MockNode>,
    unspent: Arc<Mutex<Value>>,
    backend: Arc<MemoryBackend>,
    dir: TempDir,
}

fn parse(text: &str) -> Value {
    serde_json::from_str(text).unwrap()
}

impl Harness {
    /// A testnet node that reports itself unsynced for the first `unsynced_polls` calls
    fn new(unsynced_polls: usize) -> Self {
        let node = MockNode::new();

        let polls = AtomicUsize::new(0);
        node.on("getblockchaininfo", move |_| {
            let n = polls.fetch_add(1, Ordering::SeqCst);
            let progress = if n < unsynced_polls { 0.5 } else { 1.0 };
            MockReply::Result(json!({"chain": "test", "blocks": 200, "headers": 400, "verificationprogress": progress}))
        });
        node.on("getdescriptorinfo", |call| {
            MockReply::Result(json!({"descriptor": call.params[0], "checksum": "deadbeef", "isrange": true}))
        });
        node.respond("createwallet", json!({"name": WALLET_ID, "warning": ""}));
        node.reject("loadwallet", -35, "Wallet file verification failed. Wallet is already loaded.");
        node.respond("importmulti", json!([{"success": true}, {"success": true}]));
        node.respond(
            "scantxoutset",
            parse(r#"{"success": true, "txouts": 1000, "height": 200,
                      "unspents": [{"txid": "aa", "vout": 0, "scriptPubKey": "0014", "desc": "wpkh()", "amount": 0.5, "height": 120},
                                   {"txid": "cc", "vout": 1, "scriptPubKey": "0014", "desc": "wpkh()", "amount": 0.1, "height": 150}],
                      "total_amount": 0.6}"#),
        );
        node.respond("rescanblockchain", json!({"start_height": 120, "stop_height": 200}));

        let addresses = AtomicUsize::new(0);
        node.on("getnewaddress", move |_| {
            let n = addresses.fetch_add(1, Ordering::SeqCst);
            MockReply::Result(json!(if n == 0 { "tb1qtest" } else { "tb1qsend" }))
        });

        let unspent = Arc::new(Mutex::new(json!([])));
        let listed = Arc::clone(&unspent);
        node.on("listunspent", move |_| MockReply::Result(listed.lock().unwrap().clone()));

        node.respond("walletcreatefundedpsbt", parse(&format!(r#"{{"psbt": "{PSBT}", "fee": 0.0001, "changepos": -1}}"#)));
        let tx = parse(
            r#"{"txid": "bb", "vin": [{"txid": "aa", "vout": 0}],
                "vout": [{"value": 0.45, "n": 0, "scriptPubKey": {"address": "tb1qsend", "type": "witness_v0_keyhash"}}]}"#,
        );
        node.respond("decodepsbt", json!({
            "tx": tx.clone(),
            "inputs": [{"witness_utxo": {"amount": 0.5, "scriptPubKey": {"address": "tb1qtest"}}}],
        }));
        node.respond("decoderawtransaction", tx);
        node.respond("finalizepsbt", json!({"hex": "0200aa", "complete": true}));
        node.on("getaddressinfo", |call| MockReply::Result(json!({"address": call.params[0], "ismine": true})));
        node.respond("sendrawtransaction", json!("bb"));

        Self { node, unspent, backend: Arc::new(MemoryBackend::new()), dir: TempDir::new().unwrap() }
    }

    fn connect(&self) -> ConnectOptions {
        ConnectOptions::new().with_url(NODE_URL).with_retry(RetryPolicy::none())
    }

    fn options(&self) -> OnboardOptions {
        OnboardOptions::new(self.dir.path()).with_connect(self.connect())
    }

    fn store(&self) -> ConfigStore {
        ConfigStore::load_or_blank("config.json", self.backend.clone(), RpcCache::new(self.node.clone(), self.connect())).unwrap()
    }

    fn onboarding(&self, reporter: RecordingReporter) -> Onboarding<RecordingReporter> {
        Onboarding::new(self.store(), reporter, self.options())
    }

    fn write_export(&self, content: &str) {
        std::fs::write(self.dir.path().join("public.txt"), content).unwrap();
    }

    fn set_unspent(&self, text: &str) {
        *self.unspent.lock().unwrap() = parse(text);
    }

    fn count(&self, method: &str) -> usize {
        self.node.calls_to(method).len()
    }
}

fn agreeable() -> RecordingReporter {
    RecordingReporter::new()
        .answer(QuestionKind::DeviceReady, true)
        .answer(QuestionKind::RunRoundTrip, true)
        .answer(QuestionKind::Broadcast, true)
}

fn waiting(tick: Tick) -> (Step, String, Duration) {
    match tick {
        Tick::Waiting { step, reason, retry_after } => (step, reason, retry_after),
        Tick::Complete => panic!("expected a wait, onboarding completed"),
    }
}

#[tokio::test]
async fn test_full_round_trip() {
    let h = Harness::new(3);
    let mut onboarding = h.onboarding(agreeable());

    // Sync waits escalate
    let (step, _, delay) = waiting(onboarding.tick().await.unwrap());
    assert_eq!((step, delay), (Step::WaitSync, Duration::from_secs(1)));
    let (step, reason, delay) = waiting(onboarding.tick().await.unwrap());
    assert_eq!((step, delay), (Step::WaitSync, Duration::from_secs(2)));
    assert!(reason.contains("50.00%"), "{reason}");

    let (step, reason, _) = waiting(onboarding.tick().await.unwrap());
    assert_eq!(step, Step::AcquireExport);
    assert!(reason.contains("public.txt"), "{reason}");

    h.write_export(TESTNET_EXPORT);
    let (step, reason, _) = waiting(onboarding.tick().await.unwrap());
    assert_eq!(step, Step::AwaitDeposit);
    assert!(reason.contains("tb1qtest"), "{reason}");

    let create = &h.node.calls_to("createwallet")[0];
    assert_eq!(create.params, vec![json!(WALLET_ID), json!(true)]);

    let imports = h.node.calls_to("importmulti");
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].wallet(), Some(WALLET_ID));
    let requests = imports[0].params[0].as_array().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["internal"], json!(false));
    assert_eq!(requests[1]["internal"], json!(true));
    assert_eq!(requests[0]["range"], json!([0, 3000]));
    assert!(requests[0]["desc"].as_str().unwrap().ends_with("/0/*)#deadbeef"));

    let scan = &h.node.calls_to("scantxoutset")[0];
    assert_eq!(scan.params[0], json!("start"));
    assert_eq!(scan.wallet(), None);

    let rescan = &h.node.calls_to("rescanblockchain")[0];
    assert_eq!(rescan.params, vec![json!(120)]);
    assert_eq!(rescan.wallet(), Some(WALLET_ID));

    // Saved config carries the scan's earliest height
    let saved = h.store();
    let wallet = saved.wallet(WALLET_ID).expect("wallet persisted");
    assert_eq!(wallet.earliest_block(), Some(120));
    assert_eq!(wallet.derivation_path(), "/84h/1h/0h");
    assert_eq!(saved.settings().default_wallet.as_deref(), Some(WALLET_ID));
    // The wallet keeps the node it was onboarded against
    assert_eq!(wallet.node_url(), Some(NODE_URL));
    assert_eq!(saved.settings().node_url.as_deref(), Some(NODE_URL));

    h.set_unspent(r#"[{"txid": "aa", "vout": 0, "address": "tb1qtest", "amount": 0.5, "confirmations": 1}]"#);
    let (step, reason, _) = waiting(onboarding.tick().await.unwrap());
    assert_eq!(step, Step::AwaitSignature);
    assert!(reason.contains("-signed.psbt"), "{reason}");

    let funded = &h.node.calls_to("walletcreatefundedpsbt")[0];
    assert_eq!(funded.params[0], json!([{"txid": "aa", "vout": 0}]));
    let sent = funded.params[1][0]["tb1qsend"].as_str().unwrap();
    assert_eq!(parse_btc(sent).unwrap(), Amount::from_sat(45_000_000));

    let unsigned = onboarding.checkpoint().unsigned_psbt.clone().unwrap();
    assert_eq!(std::fs::read(&unsigned).unwrap(), b"psbt\xff\x01\x00");

    let signed = unsigned.with_file_name(format!("{}-signed.psbt", unsigned.file_stem().unwrap().to_str().unwrap()));
    std::fs::write(&signed, PSBT).unwrap();
    let (step, _, _) = waiting(onboarding.tick().await.unwrap());
    assert_eq!(step, Step::AwaitConfirmation);
    assert_eq!(h.node.calls_to("sendrawtransaction")[0].params, vec![json!("0200aa")]);
    assert!(onboarding.reporter().asked.contains(&QuestionKind::Broadcast));

    h.set_unspent(r#"[{"txid": "bb", "vout": 0, "address": "tb1qsend", "amount": 0.45, "confirmations": 1}]"#);
    assert_eq!(onboarding.tick().await.unwrap(), Tick::Complete);
    assert!(onboarding.checkpoint().confirmed);
    assert!(!onboarding.checkpoint().round_trip_skipped());

    // Nothing left to do: no further node traffic
    let calls = h.node.calls().len();
    assert_eq!(onboarding.tick().await.unwrap(), Tick::Complete);
    assert_eq!(h.node.calls().len(), calls);
}

#[tokio::test]
async fn test_resume_skips_completed_steps() {
    let h = Harness::new(0);
    h.write_export(TESTNET_EXPORT);

    let mut first = h.onboarding(agreeable());
    let (step, _, _) = waiting(first.tick().await.unwrap());
    assert_eq!(step, Step::AwaitDeposit);
    let checkpoint: Checkpoint = first.checkpoint().clone();
    drop(first);

    let descriptor_calls = h.count("getdescriptorinfo");
    let mut second = h.onboarding(agreeable()).with_checkpoint(checkpoint);
    let (step, reason, _) = waiting(second.tick().await.unwrap());
    assert_eq!(step, Step::AwaitDeposit);
    assert!(reason.contains("tb1qtest"));

    for method in ["createwallet", "importmulti", "scantxoutset", "rescanblockchain", "getnewaddress"] {
        assert_eq!(h.count(method), 1, "{method} re-issued");
    }
    assert_eq!(h.count("getdescriptorinfo"), descriptor_calls);
    assert!(!second.reporter().asked.contains(&QuestionKind::DeviceReady));
    assert_eq!(second.wallet().map(|w| w.id()), Some(WALLET_ID.to_string()));
}

#[tokio::test]
async fn test_declined_round_trip_completes() {
    let h = Harness::new(0);
    h.write_export(TESTNET_EXPORT);
    let reporter = RecordingReporter::new().answer(QuestionKind::DeviceReady, true).answer(QuestionKind::RunRoundTrip, false);
    let mut onboarding = h.onboarding(reporter);

    assert_eq!(onboarding.tick().await.unwrap(), Tick::Complete);
    assert!(onboarding.checkpoint().round_trip_skipped());
    assert_eq!(h.count("getnewaddress"), 0);
    assert!(onboarding.reporter().completed().contains(&Step::Rescan));
}

#[tokio::test]
async fn test_unanswered_gate_waits() {
    let h = Harness::new(0);
    let mut onboarding = h.onboarding(RecordingReporter::new());

    let (step, _, delay) = waiting(onboarding.tick().await.unwrap());
    assert_eq!((step, delay), (Step::ConfirmDevice, Duration::from_secs(1)));
    assert_eq!(onboarding.reporter().asked, vec![QuestionKind::DeviceReady]);

    onboarding.reporter_mut().set_answer(QuestionKind::DeviceReady, Some(true));
    let (step, _, _) = waiting(onboarding.tick().await.unwrap());
    assert_eq!(step, Step::AcquireExport);
}

#[tokio::test]
async fn test_unparseable_export_is_retried() {
    let h = Harness::new(0);
    h.write_export("not a summary file");
    let mut onboarding = h.onboarding(agreeable());

    let (step, reason, _) = waiting(onboarding.tick().await.unwrap());
    assert_eq!(step, Step::AcquireExport);
    assert!(reason.contains("cannot use"), "{reason}");

    h.write_export(TESTNET_EXPORT);
    let (step, _, _) = waiting(onboarding.tick().await.unwrap());
    assert_eq!(step, Step::AwaitDeposit);
}

#[tokio::test]
async fn test_mainnet_export_on_testnet_node_fails() {
    let h = Harness::new(0);
    h.write_export(MAINNET_EXPORT);
    let mut onboarding = h.onboarding(agreeable());

    let err = onboarding.tick().await.unwrap_err();
    assert!(matches!(err, OnboardError::NetworkMismatch(_)), "{err}");
    assert!(h.backend.get("config.json").is_none());
}

#[tokio::test]
async fn test_unexpected_wallet_error_is_fatal() {
    let h = Harness::new(0);
    h.write_export(TESTNET_EXPORT);
    h.node.reject("createwallet", -4, "Wallet file verification failed: permission denied");
    let mut onboarding = h.onboarding(agreeable());

    let err = onboarding.tick().await.unwrap_err();
    assert!(matches!(err, OnboardError::Rpc { step: Step::CreateNodeWallet, .. }), "{err}");
    assert!(onboarding.checkpoint().config_saved);
    assert!(!onboarding.checkpoint().node_wallet_created);
}

#[tokio::test]
async fn test_existing_wallet_is_reused() {
    let h = Harness::new(0);
    h.write_export(TESTNET_EXPORT);
    h.node.reject("createwallet", -4, "Wallet file verification failed. Failed to create database path '/x'. Database already exists.");
    let mut onboarding = h.onboarding(agreeable());

    let (step, _, _) = waiting(onboarding.tick().await.unwrap());
    assert_eq!(step, Step::AwaitDeposit);
    assert!(onboarding.checkpoint().node_wallet_created);
}

#[tokio::test]
async fn test_failed_import_is_not_marked_done() {
    let h = Harness::new(0);
    h.write_export(TESTNET_EXPORT);
    h.node.respond("importmulti", json!([{"success": true}, {"success": false, "error": {"code": -5, "message": "bad key"}}]));
    let mut onboarding = h.onboarding(agreeable());

    match onboarding.tick().await.unwrap_err() {
        OnboardError::ImportFailed(message) => assert!(message.contains("bad key")),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!onboarding.checkpoint().descriptors_imported);
    assert_eq!(h.count("scantxoutset"), 0);
}

#[tokio::test]
async fn test_empty_scan_skips_rescan() {
    let h = Harness::new(0);
    h.write_export(TESTNET_EXPORT);
    h.node.respond("scantxoutset", json!({"success": true, "unspents": [], "total_amount": 0}));
    let reporter = RecordingReporter::new().answer(QuestionKind::DeviceReady, true).answer(QuestionKind::RunRoundTrip, false);
    let mut onboarding = h.onboarding(reporter);

    assert_eq!(onboarding.tick().await.unwrap(), Tick::Complete);
    assert_eq!(h.count("rescanblockchain"), 0);
    assert_eq!(h.store().wallet(WALLET_ID).unwrap().earliest_block(), None);
}

#[tokio::test]
async fn test_run_saves_checkpoint_and_honours_shutdown() {
    let h = Harness::new(5);
    let checkpoint_file = h.dir.path().join(".coldpair-onboarding.json");
    let options = h.options().with_checkpoint_file(&checkpoint_file);
    let mut onboarding = Onboarding::new(h.store(), agreeable(), options);

    let shutdown = Shutdown::new();
    shutdown.trigger().await;
    assert!(!onboarding.run(&shutdown).await.unwrap());

    let saved = Checkpoint::load(&checkpoint_file).unwrap().expect("checkpoint written");
    assert!(saved.device_confirmed);
    assert!(!saved.synced);
    assert_eq!(saved.network, Some(coldpair::Network::Testnet));
}
