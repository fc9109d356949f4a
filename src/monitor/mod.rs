//! Monitor - background pollers for the wallet and the chain tip
//!
//! ```text
//!   ┌──────────────┐  listunspent   ┌──────────────────────┐
//!   │ utxo poller  │ ─────────────► │ Mutex<UtxoSet>       │ replaced wholesale
//!   └──────────────┘                └──────────────────────┘
//!   ┌──────────────┐  bestblockhash ┌──────────────────────┐
//!   │ block poller │ ─────────────► │ Mutex<Vec<Block>>    │ append-only
//!   └──────────────┘  + blockstats  └──────────────────────┘
//! ```
//!
//! The pollers only record. Consumers snapshot twice and call
//! [`UtxoSet::diff`] to find what changed. The two snapshots may come from
//! different instants; nothing orders the pollers against each other.

mod utxos;

pub use utxos::{UtxoEvent, UtxoSet};

use crate::rpc::types::BlockStats;
use crate::rpc::RpcClient;
use crate::runtime::Shutdown;
use bitcoin::Amount;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub interval: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self { Self { interval: Duration::from_secs(1) } }
}

impl MonitorOptions {
    pub fn with_interval(mut self, interval: Duration) -> Self { self.interval = interval; self }
}

/// A new chain tip, as first observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub hash: String,
    pub height: u64,
    pub observed_at: DateTime<Utc>,
    /// sat/vB; absent for empty blocks
    pub median_fee_rate: Option<u64>,
    pub subsidy: Amount,
    pub txs: u64,
}

impl Block {
    pub fn from_stats(hash: String, stats: &BlockStats, observed_at: DateTime<Utc>) -> Self {
        Self {
            hash,
            height: stats.height,
            observed_at,
            median_fee_rate: stats.median_fee_rate(),
            subsidy: Amount::from_sat(stats.subsidy),
            txs: stats.txs,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    utxos: Mutex<UtxoSet>,
    blocks: Mutex<Vec<Block>>,
}

/// Running pollers. Dropping without [`Monitor::stop`] leaves them running
/// until the shutdown signal fires.
#[derive(Debug)]
pub struct Monitor {
    shared: Arc<Shared>,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl Monitor {
    pub fn start(wallet_rpc: Arc<RpcClient>, node_rpc: Arc<RpcClient>, options: MonitorOptions) -> Self {
        Self::start_with_shutdown(wallet_rpc, node_rpc, options, Shutdown::new())
    }

    /// Start under an existing signal, e.g. the one wired to Ctrl-C
    pub fn start_with_shutdown(
        wallet_rpc: Arc<RpcClient>,
        node_rpc: Arc<RpcClient>,
        options: MonitorOptions,
        shutdown: Shutdown,
    ) -> Self {
        let shared = Arc::new(Shared::default());
        info!(wallet = ?wallet_rpc.wallet(), interval = ?options.interval, "starting monitor");
        let tasks = vec![
            spawn_utxo_poller(wallet_rpc, Arc::clone(&shared), options.interval, shutdown.clone()),
            spawn_block_poller(node_rpc, Arc::clone(&shared), options.interval, shutdown.clone()),
        ];
        Self { shared, shutdown, tasks }
    }

    pub fn utxos(&self) -> UtxoSet {
        self.shared.utxos.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.shared.blocks.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn latest_block(&self) -> Option<Block> {
        self.shared.blocks.lock().unwrap_or_else(PoisonError::into_inner).last().cloned()
    }

    pub fn shutdown(&self) -> &Shutdown { &self.shutdown }

    /// Signal both pollers and wait for them to exit
    pub async fn stop(self) {
        self.shutdown.trigger().await;
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "poller task failed");
            }
        }
        info!("monitor stopped");
    }
}

fn spawn_utxo_poller(rpc: Arc<RpcClient>, shared: Arc<Shared>, interval: Duration, shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = rpc.list_unspent(0) => match result {
                    Ok(entries) => {
                        let set = UtxoSet::from_entries(entries);
                        *shared.utxos.lock().unwrap_or_else(PoisonError::into_inner) = set;
                    }
                    Err(err) => warn!(error = %err, "utxo poll failed"),
                },
            }
            if !shutdown.sleep(interval).await {
                break;
            }
        }
        debug!("utxo poller exited");
    })
}

fn spawn_block_poller(rpc: Arc<RpcClient>, shared: Arc<Shared>, interval: Duration, shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_hash: Option<String> = None;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = poll_tip(&rpc, last_hash.as_deref()) => match result {
                    Ok(Some(block)) => {
                        debug!(height = block.height, hash = %block.hash, "new block");
                        last_hash = Some(block.hash.clone());
                        shared.blocks.lock().unwrap_or_else(PoisonError::into_inner).push(block);
                    }
                    Ok(None) => {}
                    Err(err) => warn!(error = %err, "block poll failed"),
                },
            }
            if !shutdown.sleep(interval).await {
                break;
            }
        }
        debug!("block poller exited");
    })
}

/// `Some` only when the tip moved past `last_hash`
async fn poll_tip(rpc: &RpcClient, last_hash: Option<&str>) -> Result<Option<Block>, crate::rpc::RpcError> {
    let hash = rpc.get_best_block_hash().await?;
    if last_hash == Some(hash.as_str()) {
        return Ok(None);
    }
    let stats = rpc.get_block_stats(&hash).await?;
    Ok(Some(Block::from_stats(hash, &stats, Utc::now())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::{MockNode, MockReply};
    use crate::rpc::RetryPolicy;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn clients(node: &Arc<MockNode>) -> (Arc<RpcClient>, Arc<RpcClient>) {
        let opts = crate::rpc::ConnectOptions::new()
            .with_url("http://u:p@127.0.0.1:18443")
            .with_retry(RetryPolicy::none());
        let rpc = RpcClient::connect(&opts, node.clone()).unwrap();
        (Arc::new(rpc.for_wallet("w")), Arc::new(rpc))
    }

    async fn wait_for(mut ready: impl FnMut() -> bool) {
        for _ in 0..200 {
            if ready() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_pollers_record_state() {
        let node = MockNode::new();
        let unspent: Value = serde_json::from_str(
            r#"[{"txid":"t1","vout":0,"address":"A","amount":0.00010000,"confirmations":0}]"#,
        )
        .unwrap();
        node.respond("listunspent", unspent);

        let tips = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&tips);
        node.on("getbestblockhash", move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            MockReply::Result(json!(if n < 2 { "h1" } else { "h2" }))
        });
        node.on("getblockstats", |call| {
            let hash = call.params[0].as_str().unwrap_or_default().to_string();
            let height = if hash == "h1" { 100 } else { 101 };
            MockReply::Result(json!({
                "height": height, "blockhash": hash, "subsidy": 312500000u64, "txs": 3,
                "feerate_percentiles": [1, 2, 5, 8, 12]
            }))
        });

        let (wallet, chain) = clients(&node);
        let monitor = Monitor::start(wallet, chain, MonitorOptions::default().with_interval(Duration::from_millis(5)));

        wait_for(|| monitor.blocks().len() >= 2 && !monitor.utxos().is_empty()).await;
        let blocks = monitor.blocks();
        assert_eq!(blocks[0].height, 100);
        assert_eq!(blocks[1].height, 101);
        assert_eq!(blocks[0].median_fee_rate, Some(5));
        assert_eq!(blocks[0].subsidy, Amount::from_sat(312_500_000));
        assert_eq!(monitor.utxos().balance(), Amount::from_sat(10_000));

        monitor.stop().await;
        // Repeated tips were not re-fetched
        assert_eq!(node.calls_to("getblockstats").len(), 2);
        assert!(node.calls_to("listunspent").iter().all(|c| c.wallet() == Some("w")));
    }

    #[tokio::test]
    async fn test_poisoned_state_keeps_updating() {
        let node = MockNode::new();
        node.respond("listunspent", json!([]));
        node.respond("getbestblockhash", json!("h1"));
        node.respond("getblockstats", json!({"height": 7, "subsidy": 0, "txs": 1}));

        let (wallet, chain) = clients(&node);
        let monitor = Monitor::start(wallet, chain, MonitorOptions::default().with_interval(Duration::from_millis(5)));
        let shared = Arc::clone(&monitor.shared);
        let _ = std::thread::spawn(move || {
            let _utxos = shared.utxos.lock().unwrap();
            let _blocks = shared.blocks.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(monitor.shared.utxos.is_poisoned());

        node.respond(
            "listunspent",
            serde_json::from_str(r#"[{"txid":"t1","vout":0,"address":"A","amount":0.0001,"confirmations":1}]"#).unwrap(),
        );
        wait_for(|| !monitor.utxos().is_empty() && monitor.latest_block().is_some()).await;
        assert_eq!(monitor.utxos().balance(), Amount::from_sat(10_000));
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_poll_errors_keep_running() {
        let node = MockNode::new();
        node.reject("listunspent", -18, "Requested wallet does not exist or is not loaded");
        node.respond("getbestblockhash", json!("h1"));
        node.respond("getblockstats", json!({"height": 7, "subsidy": 0, "txs": 1}));

        let (wallet, chain) = clients(&node);
        let monitor = Monitor::start(wallet, chain, MonitorOptions::default().with_interval(Duration::from_millis(5)));
        wait_for(|| node.calls_to("listunspent").len() >= 3 && monitor.latest_block().is_some()).await;

        assert!(monitor.utxos().is_empty());
        assert_eq!(monitor.latest_block().map(|b| b.median_fee_rate), Some(None));
        monitor.stop().await;
    }
}
