//! Onboarding - resumable pairing of a signer with a node
//!
//! Every call to [`Onboarding::tick`] walks the steps in order, skipping the
//! ones whose completion flag is already set, and stops at the first step that
//! is not ready yet. Nothing here sleeps: waits are handed back to the caller
//! as [`Tick::Waiting`] with a suggested delay.
//!
//! ```text
//!   Discover ─► ConfirmDevice ─► WaitSync ─► AcquireExport ─► PersistConfig
//!                                                                   │
//!   Rescan? ◄─ ScanUtxoSet ◄─ ImportDescriptors ◄─ CreateNodeWallet ◄┘
//!      │
//!      └─► ConfirmRoundTrip ─► AwaitDeposit ─► PrepareTestSend
//!                                                   │
//!          AwaitConfirmation ◄─ Broadcast ◄─ AwaitSignature
//! ```
//!
//! | Wait                   | Delay                     |
//! |------------------------|---------------------------|
//! | chain sync             | 1s, doubling, max 30s     |
//! | files, answers, coins  | fixed poll interval (1s)  |
//!
//! Only [`Checkpoint`] is persisted. The node client is rediscovered on
//! resume; discovery has no side effects.

mod checkpoint;
mod reporter;
mod steps;

pub use checkpoint::{Checkpoint, Deposit, ScanOutcome};
pub use reporter::{Question, QuestionKind, RecordingReporter, StepReporter, StepStatus};

use crate::config::{ConfigError, ConfigStore};
use crate::core::network::Network;
use crate::core::paths::local;
use crate::rpc::{ConnectOptions, RpcClient, RpcError};
use crate::runtime::Shutdown;
use crate::wallet::export::ExportError;
use crate::wallet::send::SendError;
use crate::wallet::{Wallet, WalletError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

/// Progress at which the chain counts as synced
pub const SYNC_THRESHOLD: f64 = 0.999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Discover,
    ConfirmDevice,
    WaitSync,
    AcquireExport,
    PersistConfig,
    CreateNodeWallet,
    ImportDescriptors,
    ScanUtxoSet,
    Rescan,
    ConfirmRoundTrip,
    AwaitDeposit,
    PrepareTestSend,
    AwaitSignature,
    Broadcast,
    AwaitConfirmation,
}

impl Step {
    pub const ALL: [Step; 15] = [
        Step::Discover,
        Step::ConfirmDevice,
        Step::WaitSync,
        Step::AcquireExport,
        Step::PersistConfig,
        Step::CreateNodeWallet,
        Step::ImportDescriptors,
        Step::ScanUtxoSet,
        Step::Rescan,
        Step::ConfirmRoundTrip,
        Step::AwaitDeposit,
        Step::PrepareTestSend,
        Step::AwaitSignature,
        Step::Broadcast,
        Step::AwaitConfirmation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Discover => "discover",
            Step::ConfirmDevice => "confirm-device",
            Step::WaitSync => "wait-sync",
            Step::AcquireExport => "acquire-export",
            Step::PersistConfig => "persist-config",
            Step::CreateNodeWallet => "create-node-wallet",
            Step::ImportDescriptors => "import-descriptors",
            Step::ScanUtxoSet => "scan-utxo-set",
            Step::Rescan => "rescan",
            Step::ConfirmRoundTrip => "confirm-round-trip",
            Step::AwaitDeposit => "await-deposit",
            Step::PrepareTestSend => "prepare-test-send",
            Step::AwaitSignature => "await-signature",
            Step::Broadcast => "broadcast",
            Step::AwaitConfirmation => "await-confirmation",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Step::Discover => "Find the node",
            Step::ConfirmDevice => "Prepare the signing device",
            Step::WaitSync => "Wait for the node to sync",
            Step::AcquireExport => "Read the device export",
            Step::PersistConfig => "Save the wallet",
            Step::CreateNodeWallet => "Create the watch-only wallet",
            Step::ImportDescriptors => "Import descriptors",
            Step::ScanUtxoSet => "Scan the UTXO set",
            Step::Rescan => "Rescan history",
            Step::ConfirmRoundTrip => "Offer a round-trip test",
            Step::AwaitDeposit => "Wait for the test deposit",
            Step::PrepareTestSend => "Prepare the test spend",
            Step::AwaitSignature => "Wait for the signed transaction",
            Step::Broadcast => "Broadcast the test spend",
            Step::AwaitConfirmation => "Wait for confirmation",
        }
    }

    pub fn index(&self) -> usize {
        Step::ALL.iter().position(|s| s == self).unwrap_or(0)
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single step handler concluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    NotReady { reason: String, retry_after: Duration },
}

impl StepOutcome {
    fn not_ready(reason: impl Into<String>, retry_after: Duration) -> Self {
        StepOutcome::NotReady { reason: reason.into(), retry_after }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    Complete,
    Waiting { step: Step, reason: String, retry_after: Duration },
}

#[derive(Error, Debug)]
pub enum OnboardError {
    #[error("no reachable node: {0}")]
    Discovery(#[source] RpcError),

    #[error("node is on {}, this onboarding started on {}", found.as_str(), expected.as_str())]
    NetworkChanged { expected: Network, found: Network },

    #[error("{step}: {source}")]
    Rpc { step: Step, #[source] source: RpcError },

    #[error("device export does not match the node: {0}")]
    NetworkMismatch(#[source] ExportError),

    #[error("descriptor import failed: {0}")]
    ImportFailed(String),

    #[error("UTXO set scan did not complete")]
    ScanAborted,

    #[error("{0} reached before an earlier step completed")]
    OutOfOrder(Step),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OnboardError {
    fn rpc(step: Step) -> impl FnOnce(RpcError) -> OnboardError {
        move |source| OnboardError::Rpc { step, source }
    }
}

#[derive(Debug, Clone)]
pub struct OnboardOptions {
    /// Where the device export and PSBTs are exchanged
    pub workdir: PathBuf,
    pub connect: ConnectOptions,
    pub required_confirmations: u64,
    pub poll_interval: Duration,
    pub initial_sync_backoff: Duration,
    pub max_sync_backoff: Duration,
    /// Saved after every tick of [`Onboarding::run`]
    pub checkpoint_file: Option<PathBuf>,
}

impl OnboardOptions {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            connect: ConnectOptions::new(),
            required_confirmations: 1,
            poll_interval: Duration::from_secs(1),
            initial_sync_backoff: Duration::from_secs(1),
            max_sync_backoff: Duration::from_secs(30),
            checkpoint_file: None,
        }
    }

    pub fn with_connect(mut self, connect: ConnectOptions) -> Self { self.connect = connect; self }
    pub fn with_required_confirmations(mut self, n: u64) -> Self { self.required_confirmations = n; self }
    pub fn with_poll_interval(mut self, interval: Duration) -> Self { self.poll_interval = interval; self }

    pub fn with_sync_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_sync_backoff = initial;
        self.max_sync_backoff = max;
        self
    }

    pub fn with_checkpoint_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_file = Some(path.into());
        self
    }

    /// `<workdir>/.coldpair-onboarding.json`
    pub fn default_checkpoint_file(&self) -> PathBuf {
        self.workdir.join(local::CHECKPOINT_FILE)
    }
}

pub struct Onboarding<R: StepReporter> {
    store: ConfigStore,
    reporter: R,
    options: OnboardOptions,
    checkpoint: Checkpoint,
    node: Option<RpcClient>,
    wallet: Option<Wallet>,
    wallet_rpc: Option<RpcClient>,
    sync_backoff: Duration,
}

impl<R: StepReporter> std::fmt::Debug for Onboarding<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Onboarding")
            .field("checkpoint", &self.checkpoint)
            .field("node", &self.node.as_ref().map(RpcClient::display_url))
            .finish_non_exhaustive()
    }
}

impl<R: StepReporter> Onboarding<R> {
    pub fn new(store: ConfigStore, reporter: R, options: OnboardOptions) -> Self {
        let sync_backoff = options.initial_sync_backoff;
        Self {
            store,
            reporter,
            options,
            checkpoint: Checkpoint::default(),
            node: None,
            wallet: None,
            wallet_rpc: None,
            sync_backoff,
        }
    }

    /// Resume from a previously saved checkpoint
    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    pub fn checkpoint(&self) -> &Checkpoint { &self.checkpoint }
    pub fn store(&self) -> &ConfigStore { &self.store }
    pub fn reporter(&self) -> &R { &self.reporter }
    pub fn reporter_mut(&mut self) -> &mut R { &mut self.reporter }
    pub fn wallet(&self) -> Option<&Wallet> { self.wallet.as_ref() }
    pub fn workdir(&self) -> &Path { &self.options.workdir }

    pub fn into_store(self) -> ConfigStore { self.store }

    pub fn is_done(&self, step: Step) -> bool {
        let cp = &self.checkpoint;
        let round_trip_off = cp.round_trip == Some(false);
        match step {
            Step::Discover => self.node.is_some(),
            Step::ConfirmDevice => cp.device_confirmed,
            Step::WaitSync => cp.synced,
            Step::AcquireExport => self.wallet.is_some(),
            Step::PersistConfig => cp.config_saved,
            Step::CreateNodeWallet => cp.node_wallet_created,
            Step::ImportDescriptors => cp.descriptors_imported,
            Step::ScanUtxoSet => cp.scan.is_some(),
            Step::Rescan => cp.rescanned || cp.scan.as_ref().is_some_and(|s| s.earliest_height.is_none()),
            Step::ConfirmRoundTrip => cp.round_trip.is_some(),
            Step::AwaitDeposit => round_trip_off || cp.deposit.is_some(),
            Step::PrepareTestSend => round_trip_off || cp.unsigned_psbt.is_some(),
            Step::AwaitSignature => round_trip_off || cp.signed_tx.is_some(),
            Step::Broadcast => cp.round_trip_skipped() || cp.broadcast_txid.is_some(),
            Step::AwaitConfirmation => cp.round_trip_skipped() || cp.confirmed,
        }
    }

    /// Run every pending step until one is not ready or all are done
    pub async fn tick(&mut self) -> Result<Tick, OnboardError> {
        for step in Step::ALL {
            if self.is_done(step) {
                continue;
            }
            self.reporter.render(step, &StepStatus::Running);
            match self.run_step(step).await {
                Ok(StepOutcome::Done) => {
                    info!(%step, "step complete");
                    self.reporter.render(step, &StepStatus::Done);
                }
                Ok(StepOutcome::NotReady { reason, retry_after }) => {
                    debug!(%step, %reason, ?retry_after, "step not ready");
                    self.reporter.render(step, &StepStatus::Waiting(reason.clone()));
                    return Ok(Tick::Waiting { step, reason, retry_after });
                }
                Err(err) => {
                    error!(%step, error = %err, "step failed");
                    self.reporter.render(step, &StepStatus::Failed(err.to_string()));
                    return Err(err);
                }
            }
        }
        Ok(Tick::Complete)
    }

    /// Drive `tick` to completion. Returns false when interrupted by shutdown.
    pub async fn run(&mut self, shutdown: &Shutdown) -> Result<bool, OnboardError> {
        loop {
            let tick = self.tick().await;
            self.save_checkpoint()?;
            match tick? {
                Tick::Complete => {
                    if self.checkpoint.round_trip_skipped() {
                        info!(wallet = ?self.checkpoint.wallet_id, "onboarding complete, round trip skipped");
                    } else {
                        info!(wallet = ?self.checkpoint.wallet_id, "onboarding complete");
                    }
                    return Ok(true);
                }
                Tick::Waiting { retry_after, .. } => {
                    if !shutdown.sleep(retry_after).await {
                        info!("onboarding interrupted");
                        return Ok(false);
                    }
                }
            }
        }
    }

    fn save_checkpoint(&self) -> Result<(), std::io::Error> {
        match &self.options.checkpoint_file {
            Some(path) => self.checkpoint.save(path),
            None => Ok(()),
        }
    }

    async fn run_step(&mut self, step: Step) -> Result<StepOutcome, OnboardError> {
        match step {
            Step::Discover => self.discover().await,
            Step::ConfirmDevice => Ok(self.confirm_device()),
            Step::WaitSync => self.wait_sync().await,
            Step::AcquireExport => self.acquire_export().await,
            Step::PersistConfig => self.persist_config(),
            Step::CreateNodeWallet => self.create_node_wallet().await,
            Step::ImportDescriptors => self.import_descriptors().await,
            Step::ScanUtxoSet => self.scan_utxo_set().await,
            Step::Rescan => self.rescan().await,
            Step::ConfirmRoundTrip => Ok(self.confirm_round_trip()),
            Step::AwaitDeposit => self.await_deposit().await,
            Step::PrepareTestSend => self.prepare_test_send().await,
            Step::AwaitSignature => self.await_signature().await,
            Step::Broadcast => self.broadcast().await,
            Step::AwaitConfirmation => self.await_confirmation().await,
        }
    }
}
