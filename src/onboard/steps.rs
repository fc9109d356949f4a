//! One handler per onboarding step

use super::{Deposit, OnboardError, Onboarding, Question, ScanOutcome, Step, StepOutcome, StepReporter, SYNC_THRESHOLD};
use crate::config::load_wallet;
use crate::core::paths::{device, rpc_codes};
use crate::rpc::{self, RpcClient, RpcError};
use crate::wallet::export;
use crate::wallet::send::{self, SendError, SignedFile};
use crate::wallet::{Utxo, Wallet};
use bitcoin::Amount;
use tracing::{info, warn};

/// `createwallet` errors that mean the wallet is already there. Only the
/// dedicated code, or the wallet-error code with a message saying so; any
/// other -4 is surfaced.
fn wallet_exists(err: &RpcError) -> bool {
    match err {
        RpcError::Rpc { code, .. } if *code == rpc_codes::WALLET_ALREADY_LOADED => true,
        RpcError::Rpc { code, message } if *code == rpc_codes::WALLET_ERROR => {
            message.contains("already exists") || message.contains("already loaded")
        }
        _ => false,
    }
}

impl<R: StepReporter> Onboarding<R> {
    fn node(&self, step: Step) -> Result<RpcClient, OnboardError> {
        self.node.clone().ok_or(OnboardError::OutOfOrder(step))
    }

    fn paired_wallet(&self, step: Step) -> Result<Wallet, OnboardError> {
        self.wallet.clone().ok_or(OnboardError::OutOfOrder(step))
    }

    /// Wallet-scoped client, loading the wallet on first use
    async fn wallet_rpc(&mut self, step: Step) -> Result<RpcClient, OnboardError> {
        if let Some(rpc) = &self.wallet_rpc {
            return Ok(rpc.clone());
        }
        let node = self.node(step)?;
        let id = self.paired_wallet(step)?.id();
        load_wallet(&node, &id).await.map_err(OnboardError::rpc(step))?;
        let rpc = node.for_wallet(&id);
        self.wallet_rpc = Some(rpc.clone());
        Ok(rpc)
    }

    pub(super) async fn discover(&mut self) -> Result<StepOutcome, OnboardError> {
        let mut opts = self.options.connect.clone();
        if opts.url.is_none() {
            opts.url = self.store.settings().node_url.clone();
        }
        let transport = self.store.rpc_cache().transport();
        let (client, info) = rpc::discover(&opts, transport).await.map_err(OnboardError::Discovery)?;

        let found = client.network();
        match self.checkpoint.network {
            Some(expected) if expected != found => return Err(OnboardError::NetworkChanged { expected, found }),
            _ => self.checkpoint.network = Some(found),
        }
        info!(url = %client.display_url(), chain = %info.chain, "using node");
        self.node = Some(client);
        Ok(StepOutcome::Done)
    }

    pub(super) fn confirm_device(&mut self) -> StepOutcome {
        match self.reporter.confirm(&Question::DeviceReady) {
            Some(true) => {
                self.checkpoint.device_confirmed = true;
                StepOutcome::Done
            }
            _ => StepOutcome::not_ready("waiting for the device", self.options.poll_interval),
        }
    }

    pub(super) async fn wait_sync(&mut self) -> Result<StepOutcome, OnboardError> {
        let info = self.node(Step::WaitSync)?.get_blockchain_info().await.map_err(OnboardError::rpc(Step::WaitSync))?;
        if info.verification_progress >= SYNC_THRESHOLD {
            self.checkpoint.synced = true;
            self.sync_backoff = self.options.initial_sync_backoff;
            return Ok(StepOutcome::Done);
        }

        let delay = self.sync_backoff;
        self.sync_backoff = (delay * 2).min(self.options.max_sync_backoff);
        Ok(StepOutcome::not_ready(
            format!("chain sync {:.2}% ({} of {} blocks)", info.verification_progress * 100.0, info.blocks, info.headers),
            delay,
        ))
    }

    pub(super) async fn acquire_export(&mut self) -> Result<StepOutcome, OnboardError> {
        if let Some(id) = &self.checkpoint.wallet_id {
            if let Some(wallet) = self.store.wallet(id) {
                self.wallet = Some(wallet.clone());
                return Ok(StepOutcome::Done);
            }
            warn!(wallet = %id, "checkpointed wallet missing from config; reading export again");
        }

        let path = self.options.workdir.join(device::EXPORT_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StepOutcome::not_ready(format!("waiting for {}", path.display()), self.options.poll_interval));
            }
            Err(e) => return Err(e.into()),
        };

        let summary = match export::parse(&content) {
            Ok(summary) => summary,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unreadable export");
                return Ok(StepOutcome::not_ready(format!("cannot use {}: {err}", path.display()), self.options.poll_interval));
            }
        };

        let node = self.node(Step::AcquireExport)?;
        summary.check_network(node.network()).map_err(OnboardError::NetworkMismatch)?;

        let mut wallet = summary.into_wallet();
        wallet.attach_descriptors(&node).await.map_err(OnboardError::rpc(Step::AcquireExport))?;
        info!(wallet = %wallet.id(), path = wallet.derivation_path(), "read device export");
        self.wallet = Some(wallet);
        Ok(StepOutcome::Done)
    }

    pub(super) fn persist_config(&mut self) -> Result<StepOutcome, OnboardError> {
        let mut wallet = self.paired_wallet(Step::PersistConfig)?;
        let id = wallet.id();
        // The URL discovery used, else the endpoint it resolved to (credentials come from the node config)
        let node_url = match self.options.connect.url.clone().or_else(|| self.store.settings().node_url.clone()) {
            Some(url) => url,
            None => self.node(Step::PersistConfig)?.endpoint().url.clone(),
        };
        if wallet.node_url().is_none() {
            wallet.set_node_url(Some(node_url.clone()));
        }
        if self.store.settings().node_url.is_none() {
            self.store.set_node_url(Some(node_url));
        }
        self.store.add_wallet(wallet.clone());
        self.store.save()?;
        self.wallet = Some(wallet);

        self.checkpoint.wallet_id = Some(id);
        self.checkpoint.config_saved = true;
        Ok(StepOutcome::Done)
    }

    pub(super) async fn create_node_wallet(&mut self) -> Result<StepOutcome, OnboardError> {
        let node = self.node(Step::CreateNodeWallet)?;
        let id = self.paired_wallet(Step::CreateNodeWallet)?.id();
        match node.create_wallet(&id, true).await {
            Ok(_) => info!(wallet = %id, "created watch-only wallet"),
            Err(err) if wallet_exists(&err) => info!(wallet = %id, "watch-only wallet already exists"),
            Err(err) => return Err(OnboardError::Rpc { step: Step::CreateNodeWallet, source: err }),
        }
        self.wallet_rpc(Step::CreateNodeWallet).await?;
        self.checkpoint.node_wallet_created = true;
        Ok(StepOutcome::Done)
    }

    pub(super) async fn import_descriptors(&mut self) -> Result<StepOutcome, OnboardError> {
        let requests = self.paired_wallet(Step::ImportDescriptors)?.import_arguments()?;
        let rpc = self.wallet_rpc(Step::ImportDescriptors).await?;
        let results = rpc.import_multi(&requests).await.map_err(OnboardError::rpc(Step::ImportDescriptors))?;

        for warning in results.iter().flat_map(|r| &r.warnings) {
            warn!(%warning, "import warning");
        }
        let failures: Vec<String> = results.iter().filter(|r| !r.success).map(|r| r.error_message()).collect();
        if !failures.is_empty() || results.len() != requests.len() {
            return Err(OnboardError::ImportFailed(failures.join("; ")));
        }
        self.checkpoint.descriptors_imported = true;
        Ok(StepOutcome::Done)
    }

    /// Blocks for the duration of `scantxoutset`, which has no timeout
    pub(super) async fn scan_utxo_set(&mut self) -> Result<StepOutcome, OnboardError> {
        let mut wallet = self.paired_wallet(Step::ScanUtxoSet)?;
        let descriptors = wallet.scan_arguments()?;
        let node = self.node(Step::ScanUtxoSet)?.with_timeout(None);

        info!(wallet = %wallet.id(), "scanning UTXO set, this can take several minutes");
        let scan = node.scan_tx_out_set(&descriptors).await.map_err(OnboardError::rpc(Step::ScanUtxoSet))?;
        if !scan.success {
            return Err(OnboardError::ScanAborted);
        }

        let outcome = ScanOutcome { earliest_height: scan.earliest_height(), outputs: scan.unspents.len(), total: scan.total() };
        info!(outputs = outcome.outputs, total = %outcome.total, earliest = ?outcome.earliest_height, "scan complete");

        if outcome.earliest_height.is_some() {
            wallet.set_earliest_block(outcome.earliest_height);
            self.store.add_wallet(wallet.clone());
            self.store.save()?;
            self.wallet = Some(wallet);
        }
        self.checkpoint.scan = Some(outcome);
        Ok(StepOutcome::Done)
    }

    pub(super) async fn rescan(&mut self) -> Result<StepOutcome, OnboardError> {
        let height = self.checkpoint.scan.as_ref().and_then(|s| s.earliest_height).ok_or(OnboardError::OutOfOrder(Step::Rescan))?;
        let rpc = self.wallet_rpc(Step::Rescan).await?.with_timeout(None);

        info!(from = height, "rescanning wallet history");
        rpc.rescan_blockchain(height).await.map_err(OnboardError::rpc(Step::Rescan))?;
        self.checkpoint.rescanned = true;
        Ok(StepOutcome::Done)
    }

    pub(super) fn confirm_round_trip(&mut self) -> StepOutcome {
        match self.reporter.confirm(&Question::RunRoundTrip) {
            Some(answer) => {
                if !answer {
                    info!("round-trip test skipped");
                }
                self.checkpoint.round_trip = Some(answer);
                StepOutcome::Done
            }
            None => StepOutcome::not_ready("waiting for an answer", self.options.poll_interval),
        }
    }

    pub(super) async fn await_deposit(&mut self) -> Result<StepOutcome, OnboardError> {
        let rpc = self.wallet_rpc(Step::AwaitDeposit).await?;
        let address = match &self.checkpoint.test_address {
            Some(address) => address.clone(),
            None => {
                let address = rpc.get_new_address().await.map_err(OnboardError::rpc(Step::AwaitDeposit))?;
                self.checkpoint.test_address = Some(address.clone());
                address
            }
        };

        let unspent = rpc.list_unspent(0).await.map_err(OnboardError::rpc(Step::AwaitDeposit))?;
        match unspent.into_iter().filter_map(Utxo::from_entry).find(|u| u.address == address) {
            Some(utxo) => {
                info!(outpoint = %utxo.outpoint(), amount = %utxo.amount, "test deposit seen");
                self.checkpoint.deposit = Some(Deposit { txid: utxo.txid, vout: utxo.vout, amount: utxo.amount });
                Ok(StepOutcome::Done)
            }
            None => Ok(StepOutcome::not_ready(format!("send a small test amount to {address}"), self.options.poll_interval)),
        }
    }

    /// Spend 90% of the deposit, from the deposit alone, to a fresh address
    pub(super) async fn prepare_test_send(&mut self) -> Result<StepOutcome, OnboardError> {
        let deposit = self.checkpoint.deposit.clone().ok_or(OnboardError::OutOfOrder(Step::PrepareTestSend))?;
        let rpc = self.wallet_rpc(Step::PrepareTestSend).await?;
        let to = match &self.checkpoint.send_address {
            Some(address) => address.clone(),
            None => {
                let address = rpc.get_new_address().await.map_err(OnboardError::rpc(Step::PrepareTestSend))?;
                self.checkpoint.send_address = Some(address.clone());
                address
            }
        };

        let amount = Amount::from_sat(deposit.amount.to_sat() * 9 / 10);
        let prepared = send::prepare_psbt(&rpc, &[(deposit.txid, deposit.vout)], &to, amount, &self.options.workdir).await?;
        info!(path = %prepared.path.display(), %amount, fee = %prepared.fee, "test spend ready for signing");
        self.checkpoint.unsigned_psbt = Some(prepared.path);
        Ok(StepOutcome::Done)
    }

    pub(super) async fn await_signature(&mut self) -> Result<StepOutcome, OnboardError> {
        let unsigned = self.checkpoint.unsigned_psbt.clone().ok_or(OnboardError::OutOfOrder(Step::AwaitSignature))?;
        let signed = send::signed_path_for(&unsigned);
        let content = match std::fs::read(&signed) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StepOutcome::not_ready(
                    format!("sign {} on the device and copy back {}", unsigned.display(), signed.display()),
                    self.options.poll_interval,
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let rpc = self.wallet_rpc(Step::AwaitSignature).await?;
        let file = match SignedFile::read(&content) {
            Ok(file) => file,
            // Possibly still being copied
            Err(SendError::UnrecognizedFormat) => {
                return Ok(StepOutcome::not_ready(format!("{} is not a signed PSBT yet", signed.display()), self.options.poll_interval));
            }
            Err(err) => return Err(err.into()),
        };
        let tx_hex = match file.to_tx_hex(&rpc).await {
            Ok(hex) => hex,
            Err(SendError::Incomplete) => {
                return Ok(StepOutcome::not_ready(format!("{} is missing signatures", signed.display()), self.options.poll_interval));
            }
            Err(SendError::UnrecognizedFormat) => {
                return Ok(StepOutcome::not_ready(format!("{} is not a valid transaction", signed.display()), self.options.poll_interval));
            }
            Err(err) => return Err(err.into()),
        };

        self.checkpoint.signed_psbt = file.psbt().map(str::to_string);
        self.checkpoint.signed_tx = Some(tx_hex);
        Ok(StepOutcome::Done)
    }

    pub(super) async fn broadcast(&mut self) -> Result<StepOutcome, OnboardError> {
        let tx_hex = self.checkpoint.signed_tx.clone().ok_or(OnboardError::OutOfOrder(Step::Broadcast))?;
        let rpc = self.wallet_rpc(Step::Broadcast).await?;
        let summary = send::describe_transaction(&rpc, &tx_hex, self.checkpoint.signed_psbt.as_deref()).await?;

        match self.reporter.confirm(&Question::Broadcast(summary)) {
            Some(true) => {
                let txid = rpc.send_raw_transaction(&tx_hex).await.map_err(OnboardError::rpc(Step::Broadcast))?;
                info!(%txid, "broadcast test spend");
                self.checkpoint.broadcast_txid = Some(txid);
                Ok(StepOutcome::Done)
            }
            Some(false) => {
                info!("broadcast declined, round-trip test skipped");
                self.checkpoint.broadcast_declined = true;
                Ok(StepOutcome::Done)
            }
            None => Ok(StepOutcome::not_ready("waiting for broadcast approval", self.options.poll_interval)),
        }
    }

    pub(super) async fn await_confirmation(&mut self) -> Result<StepOutcome, OnboardError> {
        let txid = self.checkpoint.broadcast_txid.clone().ok_or(OnboardError::OutOfOrder(Step::AwaitConfirmation))?;
        let to = self.checkpoint.send_address.clone().ok_or(OnboardError::OutOfOrder(Step::AwaitConfirmation))?;
        let rpc = self.wallet_rpc(Step::AwaitConfirmation).await?;
        let required = self.options.required_confirmations;

        let unspent = rpc.list_unspent(0).await.map_err(OnboardError::rpc(Step::AwaitConfirmation))?;
        let confirmations = unspent
            .into_iter()
            .filter_map(Utxo::from_entry)
            .find(|u| u.txid == txid && u.address == to)
            .map(|u| u.confirmations);

        match confirmations {
            Some(n) if n >= required => {
                info!(%txid, confirmations = n, "test spend confirmed");
                self.checkpoint.confirmed = true;
                Ok(StepOutcome::Done)
            }
            Some(n) => Ok(StepOutcome::not_ready(format!("{n}/{required} confirmations for {txid}"), self.options.poll_interval)),
            None => Ok(StepOutcome::not_ready(format!("waiting for {txid} to reach the wallet"), self.options.poll_interval)),
        }
    }
}
