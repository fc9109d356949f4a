//! Wallet identity and unspent outputs

use super::descriptor::{descriptor_base, resolve_checksum, Descriptor, DescriptorPair, ImportRequest, Keychain};
use crate::core::paths::device::WALLET_ID_PREFIX;
use crate::keys::KeyNetwork;
use crate::rpc::types::UnspentEntry;
use crate::rpc::{RpcClient, RpcError};
use bitcoin::Amount;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("wallet {0} has no descriptors yet")]
    NotPaired(String),
    #[error("unhandled extended key prefix in {0}")]
    UnknownPrefix(String),
}

/// A signer's identity as tracked by the node.
///
/// Key material is immutable once constructed; descriptors are attached
/// after the node has computed their checksums.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    fingerprint: String,
    derivation_path: String,
    xpub: String,
    descriptors: Option<DescriptorPair>,
    earliest_block: Option<u64>,
    node_url: Option<String>,
    origin: Option<String>,
}

impl Wallet {
    pub fn new(fingerprint: impl Into<String>, derivation_path: impl Into<String>, xpub: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into().to_lowercase(),
            derivation_path: derivation_path.into(),
            xpub: xpub.into(),
            descriptors: None,
            earliest_block: None,
            node_url: None,
            origin: None,
        }
    }

    /// Rebuild descriptors from stored checksums
    pub fn with_checksums(mut self, receive: impl Into<String>, change: impl Into<String>) -> Self {
        let receive = Descriptor::new(self.descriptor_base(Keychain::Receive), receive, Keychain::Receive);
        let change = Descriptor::new(self.descriptor_base(Keychain::Change), change, Keychain::Change);
        self.descriptors = DescriptorPair::new(receive, change);
        self
    }

    pub fn with_earliest_block(mut self, height: Option<u64>) -> Self { self.earliest_block = height; self }
    pub fn with_node_url(mut self, url: Option<String>) -> Self { self.node_url = url; self }
    pub fn with_origin(mut self, origin: Option<String>) -> Self { self.origin = origin; self }

    /// Config identifier and node-side wallet name
    pub fn id(&self) -> String { format!("{WALLET_ID_PREFIX}{}", self.fingerprint) }

    pub fn fingerprint(&self) -> &str { &self.fingerprint }
    pub fn derivation_path(&self) -> &str { &self.derivation_path }
    pub fn xpub(&self) -> &str { &self.xpub }
    pub fn descriptors(&self) -> Option<&DescriptorPair> { self.descriptors.as_ref() }
    pub fn earliest_block(&self) -> Option<u64> { self.earliest_block }
    pub fn node_url(&self) -> Option<&str> { self.node_url.as_deref() }
    /// Locator of the external store this wallet was loaded from
    pub fn origin(&self) -> Option<&str> { self.origin.as_deref() }

    pub fn set_earliest_block(&mut self, height: Option<u64>) { self.earliest_block = height; }
    pub fn set_node_url(&mut self, url: Option<String>) { self.node_url = url; }

    pub fn key_network(&self) -> Result<KeyNetwork, WalletError> {
        if self.xpub.starts_with("tpub") {
            Ok(KeyNetwork::Testnet)
        } else if self.xpub.starts_with("xpub") {
            Ok(KeyNetwork::Mainnet)
        } else {
            Err(WalletError::UnknownPrefix(self.id()))
        }
    }

    pub fn descriptor_base(&self, keychain: Keychain) -> String {
        descriptor_base(&self.fingerprint, &self.derivation_path, &self.xpub, keychain)
    }

    /// Fetch both checksums from the node and attach the descriptors
    pub async fn attach_descriptors(&mut self, rpc: &RpcClient) -> Result<(), RpcError> {
        let receive_base = self.descriptor_base(Keychain::Receive);
        let change_base = self.descriptor_base(Keychain::Change);
        let receive = Descriptor::new(&receive_base, resolve_checksum(&receive_base, rpc).await?, Keychain::Receive);
        let change = Descriptor::new(&change_base, resolve_checksum(&change_base, rpc).await?, Keychain::Change);
        self.descriptors = DescriptorPair::new(receive, change);
        Ok(())
    }

    fn paired(&self) -> Result<&DescriptorPair, WalletError> {
        self.descriptors.as_ref().ok_or_else(|| WalletError::NotPaired(self.id()))
    }

    /// `importmulti` requests, receive first
    pub fn import_arguments(&self) -> Result<Vec<ImportRequest>, WalletError> {
        Ok(self.paired()?.iter().map(Descriptor::import_request).collect())
    }

    /// Descriptors for `scantxoutset start`
    pub fn scan_arguments(&self) -> Result<Vec<String>, WalletError> {
        Ok(self.paired()?.iter().map(Descriptor::with_checksum).collect())
    }
}

/// One unspent output owned by the wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Utxo {
    pub address: String,
    /// Serialized in satoshis
    pub amount: Amount,
    pub confirmations: u64,
    pub txid: String,
    pub vout: u32,
}

impl Utxo {
    /// Entries without an address (non-standard scripts) are not trackable
    pub fn from_entry(entry: UnspentEntry) -> Option<Self> {
        Some(Self {
            address: entry.address?,
            amount: entry.amount,
            confirmations: entry.confirmations,
            txid: entry.txid,
            vout: entry.vout,
        })
    }

    pub fn outpoint(&self) -> String { format!("{}:{}", self.txid, self.vout) }
}
