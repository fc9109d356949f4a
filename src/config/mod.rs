//! Config - Wallets, global settings and the session's RPC clients
//!
//! ```text
//! ConfigStore ──read/write bytes──► ConfigBackend (FileBackend | MemoryBackend | ...)
//!     │
//!     ├── settings { node_url, default_wallet }
//!     ├── wallets  [Wallet, ...]  unique by id = "coldcard-<fp>"
//!     └── RpcCache (url, wallet) ──► Arc<RpcClient>
//! ```
//!
//! The document is JSON:
//!
//! ```json
//! {
//!   "default": { "node_url": "http://...", "default_wallet": "coldcard-3d88d0cf" },
//!   "wallets": [
//!     { "name": "coldcard-3d88d0cf", "fingerprint": "3d88d0cf", "derivation_path": "/84h/0h",
//!       "xpub": "xpub...", "node_url": null, "earliest_block": 700000,
//!       "checksums": { "0": "...", "1": "..." } },
//!     { "id": "coldcard-f0ccde95", "load_from": "/secure/coldcard-f0ccde95.json" }
//!   ]
//! }
//! ```

pub mod backend;
mod cache;

pub use backend::{ConfigBackend, FileBackend, MemoryBackend};
pub use cache::{load_wallet, RpcCache};

use crate::core::paths::{env, local};
use crate::rpc::{RpcClient, RpcError};
use crate::wallet::{Keychain, Wallet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("nothing stored at {0}")]
    NotFound(String),
    #[error("wallet {wallet}: checksum map must have exactly keys \"0\" and \"1\", found {found:?}")]
    ChecksumMap { wallet: String, found: Vec<String> },
    #[error("wallet {0} not found in config")]
    UnknownWallet(String),
    #[error("external wallet {id} at {locator} is unavailable")]
    ExternalUnavailable { id: String, locator: String },
    #[error("backend declined to write {0}")]
    WriteRejected(String),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Global settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_wallet: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalletRecord {
    name: String,
    fingerprint: String,
    derivation_path: String,
    xpub: String,
    #[serde(default)]
    node_url: Option<String>,
    #[serde(default)]
    earliest_block: Option<u64>,
    checksums: BTreeMap<String, String>,
}

impl WalletRecord {
    fn from_wallet(wallet: &Wallet) -> Self {
        let checksums = wallet
            .descriptors()
            .map(|pair| pair.iter().map(|d| (d.keychain().index().to_string(), d.checksum().to_string())).collect())
            .unwrap_or_default();
        Self {
            name: wallet.id(),
            fingerprint: wallet.fingerprint().to_string(),
            derivation_path: wallet.derivation_path().to_string(),
            xpub: wallet.xpub().to_string(),
            node_url: wallet.node_url().map(str::to_string),
            earliest_block: wallet.earliest_block(),
            checksums,
        }
    }

    fn into_wallet(self, origin: Option<String>) -> Result<Wallet, ConfigError> {
        let receive = self.checksums.get(&Keychain::Receive.index().to_string()).cloned();
        let change = self.checksums.get(&Keychain::Change.index().to_string()).cloned();
        let (Some(receive), Some(change), 2) = (receive, change, self.checksums.len()) else {
            return Err(ConfigError::ChecksumMap { wallet: self.name, found: self.checksums.into_keys().collect() });
        };

        let wallet = Wallet::new(self.fingerprint, self.derivation_path, self.xpub)
            .with_checksums(receive, change)
            .with_earliest_block(self.earliest_block)
            .with_node_url(self.node_url)
            .with_origin(origin);
        if wallet.id() != self.name {
            warn!(stored = %self.name, derived = %wallet.id(), "stored wallet name differs from fingerprint; using derived");
        }
        Ok(wallet)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum WalletEntry {
    External { id: String, load_from: String },
    Inline(WalletRecord),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    default: Settings,
    #[serde(default)]
    wallets: Vec<WalletEntry>,
}

/// Loaded configuration for one session
pub struct ConfigStore {
    locator: String,
    backend: Arc<dyn ConfigBackend>,
    settings: Settings,
    wallets: Vec<Wallet>,
    rpc: RpcCache,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("locator", &self.locator)
            .field("settings", &self.settings)
            .field("wallets", &self.wallets.len())
            .finish_non_exhaustive()
    }
}

impl ConfigStore {
    /// Empty store that will be written to `locator`
    pub fn blank(locator: impl Into<String>, backend: Arc<dyn ConfigBackend>, rpc: RpcCache) -> Self {
        Self { locator: locator.into(), backend, settings: Settings::default(), wallets: Vec::new(), rpc }
    }

    pub fn load(locator: impl Into<String>, backend: Arc<dyn ConfigBackend>, rpc: RpcCache) -> Result<Self, ConfigError> {
        let locator = locator.into();
        let bytes = backend.read(&locator)?.ok_or_else(|| ConfigError::NotFound(locator.clone()))?;
        let document: Document = serde_json::from_slice(&bytes)?;

        let mut store = Self::blank(locator, backend, rpc);
        store.settings = document.default;
        for entry in document.wallets {
            let wallet = match entry {
                WalletEntry::Inline(record) => record.into_wallet(None)?,
                WalletEntry::External { id, load_from } => store.load_external(id, load_from)?,
            };
            store.add_wallet(wallet);
        }
        info!(locator = %store.locator, wallets = store.wallets.len(), "loaded config");
        Ok(store)
    }

    /// Load, or start blank when nothing is stored yet
    pub fn load_or_blank(locator: impl Into<String>, backend: Arc<dyn ConfigBackend>, rpc: RpcCache) -> Result<Self, ConfigError> {
        let locator = locator.into();
        match Self::load(locator.clone(), Arc::clone(&backend), rpc.clone()) {
            Err(ConfigError::NotFound(_)) => Ok(Self::blank(locator, backend, rpc)),
            other => other,
        }
    }

    fn load_external(&self, id: String, locator: String) -> Result<Wallet, ConfigError> {
        let bytes = self
            .backend
            .read(&locator)?
            .ok_or_else(|| ConfigError::ExternalUnavailable { id: id.clone(), locator: locator.clone() })?;
        let record: WalletRecord = serde_json::from_slice(&bytes)?;
        record.into_wallet(Some(locator))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        let wallets = self
            .wallets
            .iter()
            .map(|wallet| match wallet.origin() {
                Some(locator) => WalletEntry::External { id: wallet.id(), load_from: locator.to_string() },
                None => WalletEntry::Inline(WalletRecord::from_wallet(wallet)),
            })
            .collect();
        let document = Document { default: self.settings.clone(), wallets };
        Ok(serde_json::to_vec_pretty(&document)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let bytes = self.to_bytes()?;
        if !self.backend.write(&self.locator, &bytes)? {
            return Err(ConfigError::WriteRejected(self.locator.clone()));
        }
        info!(locator = %self.locator, "saved config");
        Ok(())
    }

    pub fn locator(&self) -> &str { &self.locator }
    pub fn is_encrypted(&self) -> bool { self.backend.is_encrypted(&self.locator) }
    pub fn settings(&self) -> &Settings { &self.settings }
    pub fn rpc_cache(&self) -> &RpcCache { &self.rpc }

    /// Replace the client cache, e.g. once discovery has pinned the network
    pub fn set_rpc_cache(&mut self, rpc: RpcCache) { self.rpc = rpc; }

    pub fn set_node_url(&mut self, url: Option<String>) { self.settings.node_url = url; }
    pub fn set_default_wallet(&mut self, id: Option<String>) { self.settings.default_wallet = id; }

    pub fn wallets(&self) -> &[Wallet] { &self.wallets }

    pub fn wallet(&self, id: &str) -> Option<&Wallet> {
        self.wallets.iter().find(|w| w.id() == id)
    }

    /// Insert or replace by id. The first wallet becomes the default.
    pub fn add_wallet(&mut self, wallet: Wallet) {
        let id = wallet.id();
        match self.wallets.iter_mut().find(|w| w.id() == id) {
            Some(existing) => *existing = wallet,
            None => self.wallets.push(wallet),
        }
        if self.settings.default_wallet.is_none() {
            self.settings.default_wallet = Some(id);
        }
    }

    /// All wallets with `requested` (or the configured default) first
    pub fn ordered_wallets(&self, requested: Option<&str>) -> Result<Vec<&Wallet>, ConfigError> {
        let first = requested.or(self.settings.default_wallet.as_deref());
        if let Some(id) = requested {
            if self.wallet(id).is_none() {
                return Err(ConfigError::UnknownWallet(id.to_string()));
            }
        }
        let mut ordered: Vec<&Wallet> = self.wallets.iter().collect();
        if let Some(id) = first {
            ordered.sort_by_key(|w| w.id() != id);
        }
        Ok(ordered)
    }

    /// Node URL for `wallet`: its override, else the global setting
    pub fn node_url_for(&self, wallet: Option<&Wallet>) -> Option<String> {
        wallet
            .and_then(|w| w.node_url().map(str::to_string))
            .or_else(|| self.settings.node_url.clone())
    }

    /// Cached client, wallet-scoped (and loaded) when `wallet` is given
    pub async fn rpc(&self, wallet: Option<&Wallet>) -> Result<Arc<RpcClient>, ConfigError> {
        let url = self.node_url_for(wallet);
        let name = wallet.map(Wallet::id);
        Ok(self.rpc.get(url.as_deref(), name.as_deref()).await?)
    }
}

/// `<config_dir>/coldpair/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(local::CONFIG_DIR).join(local::CONFIG_FILE))
}

/// Flag, then `COLDPAIR_CONFIG`, then the default path if a file exists there
pub fn resolve_locator(flag: Option<&str>) -> Option<String> {
    if let Some(flag) = flag {
        return Some(flag.to_string());
    }
    if let Ok(value) = std::env::var(env::CONFIG) {
        if !value.trim().is_empty() {
            return Some(value);
        }
    }
    default_config_path().filter(|p| p.exists()).map(|p| p.to_string_lossy().into_owned())
}
