//! Coldpair: pair an air-gapped signing device with a Bitcoin Core node.
//!
//! The node holds a watch-only wallet built from the device's public export;
//! the device signs PSBTs carried over on a memory card.
//!
//! # Architecture
//!
//! ```text
//! CLI (bin/main.rs)
//!   │
//!   ├── Onboarding (resumable step machine)
//!   │     ├── rpc::discover ─────────► node JSON-RPC (Transport)
//!   │     ├── wallet::export ◄──────── <workdir>/public.txt
//!   │     ├── config::ConfigStore ───► ConfigBackend (file / memory)
//!   │     └── wallet::send ─────────► <workdir>/unsigned-*.psbt
//!   │
//!   └── Monitor (two pollers)
//!         ├── listunspent ──► Mutex<UtxoSet>
//!         └── blocks ───────► Mutex<Vec<Block>>
//! ```
//!
//! # Layers
//!
//! | Module | Role |
//! |--------|------|
//! | `keys` | Base58Check, extended-key versions, fingerprints |
//! | `rpc` | JSON-RPC client, credential discovery, retries, mock node |
//! | `wallet` | Descriptors, device export, PSBT preparation |
//! | `config` | Persisted wallets and the per-wallet RPC client cache |
//! | `onboard` | Pairing workflow with checkpointed progress |
//! | `monitor` | Background UTXO and block pollers |
//!
//! # Usage
//!
//! ```ignore
//! use coldpair::{ConnectOptions, HttpTransport, rpc};
//! use std::sync::Arc;
//!
//! let transport = Arc::new(HttpTransport::new()?);
//! let (node, info) = rpc::discover(&ConnectOptions::new(), transport).await?;
//! println!("{} at height {}", info.chain, info.blocks);
//! ```

pub mod config;
pub mod core;
pub mod keys;
pub mod logging;
pub mod monitor;
pub mod onboard;
pub mod rpc;
pub mod runtime;
pub mod wallet;

// =============================================================================
// Re-exports
// =============================================================================
pub use config::{ConfigBackend, ConfigError, ConfigStore, FileBackend, MemoryBackend, RpcCache};
pub use core::network::Network;
pub use keys::{fingerprint, ExtendedKey, Fingerprint, KeyError};
pub use monitor::{Block, Monitor, MonitorOptions, UtxoEvent, UtxoSet};
pub use onboard::{Checkpoint, OnboardError, OnboardOptions, Onboarding, Question, Step, StepReporter, StepStatus, Tick};
pub use rpc::{ConnectOptions, HttpTransport, RetryPolicy, RpcClient, RpcError, Transport};
pub use runtime::{install_signal_handlers, Shutdown};
pub use wallet::{Utxo, Wallet};
