//! Wallet module - Watch-only pairing of an air-gapped signer with the node
//!
//! The signer never exposes private keys. Its exported summary yields a
//! fingerprint, a BIP-84 account path and xpub; from those the node tracks
//! two descriptors and funds PSBTs that travel back to the device on SD card.
//!
//! # Architecture
//!
//! ```text
//! public.txt ──► export::parse ──► Wallet ──► attach_descriptors (getdescriptorinfo)
//!                                     │
//!                                     ├── import_arguments ──► importmulti
//!                                     └── scan_arguments   ──► scantxoutset
//!
//! send::prepare_send ──► unsigned-*.psbt ──► device ──► *-signed.psbt
//!                                                            │
//!                         sendrawtransaction ◄── signed_file_to_tx_hex
//! ```
//!
//! # Descriptor layout
//!
//! | Keychain | Descriptor | `internal` |
//! |----------|------------|------------|
//! | Receive | `wpkh([fp/84h/...]xpub/0/*)` | false |
//! | Change | `wpkh([fp/84h/...]xpub/1/*)` | true |

mod descriptor;
pub mod export;
mod model;
pub mod send;

pub use descriptor::{descriptor_base, resolve_checksum, Descriptor, DescriptorPair, ImportRequest, Keychain, IMPORT_RANGE};
pub use export::{ExportError, ExportSummary};
pub use model::{Utxo, Wallet, WalletError};
pub use send::SendError;
