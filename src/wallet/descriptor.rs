//! Watch descriptors for a single-sig BIP-84 signer

use crate::rpc::{RpcClient, RpcError};
use serde::Serialize;
use std::fmt;

/// Derivation window handed to the node on import
pub const IMPORT_RANGE: [u32; 2] = [0, 3000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Keychain {
    Receive,
    Change,
}

impl Keychain {
    pub const BOTH: [Keychain; 2] = [Keychain::Receive, Keychain::Change];

    /// The `/<n>/*` component of the descriptor
    pub fn index(&self) -> u32 {
        match self {
            Keychain::Receive => 0,
            Keychain::Change => 1,
        }
    }

    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Keychain::Receive),
            1 => Some(Keychain::Change),
            _ => None,
        }
    }

    pub fn is_change(&self) -> bool { matches!(self, Keychain::Change) }
}

/// `wpkh([<fp><path>]<xpub>/<change>/*)`. `path` must already use `h` markers.
pub fn descriptor_base(fingerprint: &str, path: &str, xpub: &str, keychain: Keychain) -> String {
    format!("wpkh([{}{}]{}/{}/*)", fingerprint.to_lowercase(), path, xpub, keychain.index())
}

/// Ask the node for the checksum of `base`. Errors propagate unchanged.
pub async fn resolve_checksum(base: &str, rpc: &RpcClient) -> Result<String, RpcError> {
    Ok(rpc.get_descriptor_info(base).await?.checksum)
}

/// A descriptor and the node-computed checksum for exactly that string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    base: String,
    checksum: String,
    keychain: Keychain,
}

impl Descriptor {
    pub fn new(base: impl Into<String>, checksum: impl Into<String>, keychain: Keychain) -> Self {
        Self { base: base.into(), checksum: checksum.into(), keychain }
    }

    pub fn base(&self) -> &str { &self.base }
    pub fn checksum(&self) -> &str { &self.checksum }
    pub fn keychain(&self) -> Keychain { self.keychain }

    pub fn with_checksum(&self) -> String { format!("{}#{}", self.base, self.checksum) }

    pub fn import_request(&self) -> ImportRequest {
        ImportRequest {
            desc: self.with_checksum(),
            internal: self.keychain.is_change(),
            range: IMPORT_RANGE,
            timestamp: "now",
            keypool: true,
            watchonly: true,
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.with_checksum()) }
}

/// Receive and change descriptors. A wallet has both or neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorPair {
    receive: Descriptor,
    change: Descriptor,
}

impl DescriptorPair {
    /// `None` unless the two descriptors cover receive and change respectively
    pub fn new(receive: Descriptor, change: Descriptor) -> Option<Self> {
        (receive.keychain == Keychain::Receive && change.keychain == Keychain::Change).then_some(Self { receive, change })
    }

    pub fn get(&self, keychain: Keychain) -> &Descriptor {
        match keychain {
            Keychain::Receive => &self.receive,
            Keychain::Change => &self.change,
        }
    }

    pub fn receive(&self) -> &Descriptor { &self.receive }
    pub fn change(&self) -> &Descriptor { &self.change }

    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        [&self.receive, &self.change].into_iter()
    }
}

/// One `importmulti` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportRequest {
    pub desc: String,
    pub internal: bool,
    pub range: [u32; 2],
    pub timestamp: &'static str,
    pub keypool: bool,
    pub watchonly: bool,
}
