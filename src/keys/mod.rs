//! Keys - Extended key decoding and signer fingerprints. Never touches private key bytes.

pub mod base58;

use bitcoin::hashes::{hash160, Hash};
use std::fmt;

pub use base58::Base58Error;

/// Length of a serialized BIP32 extended key
pub const EXTENDED_KEY_LEN: usize = 78;
/// Compressed public key (or 0x00-padded private key) at the end of the payload
const KEY_MATERIAL_LEN: usize = 33;

/// Errors during extended key parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error(transparent)]
    Base58(#[from] Base58Error),
    #[error("extended key must be {EXTENDED_KEY_LEN} bytes, got {0}")]
    Length(usize),
    #[error("unrecognized extended key version {}", hex::encode(.0))]
    UnrecognizedVersion([u8; 4]),
}

/// Network family encoded in a version prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyNetwork {
    Mainnet,
    Testnet,
}

/// Whether the serialized key is public or private
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Public,
    Private,
}

/// SLIP-132 script hint carried by the version prefix (x/y/z)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptHint {
    Plain,
    NestedSegwit,
    NativeSegwit,
}

/// A recognized 4-byte version prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyVersion {
    pub bytes: [u8; 4],
    pub network: KeyNetwork,
    pub kind: KeyKind,
    pub hint: ScriptHint,
}

const fn version(bytes: [u8; 4], network: KeyNetwork, kind: KeyKind, hint: ScriptHint) -> KeyVersion {
    KeyVersion { bytes, network, kind, hint }
}

/// Whitelist of version prefixes: xprv/xpub, yprv/ypub, zprv/zpub and their testnet twins
pub const KNOWN_VERSIONS: &[KeyVersion] = &[
    version([0x04, 0x88, 0xad, 0xe4], KeyNetwork::Mainnet, KeyKind::Private, ScriptHint::Plain),
    version([0x04, 0x88, 0xb2, 0x1e], KeyNetwork::Mainnet, KeyKind::Public, ScriptHint::Plain),
    version([0x04, 0x9d, 0x78, 0x78], KeyNetwork::Mainnet, KeyKind::Private, ScriptHint::NestedSegwit),
    version([0x04, 0x9d, 0x7c, 0xb2], KeyNetwork::Mainnet, KeyKind::Public, ScriptHint::NestedSegwit),
    version([0x04, 0xb2, 0x43, 0x0c], KeyNetwork::Mainnet, KeyKind::Private, ScriptHint::NativeSegwit),
    version([0x04, 0xb2, 0x47, 0x46], KeyNetwork::Mainnet, KeyKind::Public, ScriptHint::NativeSegwit),
    version([0x04, 0x35, 0x83, 0x94], KeyNetwork::Testnet, KeyKind::Private, ScriptHint::Plain),
    version([0x04, 0x35, 0x87, 0xcf], KeyNetwork::Testnet, KeyKind::Public, ScriptHint::Plain),
    version([0x04, 0x4a, 0x4e, 0x28], KeyNetwork::Testnet, KeyKind::Private, ScriptHint::NestedSegwit),
    version([0x04, 0x4a, 0x52, 0x62], KeyNetwork::Testnet, KeyKind::Public, ScriptHint::NestedSegwit),
    version([0x04, 0x5f, 0x18, 0xbc], KeyNetwork::Testnet, KeyKind::Private, ScriptHint::NativeSegwit),
    version([0x04, 0x5f, 0x1c, 0xf6], KeyNetwork::Testnet, KeyKind::Public, ScriptHint::NativeSegwit),
];

impl KeyVersion {
    pub fn lookup(bytes: [u8; 4]) -> Option<KeyVersion> {
        KNOWN_VERSIONS.iter().copied().find(|v| v.bytes == bytes)
    }
}

/// 4-byte key fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; 4]);

impl Fingerprint {
    pub fn to_hex(&self) -> String { hex::encode(self.0) }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.to_hex()) }
}

/// Decoded BIP32 extended key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedKey {
    payload: [u8; EXTENDED_KEY_LEN],
    version: KeyVersion,
}

impl ExtendedKey {
    /// Base58Check-decode and validate length and version prefix
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let bytes = base58::decode_check(raw.trim())?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let payload: [u8; EXTENDED_KEY_LEN] = bytes.try_into().map_err(|_| KeyError::Length(bytes.len()))?;
        let prefix = [payload[0], payload[1], payload[2], payload[3]];
        let version = KeyVersion::lookup(prefix).ok_or(KeyError::UnrecognizedVersion(prefix))?;
        Ok(Self { payload, version })
    }

    pub fn version(&self) -> KeyVersion { self.version }
    pub fn network(&self) -> KeyNetwork { self.version.network }
    pub fn payload(&self) -> &[u8; EXTENDED_KEY_LEN] { &self.payload }
    pub fn fingerprint(&self) -> Fingerprint { fingerprint(&self.payload) }
}

/// First 4 bytes of hash160 over the trailing 33 bytes of the payload.
///
/// Depends only on the key material, so payloads differing in version (or any
/// other header field) yield the same fingerprint.
pub fn fingerprint(payload: &[u8; EXTENDED_KEY_LEN]) -> Fingerprint {
    let digest = hash160::Hash::hash(&payload[EXTENDED_KEY_LEN - KEY_MATERIAL_LEN..]).to_byte_array();
    Fingerprint([digest[0], digest[1], digest[2], digest[3]])
}
