//! Device summary-file parsing
//!
//! The summary lists the master xpub two lines under its heading, optionally
//! a `master key fingerprint:` line, and derived keys as `<path> => <key>`.
//! Only the BIP-84 account key is used.

use super::Wallet;
use crate::core::network::Network;
use crate::keys::{ExtendedKey, Fingerprint, KeyError, KeyNetwork};
use crate::rpc::{RpcClient, RpcError};
use regex::Regex;
use tracing::debug;

const MASTER_HEADING: &str = "'master' extended public key";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("export has no master extended public key")]
    MissingMaster,
    #[error("unexpected master key prefix {0:?}")]
    UnexpectedMasterPrefix(String),
    #[error("export fingerprint {stated} does not match master key fingerprint {computed}")]
    FingerprintMismatch { stated: String, computed: String },
    #[error("export has no BIP-84 account key")]
    MissingAccountKey,
    #[error("account key prefix {derived} does not match master key prefix {master}")]
    PrefixMismatch { master: String, derived: String },
    #[error("unexpected derivation path suffix {0:?}")]
    DerivationPath(String),
    #[error("inferred derivation path {0} does not appear in the export")]
    PathNotFound(String),
    #[error("export holds {export:?} keys but the node runs {node}")]
    NetworkMismatch { export: KeyNetwork, node: &'static str },
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Pattern(#[from] regex::Error),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// What the summary file says about the signer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub fingerprint: Fingerprint,
    /// Normalized with `h` hardened markers, e.g. `/84h/1h/0h`
    pub derivation_path: String,
    pub xpub: String,
    pub network: KeyNetwork,
}

impl ExportSummary {
    /// Mainnet keys pair only with a mainnet node, test keys with the rest
    pub fn check_network(&self, network: Network) -> Result<(), ExportError> {
        if self.network == network.key_network() {
            Ok(())
        } else {
            Err(ExportError::NetworkMismatch { export: self.network, node: network.as_str() })
        }
    }

    pub fn into_wallet(self) -> Wallet {
        Wallet::new(self.fingerprint.to_hex(), self.derivation_path, self.xpub)
    }
}

fn master_key(content: &str) -> Option<&str> {
    let lines: Vec<&str> = content.lines().collect();
    let heading = lines.iter().position(|line| line.contains(MASTER_HEADING))?;
    lines.get(heading + 2).map(|line| line.trim()).filter(|line| !line.is_empty())
}

/// Parse and cross-check a summary file. Does not touch the node.
pub fn parse(content: &str) -> Result<ExportSummary, ExportError> {
    let master = master_key(content).ok_or(ExportError::MissingMaster)?;
    let master_prefix = master.get(..4).unwrap_or(master);
    if master_prefix != "xpub" && master_prefix != "tpub" {
        return Err(ExportError::UnexpectedMasterPrefix(master_prefix.to_string()));
    }
    let master_key = ExtendedKey::parse(master)?;
    let fingerprint = master_key.fingerprint();

    let stated = Regex::new(r"master key fingerprint: ([a-zA-Z0-9]+)")?;
    if let Some(caps) = stated.captures(content) {
        let stated = caps[1].to_lowercase();
        if stated != fingerprint.to_hex() {
            return Err(ExportError::FingerprintMismatch { stated, computed: fingerprint.to_hex() });
        }
    }

    let account = Regex::new(r"m/84'(\S+) => ([xt]pub)([a-zA-Z0-9]+)")?;
    let caps = account.captures(content).ok_or(ExportError::MissingAccountKey)?;
    let (suffix, derived_prefix) = (&caps[1], &caps[2]);
    if derived_prefix != master_prefix {
        return Err(ExportError::PrefixMismatch { master: master_prefix.to_string(), derived: derived_prefix.to_string() });
    }

    if !Regex::new(r"^(/\d+'?)+$")?.is_match(suffix) {
        return Err(ExportError::DerivationPath(suffix.to_string()));
    }
    let derivation_path = format!("/84h{}", suffix.replace('\'', "h"));

    // The normalized path must map back onto a line of the same key family
    let echoed = format!("{} => {}", regex::escape(&derivation_path.replace('h', "'")), master_prefix);
    if !Regex::new(&echoed)?.is_match(content) {
        return Err(ExportError::PathNotFound(derivation_path));
    }

    let xpub = format!("{derived_prefix}{}", &caps[3]);
    ExtendedKey::parse(&xpub)?;
    debug!(fingerprint = %fingerprint, path = %derivation_path, "parsed device export");

    Ok(ExportSummary { fingerprint, derivation_path, xpub, network: master_key.network() })
}

/// Parse an export and attach node-computed descriptor checksums
pub async fn wallet_from_export(content: &str, rpc: &RpcClient) -> Result<Wallet, ExportError> {
    let mut wallet = parse(content)?.into_wallet();
    wallet.attach_descriptors(rpc).await?;
    Ok(wallet)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAINNET: &str = include_str!("../../tests/fixtures/summary-mainnet.txt");
    const TESTNET: &str = include_str!("../../tests/fixtures/summary-testnet.txt");

    #[test]
    fn test_parse_mainnet_summary() {
        let summary = parse(MAINNET).unwrap();
        assert_eq!(summary.fingerprint.to_hex(), "3d88d0cf");
        assert_eq!(summary.derivation_path, "/84h/0h");
        assert!(summary.xpub.starts_with("xpub6BUBVXTHPtiW"));
        assert_eq!(summary.network, KeyNetwork::Mainnet);
        assert_eq!(summary.into_wallet().id(), "coldcard-3d88d0cf");
    }

    #[test]
    fn test_parse_testnet_summary() {
        let summary = parse(TESTNET).unwrap();
        assert_eq!(summary.fingerprint.to_hex(), "f0ccde95");
        assert_eq!(summary.derivation_path, "/84h/1h/0h");
        assert!(summary.xpub.starts_with("tpubDCmmTK7n"));

        let wallet = summary.into_wallet().with_checksums("c0", "c1");
        let pair = wallet.descriptors().unwrap();
        assert_eq!(pair.receive().base().replacen("/0/*", "/1/*", 1), pair.change().base());
    }

    #[test]
    fn test_network_check() {
        let summary = parse(TESTNET).unwrap();
        assert!(summary.check_network(Network::Testnet).is_ok());
        assert!(summary.check_network(Network::Regtest).is_ok());
        assert!(matches!(summary.check_network(Network::Bitcoin), Err(ExportError::NetworkMismatch { .. })));
    }

    #[test]
    fn test_prefix_mismatch() {
        let tampered = TESTNET.replace("m/84'/1'/0' => tpubDCmm", "m/84'/1'/0' => xpubDCmm");
        assert!(matches!(parse(&tampered), Err(ExportError::PrefixMismatch { .. })));
    }

    #[test]
    fn test_fingerprint_cross_check() {
        let tampered = TESTNET.replace("F0CCDE95", "DEADBEEF");
        match parse(&tampered) {
            Err(ExportError::FingerprintMismatch { stated, computed }) => {
                assert_eq!(stated, "deadbeef");
                assert_eq!(computed, "f0ccde95");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_bad_path_suffix() {
        let tampered = MAINNET.replace("m/84'/0' => xpub6BUB", "m/84'/0x' => xpub6BUB");
        assert!(matches!(parse(&tampered), Err(ExportError::DerivationPath(_))));
    }

    #[test]
    fn test_missing_master() {
        assert!(matches!(parse("nothing here"), Err(ExportError::MissingMaster)));
        let cut = TESTNET.replace("'master' extended public key", "top key");
        assert!(matches!(parse(&cut), Err(ExportError::MissingMaster)));
    }

    #[test]
    fn test_corrupted_key_rejected() {
        let tampered = TESTNET.replace("9jLqhEPEHuTAt4", "9jLqhEPEHuTAt5");
        assert!(matches!(parse(&tampered), Err(ExportError::Key(_))));
    }
}
