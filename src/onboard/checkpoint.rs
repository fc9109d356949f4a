//! Minimal state needed to resume onboarding after an interruption

use crate::core::network::Network;
use bitcoin::Amount;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub earliest_height: Option<u64>,
    pub outputs: usize,
    pub total: Amount,
}

/// The test deposit the round trip spends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub txid: String,
    pub vout: u32,
    pub amount: Amount,
}

fn invalid_data(err: serde_json::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, err)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Checkpoint {
    pub network: Option<Network>,
    pub device_confirmed: bool,
    pub synced: bool,
    /// Set once the wallet is in the config; resumption reloads it from there
    pub wallet_id: Option<String>,
    pub config_saved: bool,
    pub node_wallet_created: bool,
    pub descriptors_imported: bool,
    pub scan: Option<ScanOutcome>,
    pub rescanned: bool,

    pub round_trip: Option<bool>,
    pub test_address: Option<String>,
    pub deposit: Option<Deposit>,
    pub send_address: Option<String>,
    pub unsigned_psbt: Option<PathBuf>,
    pub signed_tx: Option<String>,
    pub signed_psbt: Option<String>,
    pub broadcast_txid: Option<String>,
    pub broadcast_declined: bool,
    pub confirmed: bool,
}

impl Checkpoint {
    /// `Ok(None)` when no checkpoint was saved
    pub fn load(path: &Path) -> Result<Option<Self>, std::io::Error> {
        match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(invalid_data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        let bytes = serde_json::to_vec_pretty(self).map_err(invalid_data)?;
        std::fs::write(path, bytes)
    }

    /// True when the user opted out of the round trip or the broadcast
    pub fn round_trip_skipped(&self) -> bool {
        self.round_trip == Some(false) || self.broadcast_declined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        assert_eq!(Checkpoint::load(&path).unwrap(), None);

        let checkpoint = Checkpoint {
            network: Some(Network::Testnet),
            synced: true,
            deposit: Some(Deposit { txid: "aa".into(), vout: 1, amount: Amount::from_sat(12_345) }),
            ..Checkpoint::default()
        };
        checkpoint.save(&path).unwrap();
        assert_eq!(Checkpoint::load(&path).unwrap(), Some(checkpoint));
    }

    #[test]
    fn test_missing_fields_default() {
        let checkpoint: Checkpoint = serde_json::from_str(r#"{"synced": true}"#).unwrap();
        assert!(checkpoint.synced);
        assert!(!checkpoint.config_saved);
        assert!(!checkpoint.round_trip_skipped());
    }
}
