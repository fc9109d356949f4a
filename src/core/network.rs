//! Bitcoin network selection shared by the RPC client, wallets and config

use crate::core::paths::node as paths;
use crate::keys::KeyNetwork;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network { #[default] Bitcoin, Testnet, Signet, Regtest }

impl Network {
    /// Discovery order when nothing pins the network
    pub const ALL: [Network; 4] = [Network::Bitcoin, Network::Testnet, Network::Signet, Network::Regtest];

    pub fn as_str(&self) -> &'static str {
        match self { Network::Bitcoin => "bitcoin", Network::Testnet => "testnet", Network::Signet => "signet", Network::Regtest => "regtest" }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bitcoin" | "mainnet" | "main" => Some(Network::Bitcoin),
            "testnet" | "testnet3" | "test" => Some(Network::Testnet),
            "signet" => Some(Network::Signet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }

    /// Map the `chain` field of `getblockchaininfo`
    pub fn from_chain(chain: &str) -> Option<Self> { Self::from_str(chain) }

    pub fn default_rpc_port(&self) -> u16 {
        match self { Network::Bitcoin => paths::PORT_MAINNET, Network::Testnet => paths::PORT_TESTNET, Network::Signet => paths::PORT_SIGNET, Network::Regtest => paths::PORT_REGTEST }
    }

    pub fn from_port(port: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.default_rpc_port() == port)
    }

    /// Subdirectory of the node's datadir holding this network's cookie
    pub fn datadir_subdir(&self) -> Option<&'static str> {
        match self { Network::Bitcoin => None, Network::Testnet => Some("testnet3"), Network::Signet => Some("signet"), Network::Regtest => Some("regtest") }
    }

    /// Extended keys only distinguish mainnet from everything else
    pub fn key_network(&self) -> KeyNetwork {
        match self { Network::Bitcoin => KeyNetwork::Mainnet, _ => KeyNetwork::Testnet }
    }
}
