//! Typed views over the node replies the workflow consumes.
//!
//! Amounts arrive as JSON numbers in BTC. With serde_json's
//! `arbitrary_precision` the literal digits survive, and are parsed straight
//! into satoshis without passing through `f64`.

use bitcoin::{Amount, Denomination};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Parse a BTC-denominated decimal string exactly
pub fn parse_btc(text: &str) -> Result<Amount, bitcoin::amount::ParseAmountError> {
    Amount::from_str_in(text, Denomination::Bitcoin)
}

/// Render an amount the way the node accepts it in `outputs`
pub fn format_btc(amount: Amount) -> String {
    amount.to_string_in(Denomination::Bitcoin)
}

pub(crate) mod btc {
    use super::*;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Amount, D::Error> {
        let number = serde_json::Number::deserialize(d)?;
        parse_btc(&number.to_string()).map_err(serde::de::Error::custom)
    }

    pub fn deserialize_option<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Amount>, D::Error> {
        match Option::<serde_json::Number>::deserialize(d)? {
            Some(number) => parse_btc(&number.to_string()).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockchainInfo {
    pub chain: String,
    pub blocks: u64,
    #[serde(default)]
    pub headers: u64,
    #[serde(rename = "verificationprogress")]
    pub verification_progress: f64,
    #[serde(rename = "initialblockdownload", default)]
    pub initial_block_download: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkInfo {
    pub version: u64,
    #[serde(default)]
    pub subversion: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DescriptorInfo {
    pub descriptor: String,
    pub checksum: String,
    #[serde(rename = "isrange", default)]
    pub is_range: bool,
    #[serde(rename = "issolvable", default)]
    pub is_solvable: bool,
    #[serde(rename = "hasprivatekeys", default)]
    pub has_private_keys: bool,
}

/// Per-request outcome of `importmulti`
#[derive(Debug, Clone, Deserialize)]
pub struct ImportResult {
    pub success: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl ImportResult {
    pub fn error_message(&self) -> String {
        match &self.error {
            Some(Value::Object(map)) => map.get("message").and_then(Value::as_str).unwrap_or("unknown error").to_string(),
            Some(other) => other.to_string(),
            None => "unknown error".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanUnspent {
    pub txid: String,
    pub vout: u32,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: String,
    #[serde(default)]
    pub desc: String,
    #[serde(with = "btc")]
    pub amount: Amount,
    pub height: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanResult {
    pub success: bool,
    #[serde(default)]
    pub unspents: Vec<ScanUnspent>,
}

impl ScanResult {
    /// Lowest block containing a found output; bounds the follow-up rescan
    pub fn earliest_height(&self) -> Option<u64> {
        self.unspents.iter().map(|u| u.height).min()
    }

    pub fn total(&self) -> Amount {
        self.unspents.iter().map(|u| u.amount).sum()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletInfo {
    #[serde(rename = "walletname")]
    pub wallet_name: String,
    #[serde(default)]
    pub txcount: u64,
    /// `false`, or `{duration, progress}` while a rescan runs
    #[serde(default)]
    pub scanning: Value,
}

impl WalletInfo {
    pub fn scan_progress(&self) -> Option<f64> {
        self.scanning.get("progress").and_then(Value::as_f64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnspentEntry {
    pub txid: String,
    pub vout: u32,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(with = "btc")]
    pub amount: Amount,
    pub confirmations: u64,
    #[serde(default)]
    pub spendable: bool,
    #[serde(default)]
    pub solvable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FundedPsbt {
    pub psbt: String,
    #[serde(with = "btc")]
    pub fee: Amount,
    #[serde(rename = "changepos")]
    pub change_position: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FinalizedPsbt {
    #[serde(default)]
    pub psbt: Option<String>,
    #[serde(default)]
    pub hex: Option<String>,
    pub complete: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptPubKey {
    #[serde(default)]
    pub address: Option<String>,
    /// Pre-22 nodes list addresses instead
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl ScriptPubKey {
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref().or_else(|| self.addresses.first().map(String::as_str))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxInput {
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxOutput {
    #[serde(with = "btc")]
    pub value: Amount,
    pub n: u32,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: ScriptPubKey,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecodedTransaction {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<TxInput>,
    #[serde(default)]
    pub vout: Vec<TxOutput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WitnessUtxo {
    #[serde(with = "btc")]
    pub amount: Amount,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: ScriptPubKey,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PsbtInput {
    #[serde(default)]
    pub witness_utxo: Option<WitnessUtxo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecodedPsbt {
    pub tx: DecodedTransaction,
    #[serde(default)]
    pub inputs: Vec<PsbtInput>,
    #[serde(default, deserialize_with = "btc::deserialize_option")]
    pub fee: Option<Amount>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddressInfo {
    pub address: String,
    #[serde(rename = "ismine", default)]
    pub is_mine: bool,
    #[serde(rename = "iswatchonly", default)]
    pub is_watch_only: bool,
    #[serde(rename = "hdkeypath", default)]
    pub hd_key_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockStats {
    pub height: u64,
    #[serde(rename = "blockhash", default)]
    pub block_hash: String,
    /// Satoshis
    pub subsidy: u64,
    pub txs: u64,
    /// 10th/25th/50th/75th/90th percentiles, sat/vB
    #[serde(default)]
    pub feerate_percentiles: Vec<u64>,
    #[serde(default)]
    pub time: u64,
}

impl BlockStats {
    pub fn median_fee_rate(&self) -> Option<u64> {
        self.feerate_percentiles.get(2).copied()
    }
}
