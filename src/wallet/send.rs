//! Send path: funded PSBT out to the device, signed file back to the node

use super::Utxo;
use crate::core::paths::device;
use crate::core::paths::rpc_codes;
use crate::rpc::types::{DecodedTransaction, PsbtInput};
use crate::rpc::{RpcClient, RpcError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bitcoin::Amount;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const PSBT_MAGIC: &[u8] = b"psbt\xff";
const PSBT_BASE64_MAGIC: &str = "cHNidP";

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("amount must be greater than zero")]
    ZeroAmount,
    #[error("unrecognized signed transaction format")]
    UnrecognizedFormat,
    #[error("node could not finalize the signed PSBT (missing signatures?)")]
    Incomplete,
    #[error("node returned malformed PSBT: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Rpc(RpcError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<RpcError> for SendError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Rpc { code, message } if code == rpc_codes::INVALID_ADDRESS_OR_KEY => SendError::InvalidAddress(message),
            other => SendError::Rpc(other),
        }
    }
}

/// An unsigned PSBT written for the device
#[derive(Debug, Clone)]
pub struct PreparedSend {
    pub path: PathBuf,
    pub psbt: String,
    pub fee: Amount,
    pub inputs: usize,
    pub outputs: usize,
}

impl PreparedSend {
    /// Fee as a percentage of the amount sent
    pub fn fee_percent(&self, amount: Amount) -> f64 {
        if amount == Amount::ZERO {
            return 0.0;
        }
        self.fee.to_sat() as f64 * 100.0 / amount.to_sat() as f64
    }
}

/// `<dir>/unsigned-YYYYMMDD-HHMM.psbt`
pub fn unsigned_path(dir: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M");
    dir.join(format!("{}{stamp}{}", device::UNSIGNED_PREFIX, device::PSBT_EXT))
}

/// Where the device writes its signature for `unsigned`
pub fn signed_path_for(unsigned: &Path) -> PathBuf {
    let stem = unsigned.file_stem().and_then(|s| s.to_str()).unwrap_or("unsigned");
    unsigned.with_file_name(format!("{stem}{}", device::SIGNED_SUFFIX))
}

/// Fund a PSBT paying `amount` to `to` from exactly `inputs` (or any wallet
/// coins when empty), and write it in binary form to `dir`
pub async fn prepare_psbt(
    rpc: &RpcClient,
    inputs: &[(String, u32)],
    to: &str,
    amount: Amount,
    dir: &Path,
) -> Result<PreparedSend, SendError> {
    if amount == Amount::ZERO {
        return Err(SendError::ZeroAmount);
    }
    let funded = rpc.wallet_create_funded_psbt(inputs, &[(to.to_string(), amount)]).await?;
    let decoded = rpc.decode_psbt(&funded.psbt).await?;

    let path = unsigned_path(dir);
    std::fs::write(&path, STANDARD.decode(&funded.psbt)?)?;
    info!(path = %path.display(), fee = %funded.fee, "wrote unsigned PSBT");

    Ok(PreparedSend {
        path,
        psbt: funded.psbt,
        fee: funded.fee,
        inputs: decoded.inputs.len(),
        outputs: decoded.tx.vout.len(),
    })
}

/// Coin-controlled send: `spend_from` addresses select inputs. Addresses the
/// wallet does not hold are reported and skipped.
pub async fn prepare_send(
    rpc: &RpcClient,
    to: &str,
    amount: Amount,
    spend_from: &[String],
    dir: &Path,
) -> Result<PreparedSend, SendError> {
    let mut inputs = Vec::new();
    if !spend_from.is_empty() {
        let utxos: Vec<Utxo> = rpc.list_unspent(0).await?.into_iter().filter_map(Utxo::from_entry).collect();
        for address in spend_from {
            if !utxos.iter().any(|u| &u.address == address) {
                warn!(%address, "address not in wallet; ignoring");
            }
        }
        inputs = utxos
            .into_iter()
            .filter(|u| spend_from.contains(&u.address))
            .map(|u| (u.txid, u.vout))
            .collect();
    }
    prepare_psbt(rpc, &inputs, to, amount, dir).await
}

/// Contents of a file the device wrote back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignedFile {
    /// Base64 PSBT, from either the binary or the text form
    Psbt(String),
    /// Hex transaction, already finalized by the device
    RawTx(String),
}

impl SignedFile {
    /// Classify by content; hex is only a candidate until the node decodes it
    pub fn read(content: &[u8]) -> Result<Self, SendError> {
        if content.starts_with(PSBT_MAGIC) {
            return Ok(SignedFile::Psbt(STANDARD.encode(content)));
        }
        let text = std::str::from_utf8(content).map_err(|_| SendError::UnrecognizedFormat)?.trim();
        if text.starts_with(PSBT_BASE64_MAGIC) {
            Ok(SignedFile::Psbt(text.to_string()))
        } else if !text.is_empty() && text.len() % 2 == 0 && text.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(SignedFile::RawTx(text.to_string()))
        } else {
            Err(SendError::UnrecognizedFormat)
        }
    }

    pub fn psbt(&self) -> Option<&str> {
        match self {
            SignedFile::Psbt(psbt) => Some(psbt),
            SignedFile::RawTx(_) => None,
        }
    }

    pub async fn to_tx_hex(&self, rpc: &RpcClient) -> Result<String, SendError> {
        match self {
            SignedFile::Psbt(psbt) => {
                let finalized = rpc.finalize_psbt(psbt).await?;
                match finalized.hex {
                    Some(hex) if finalized.complete => Ok(hex),
                    _ => Err(SendError::Incomplete),
                }
            }
            SignedFile::RawTx(hex) => match rpc.decode_raw_transaction(hex).await {
                Ok(decoded) if !decoded.txid.is_empty() => Ok(hex.clone()),
                Ok(_) => Err(SendError::UnrecognizedFormat),
                Err(err) if err.is_code(rpc_codes::DESERIALIZATION_ERROR) => Err(SendError::UnrecognizedFormat),
                Err(err) => Err(SendError::Rpc(err)),
            },
        }
    }
}

/// Accepts binary PSBT, base64 PSBT, or a hex transaction
pub async fn signed_file_to_tx_hex(rpc: &RpcClient, content: &[u8]) -> Result<String, SendError> {
    SignedFile::read(content)?.to_tx_hex(rpc).await
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputLine {
    pub address: Option<String>,
    /// Unknown when the PSBT omits the witness UTXO
    pub amount: Option<Amount>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub address: Option<String>,
    pub amount: Amount,
    /// Owned or watched by the node wallet
    pub ours: bool,
}

/// What a broadcast would do, for the confirmation prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSummary {
    pub txid: String,
    pub inputs: Vec<InputLine>,
    pub outputs: Vec<OutputLine>,
}

impl TxSummary {
    /// Known only when every input carries its witness UTXO
    pub fn fee(&self) -> Option<Amount> {
        if self.inputs.is_empty() {
            return None;
        }
        let spent: Amount = self.inputs.iter().map(|i| i.amount).sum::<Option<Amount>>()?;
        let created: Amount = self.outputs.iter().map(|o| o.amount).sum();
        spent.checked_sub(created)
    }
}

pub async fn describe_transaction(rpc: &RpcClient, tx_hex: &str, psbt: Option<&str>) -> Result<TxSummary, SendError> {
    let tx = rpc.decode_raw_transaction(tx_hex).await?;
    let inputs = match psbt {
        Some(psbt) => input_lines(rpc.decode_psbt(psbt).await?.inputs),
        None => Vec::new(),
    };
    let outputs = output_lines(rpc, &tx).await?;
    Ok(TxSummary { txid: tx.txid, inputs, outputs })
}

/// Summary of a PSBT as it stands; it need not be signed
pub async fn describe_psbt(rpc: &RpcClient, psbt: &str) -> Result<TxSummary, SendError> {
    let decoded = rpc.decode_psbt(psbt).await?;
    let outputs = output_lines(rpc, &decoded.tx).await?;
    let inputs = input_lines(decoded.inputs);
    Ok(TxSummary { txid: decoded.tx.txid, inputs, outputs })
}

fn input_lines(inputs: Vec<PsbtInput>) -> Vec<InputLine> {
    inputs
        .into_iter()
        .map(|input| match input.witness_utxo {
            Some(utxo) => InputLine { address: utxo.script_pub_key.address().map(str::to_string), amount: Some(utxo.amount) },
            None => InputLine { address: None, amount: None },
        })
        .collect()
}

async fn output_lines(rpc: &RpcClient, tx: &DecodedTransaction) -> Result<Vec<OutputLine>, SendError> {
    let mut outputs = Vec::with_capacity(tx.vout.len());
    for out in &tx.vout {
        let address = out.script_pub_key.address().map(str::to_string);
        let ours = match &address {
            Some(address) => {
                let info = rpc.get_address_info(address).await?;
                info.is_mine || info.is_watch_only
            }
            None => false,
        };
        outputs.push(OutputLine { address, amount: out.value, ours });
    }
    Ok(outputs)
}
