//! Typed wrappers for the node methods the workflow uses. Anything else goes
//! through `RpcClient::call`.

use super::types::*;
use super::{RpcClient, RpcError};
use crate::wallet::ImportRequest;
use bitcoin::Amount;
use serde_json::{json, Value};

impl RpcClient {
    pub async fn help(&self) -> Result<String, RpcError> {
        self.call_as("help", vec![]).await
    }

    pub async fn get_blockchain_info(&self) -> Result<BlockchainInfo, RpcError> {
        self.call_as("getblockchaininfo", vec![]).await
    }

    pub async fn get_network_info(&self) -> Result<NetworkInfo, RpcError> {
        self.call_as("getnetworkinfo", vec![]).await
    }

    pub async fn get_descriptor_info(&self, descriptor: &str) -> Result<DescriptorInfo, RpcError> {
        self.call_as("getdescriptorinfo", vec![json!(descriptor)]).await
    }

    pub async fn create_wallet(&self, name: &str, disable_private_keys: bool) -> Result<Value, RpcError> {
        self.call("createwallet", vec![json!(name), json!(disable_private_keys)]).await
    }

    pub async fn load_wallet(&self, name: &str) -> Result<Value, RpcError> {
        self.call("loadwallet", vec![json!(name)]).await
    }

    pub async fn import_multi(&self, requests: &[ImportRequest]) -> Result<Vec<ImportResult>, RpcError> {
        let requests = serde_json::to_value(requests)
            .map_err(|e| RpcError::UnexpectedResult { method: "importmulti".into(), detail: e.to_string() })?;
        self.call_as("importmulti", vec![requests, json!({ "rescan": false })]).await
    }

    /// Blocks for the whole scan; use a client without timeout
    pub async fn scan_tx_out_set(&self, descriptors: &[String]) -> Result<ScanResult, RpcError> {
        self.call_as("scantxoutset", vec![json!("start"), json!(descriptors)]).await
    }

    pub async fn rescan_blockchain(&self, start_height: u64) -> Result<Value, RpcError> {
        self.call("rescanblockchain", vec![json!(start_height)]).await
    }

    pub async fn get_wallet_info(&self) -> Result<WalletInfo, RpcError> {
        self.call_as("getwalletinfo", vec![]).await
    }

    pub async fn get_new_address(&self) -> Result<String, RpcError> {
        self.call_as("getnewaddress", vec![]).await
    }

    pub async fn list_unspent(&self, min_confirmations: u32) -> Result<Vec<UnspentEntry>, RpcError> {
        self.call_as("listunspent", vec![json!(min_confirmations)]).await
    }

    /// Fund a PSBT paying `outputs`, considering watch-only coins and
    /// including BIP32 derivations so the signer can recognize its inputs
    pub async fn wallet_create_funded_psbt(
        &self,
        inputs: &[(String, u32)],
        outputs: &[(String, Amount)],
    ) -> Result<FundedPsbt, RpcError> {
        let inputs: Vec<Value> = inputs.iter().map(|(txid, vout)| json!({ "txid": txid, "vout": vout })).collect();
        let outputs: Vec<Value> = outputs
            .iter()
            .map(|(address, amount)| {
                let mut output = serde_json::Map::new();
                output.insert(address.clone(), json!(format_btc(*amount)));
                Value::Object(output)
            })
            .collect();
        self.call_as(
            "walletcreatefundedpsbt",
            vec![json!(inputs), json!(outputs), json!(0), json!({ "includeWatching": true }), json!(true)],
        )
        .await
    }

    pub async fn decode_psbt(&self, psbt_base64: &str) -> Result<DecodedPsbt, RpcError> {
        self.call_as("decodepsbt", vec![json!(psbt_base64)]).await
    }

    pub async fn finalize_psbt(&self, psbt_base64: &str) -> Result<FinalizedPsbt, RpcError> {
        self.call_as("finalizepsbt", vec![json!(psbt_base64)]).await
    }

    pub async fn decode_raw_transaction(&self, tx_hex: &str) -> Result<DecodedTransaction, RpcError> {
        self.call_as("decoderawtransaction", vec![json!(tx_hex)]).await
    }

    /// Returns the txid
    pub async fn send_raw_transaction(&self, tx_hex: &str) -> Result<String, RpcError> {
        self.call_as("sendrawtransaction", vec![json!(tx_hex)]).await
    }

    pub async fn get_address_info(&self, address: &str) -> Result<AddressInfo, RpcError> {
        self.call_as("getaddressinfo", vec![json!(address)]).await
    }

    pub async fn get_best_block_hash(&self) -> Result<String, RpcError> {
        self.call_as("getbestblockhash", vec![]).await
    }

    pub async fn get_block_stats(&self, hash: &str) -> Result<BlockStats, RpcError> {
        self.call_as("getblockstats", vec![json!(hash)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::mock::MockNode;
    use super::super::{Credentials, Endpoint, RetryPolicy};
    use super::*;
    use crate::core::network::Network;
    use std::time::Duration;

    fn client(node: &std::sync::Arc<MockNode>) -> RpcClient {
        let endpoint = Endpoint { url: "http://h:8332".into(), network: Network::Bitcoin, credentials: Credentials::new("u", "p") };
        RpcClient::new(endpoint, node.clone()).with_retry(RetryPolicy::new(1, Duration::ZERO))
    }

    #[tokio::test]
    async fn test_funded_psbt_params() {
        let node = MockNode::new();
        let reply: Value = serde_json::from_str(r#"{"psbt": "cHNidP8=", "fee": 0.00000141, "changepos": -1}"#).unwrap();
        node.respond("walletcreatefundedpsbt", reply);
        let funded = client(&node)
            .wallet_create_funded_psbt(&[("ab".repeat(32), 1)], &[("bc1qdest".into(), Amount::from_sat(90_000))])
            .await
            .unwrap();
        assert_eq!(funded.fee, Amount::from_sat(141));

        let params = &node.calls_to("walletcreatefundedpsbt")[0].params;
        assert_eq!(params[0][0]["vout"], json!(1));
        let sent = params[1][0]["bc1qdest"].as_str().unwrap();
        assert_eq!(parse_btc(sent).unwrap(), Amount::from_sat(90_000));
        assert_eq!(params[3], json!({"includeWatching": true}));
        assert_eq!(params[4], json!(true));
    }

    #[tokio::test]
    async fn test_unexpected_shape_is_reported() {
        let node = MockNode::new();
        node.respond("getbestblockhash", json!(12));
        let err = client(&node).get_best_block_hash().await.unwrap_err();
        assert!(matches!(err, RpcError::UnexpectedResult { ref method, .. } if method == "getbestblockhash"));
    }
}
