//! One RPC client per (node URL, wallet), shared by the session

use crate::core::paths::rpc_codes;
use crate::rpc::{ConnectOptions, RpcClient, RpcError, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

type CacheKey = (Option<String>, Option<String>);

/// Clients are built under the lock: building a wallet-scoped client issues
/// `loadwallet`, which must not run twice concurrently for the same wallet.
#[derive(Clone)]
pub struct RpcCache {
    transport: Arc<dyn Transport>,
    base: ConnectOptions,
    clients: Arc<Mutex<HashMap<CacheKey, Arc<RpcClient>>>>,
}

impl std::fmt::Debug for RpcCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcCache").field("base", &self.base).finish_non_exhaustive()
    }
}

impl RpcCache {
    pub fn new(transport: Arc<dyn Transport>, base: ConnectOptions) -> Self {
        Self { transport, base, clients: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn transport(&self) -> Arc<dyn Transport> { Arc::clone(&self.transport) }
    pub fn options(&self) -> &ConnectOptions { &self.base }

    /// Client for `url` (or the default endpoint) scoped to `wallet`
    pub async fn get(&self, url: Option<&str>, wallet: Option<&str>) -> Result<Arc<RpcClient>, RpcError> {
        let key = (url.map(str::to_string), wallet.map(str::to_string));
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&key) {
            return Ok(Arc::clone(client));
        }

        let mut opts = self.base.clone();
        if let Some(url) = url {
            opts.url = Some(url.to_string());
        }
        opts.wallet = None;
        let node = RpcClient::connect(&opts, Arc::clone(&self.transport))?;

        let client = match wallet {
            Some(name) => {
                load_wallet(&node, name).await?;
                node.for_wallet(name)
            }
            None => node,
        };
        debug!(url = %client.display_url(), "cached rpc client");

        let client = Arc::new(client);
        clients.insert(key, Arc::clone(&client));
        Ok(client)
    }

    pub async fn len(&self) -> usize { self.clients.lock().await.len() }
}

/// `loadwallet`, treating "already loaded" as success
pub async fn load_wallet(node: &RpcClient, name: &str) -> Result<(), RpcError> {
    match node.load_wallet(name).await {
        Ok(_) => {
            info!(wallet = name, "loaded wallet");
            Ok(())
        }
        Err(err) if is_already_loaded(&err) => {
            debug!(wallet = name, "wallet already loaded");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

fn is_already_loaded(err: &RpcError) -> bool {
    match err {
        RpcError::Rpc { code, .. } if *code == rpc_codes::WALLET_ALREADY_LOADED => true,
        RpcError::Rpc { code, message } if *code == rpc_codes::WALLET_ERROR => message.contains("already loaded"),
        _ => false,
    }
}
