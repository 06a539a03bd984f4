//! JSON-RPC client for the upstream node.
//!
//! Speaks the bitcoind-style interface (`getblockhash`, `getblock` with
//! verbosity 2, `getnetworkinfo`, `getnetworkhashps`) and converts blocks into
//! the indexer's [`RawBlock`] form.

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use exploder_core::address::Address;
use exploder_core::constants::COIN;
use exploder_core::error::{ExplorerError, ValidationError};
use exploder_core::types::{Hash256, RawBlock, RawTransaction, TxInput, TxOutput};
use exploder_index::source::{ChainSource, NodeInfo};

use crate::config::RpcConfig;
use crate::upstream::HashrateSource;

pub struct RpcClient {
    client: Client,
    endpoint: String,
    user: Option<String>,
    password: Option<String>,
}

impl RpcClient {
    pub fn new(config: &RpcConfig) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(config.timeout).build()?,
            endpoint: config.endpoint.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_ref());
        }
        let resp: Value = request.send().await?.json().await?;

        if let Some(err) = resp.get("error") {
            if !err.is_null() {
                bail!("RPC error from {method}: {err}");
            }
        }
        Ok(serde_json::from_value(resp["result"].clone())?)
    }

    // ── Convenience wrappers ──────────────────────────────────────────────────

    pub async fn get_block_count(&self) -> Result<u64> {
        self.call("getblockcount", json!([])).await
    }

    pub async fn get_block_hash(&self, height: u64) -> Result<String> {
        self.call("getblockhash", json!([height])).await
    }

    async fn get_block(&self, hash: &str) -> Result<RpcBlock> {
        self.call("getblock", json!([hash, 2])).await
    }

    async fn get_network_info(&self) -> Result<RpcNetworkInfo> {
        self.call("getnetworkinfo", json!([])).await
    }

    async fn get_blockchain_info(&self) -> Result<RpcChainInfo> {
        self.call("getblockchaininfo", json!([])).await
    }

    pub async fn get_network_hashps(&self, window: u64, height: u64) -> Result<f64> {
        self.call("getnetworkhashps", json!([window, height])).await
    }
}

fn upstream(e: anyhow::Error) -> ExplorerError {
    ExplorerError::Upstream(format!("{e:#}"))
}

#[async_trait]
impl ChainSource for RpcClient {
    async fn best_height(&self) -> Result<u64, ExplorerError> {
        self.get_block_count().await.map_err(upstream)
    }

    async fn block_at(&self, height: u64) -> Result<RawBlock, ExplorerError> {
        let hash = self.get_block_hash(height).await.map_err(upstream)?;
        let block = self.get_block(&hash).await.map_err(upstream)?;
        block.into_raw()
    }

    async fn node_info(&self) -> Result<NodeInfo, ExplorerError> {
        let (network, chain) = tokio::try_join!(self.get_network_info(), self.get_blockchain_info())
            .map_err(upstream)?;
        Ok(NodeInfo {
            version: network.version,
            subversion: network.subversion,
            protocolversion: network.protocolversion,
            connections: network.connections,
            blocks: chain.blocks,
            difficulty: chain.difficulty,
        })
    }
}

#[async_trait]
impl HashrateSource for RpcClient {
    async fn tip_height(&self) -> Result<u64, ExplorerError> {
        self.get_block_count().await.map_err(upstream)
    }

    async fn network_hashps(&self, window: u64, height: u64) -> Result<f64, ExplorerError> {
        self.get_network_hashps(window, height).await.map_err(upstream)
    }
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RpcNetworkInfo {
    version: u64,
    #[serde(default)]
    subversion: String,
    #[serde(default)]
    protocolversion: u64,
    #[serde(default)]
    connections: u64,
}

#[derive(Deserialize)]
struct RpcChainInfo {
    blocks: u64,
    #[serde(default)]
    difficulty: f64,
}

#[derive(Deserialize)]
struct RpcBlock {
    hash: String,
    height: u64,
    previousblockhash: Option<String>,
    time: u64,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    difficulty: f64,
    tx: Vec<RpcTransaction>,
}

#[derive(Deserialize)]
struct RpcTransaction {
    txid: String,
    vin: Vec<RpcInput>,
    vout: Vec<RpcOutput>,
}

#[derive(Deserialize)]
struct RpcInput {
    coinbase: Option<String>,
    txid: Option<String>,
    vout: Option<u32>,
}

#[derive(Deserialize)]
struct RpcOutput {
    value: f64,
    n: u32,
    #[serde(rename = "scriptPubKey", default)]
    script_pub_key: RpcScript,
}

#[derive(Deserialize, Default)]
struct RpcScript {
    #[serde(default)]
    addresses: Vec<String>,
    address: Option<String>,
}

impl RpcBlock {
    fn into_raw(self) -> Result<RawBlock, ExplorerError> {
        let hash = Hash256::parse(&self.hash)?;
        let previousblockhash = self.previousblockhash.as_deref().map(Hash256::parse).transpose()?;
        let tx = self
            .tx
            .into_iter()
            .map(RpcTransaction::into_raw)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RawBlock {
            hash,
            height: self.height,
            previousblockhash,
            time: self.time,
            size: self.size,
            difficulty: self.difficulty,
            tx,
        })
    }
}

impl RpcTransaction {
    fn into_raw(self) -> Result<RawTransaction, ExplorerError> {
        let txid = Hash256::parse(&self.txid)?;
        let malformed = |reason: &str| ValidationError::MalformedTransaction {
            txid: self.txid.clone(),
            reason: reason.to_string(),
        };

        let mut vin = Vec::with_capacity(self.vin.len());
        for input in &self.vin {
            let parsed = match (&input.coinbase, &input.txid, input.vout) {
                (Some(coinbase), _, _) => TxInput::Coinbase {
                    coinbase: coinbase.clone(),
                },
                (None, Some(prev), Some(vout)) => TxInput::Spend {
                    txid: Hash256::parse(prev)?,
                    vout,
                },
                _ => return Err(malformed("input is neither coinbase nor spend").into()),
            };
            vin.push(parsed);
        }

        let mut vout = Vec::with_capacity(self.vout.len());
        for output in &self.vout {
            let value = to_base_units(output.value).ok_or_else(|| malformed("invalid output value"))?;
            vout.push(TxOutput {
                value,
                n: output.n,
                addresses: output.script_pub_key.owners(),
            });
        }

        Ok(RawTransaction { txid, vin, vout })
    }
}

impl RpcScript {
    /// Older nodes report `addresses`, newer ones a single `address`.
    ///
    /// Owners that callers could not look up again are left out.
    fn owners(&self) -> Vec<Address> {
        let mut owners: Vec<Address> = Vec::new();
        for raw in self.addresses.iter().chain(self.address.as_ref()) {
            match Address::parse(raw) {
                Ok(address) if !owners.contains(&address) => owners.push(address),
                Ok(_) => {}
                Err(_) => debug!(owner = %raw, "skipping unrecognised output owner"),
            }
        }
        owners
    }
}

/// Convert a coin-denominated float into base units.
fn to_base_units(value: f64) -> Option<u64> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let units = (value * COIN as f64).round();
    if units > u64::MAX as f64 {
        return None;
    }
    Some(units as u64)
}
