//! In-repo collaborator implementations.
//!
//! Only the seams that are genuinely core-adjacent are implemented here:
//! the outbound HTTP client behind proxy controls and the in-memory swarm
//! directory snapshot the master-node service keeps updated. The HTTPS
//! front-end, message-bus server, and storage RPC layer are separate
//! subsystems that attach through the traits in [`crate::node`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use mnode_types::{Ed25519Pubkey, NodeRecord};

use crate::node::{BusTransport, ProxyClient, RequestHandler, Response, SwarmDirectory};

/// Outbound HTTP(S) client used for proxy controls.
pub struct HttpProxyClient {
    client: reqwest::Client,
}

impl HttpProxyClient {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProxyClient for HttpProxyClient {
    async fn post(&self, url: &str, body: Vec<u8>) -> anyhow::Result<Response> {
        let reply = self.client.post(url).body(body).send().await?;
        let status = reply.status().as_u16();
        let body = reply.bytes().await?.to_vec();
        Ok(Response { status, body })
    }
}

/// In-memory swarm directory, replaced wholesale whenever the master-node
/// service learns a new swarm state.
#[derive(Default)]
pub struct SwarmMap {
    nodes: RwLock<HashMap<Ed25519Pubkey, NodeRecord>>,
}

impl SwarmMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the directory with a fresh snapshot.
    pub fn update(&self, records: Vec<NodeRecord>) {
        let mut nodes = self.nodes.write();
        nodes.clear();
        for record in records {
            nodes.insert(record.pubkey_ed25519, record);
        }
    }

    pub fn insert(&self, record: NodeRecord) {
        self.nodes.write().insert(record.pubkey_ed25519, record);
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl SwarmDirectory for SwarmMap {
    fn find_node(&self, ed25519: &Ed25519Pubkey) -> Option<NodeRecord> {
        self.nodes.read().get(ed25519).cloned()
    }
}

/// Stand-in for a message-bus subsystem that has not attached yet. Every
/// send reports the bus as unavailable, which the dispatcher surfaces as a
/// 502.
pub struct UnattachedBus;

#[async_trait]
impl BusTransport for UnattachedBus {
    async fn send_onion_request(
        &self,
        _node: &NodeRecord,
        _data: Vec<u8>,
    ) -> anyhow::Result<Response> {
        anyhow::bail!("message-bus transport not attached")
    }

    fn stop(&self) {}
}

/// Stand-in for a storage RPC layer that has not attached yet.
pub struct UnattachedHandler;

#[async_trait]
impl RequestHandler for UnattachedHandler {
    async fn handle(&self, _request: serde_json::Value) -> anyhow::Result<Response> {
        anyhow::bail!("storage RPC layer not attached")
    }
}
