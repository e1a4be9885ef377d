//! The dispatcher boundary of the storage server.
//!
//! [`Node`] receives onion request frames from the HTTPS front-end and
//! decoded `mn.onion_req_v2` payloads from the message bus, unwraps one
//! layer, and routes the result to the local request handler, an outbound
//! HTTP proxy, or the next relay. The front-end, bus, storage RPC layer,
//! and swarm tracker are external subsystems reached through the narrow
//! traits defined here.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use mnode_crypto::ChannelEncryption;
use mnode_onion::{
    decode_onion_data, encode_onion_data, encrypt_response, parse_entry_request, process_layer,
    OnionAction, OnionRequestMetadata,
};
use mnode_ratelimit::RateLimiter;
use mnode_types::{Ed25519Pubkey, LegacyPubkey, NodeRecord, OnionError, X25519Seckey};

use crate::VERSION;

/// A status-and-body reply, the shape shared by the HTTPS layer and the
/// `[body]` / `[code, body]` bus reply convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn ok(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }

    fn from_error(err: &OnionError) -> Self {
        Self {
            status: err.status_code(),
            body: err.to_string().into_bytes(),
        }
    }
}

/// Read access to the swarm membership the master-node service maintains.
pub trait SwarmDirectory: Send + Sync {
    /// Look up a peer by its Ed25519 identity key.
    fn find_node(&self, ed25519: &Ed25519Pubkey) -> Option<NodeRecord>;
}

/// The inter-node message-bus transport.
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Send an `mn.onion_req_v2` payload to a peer and await its reply.
    async fn send_onion_request(&self, node: &NodeRecord, data: Vec<u8>)
        -> anyhow::Result<Response>;

    /// Stop accepting and sending bus traffic.
    fn stop(&self);
}

/// The local storage RPC layer a terminal request is handed to.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: serde_json::Value) -> anyhow::Result<Response>;
}

/// Outbound HTTP(S) client for proxy controls.
#[async_trait]
pub trait ProxyClient: Send + Sync {
    async fn post(&self, url: &str, body: Vec<u8>) -> anyhow::Result<Response>;
}

/// The HTTPS front-end; drained first on shutdown.
pub trait HttpsListener: Send + Sync {
    fn stop(&self);
}

/// The master-node subsystem (registration, swarm tracking); drained after
/// the HTTPS listener and before the bus.
pub trait MasterNodeService: Send + Sync {
    fn stop(&self);
}

/// The collaborator seams a [`Node`] dispatches through.
pub struct Collaborators {
    pub swarm: Arc<dyn SwarmDirectory>,
    pub bus: Arc<dyn BusTransport>,
    pub handler: Arc<dyn RequestHandler>,
    pub proxy: Arc<dyn ProxyClient>,
}

/// The storage server core: identity, channel encryption, admission
/// control, and the onion dispatch logic.
pub struct Node {
    record: NodeRecord,
    channel: ChannelEncryption,
    rate_limiter: RateLimiter,
    collab: Collaborators,
    shutting_down: AtomicBool,
}

impl Node {
    pub fn new(record: NodeRecord, x25519_seckey: X25519Seckey, collab: Collaborators) -> Self {
        let channel = ChannelEncryption::new(x25519_seckey, record.pubkey_x25519, true);
        Self {
            record,
            channel,
            rate_limiter: RateLimiter::new(),
            collab,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// This node's identity record.
    pub fn record(&self) -> &NodeRecord {
        &self.record
    }

    /// One-line summary for the startup and hourly status logs.
    pub fn status_line(&self) -> String {
        format!(
            "mnode-storage v{}; listening on :{} (https) / :{} (bus); {}",
            VERSION,
            self.record.https_port,
            self.record.bus_port,
            self.record.pubkey_ed25519.mnode_address(),
        )
    }

    /// Flag the node as draining; requests from here on are refused with
    /// a 503.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Stop the message-bus transport; the final step of the drain order.
    pub fn stop_bus(&self) {
        self.collab.bus.stop();
    }

    /// Entry point for a `POST /onion_req/v2` frame from the HTTPS
    /// front-end. A throttled client gets a bare 429.
    pub async fn handle_onion_request(&self, frame: &[u8], source: Ipv4Addr) -> Response {
        if self
            .rate_limiter
            .should_rate_limit_client(u32::from(source), Instant::now())
        {
            tracing::debug!(%source, "Rate limiting client onion request");
            return Response {
                status: 429,
                body: Vec::new(),
            };
        }
        match parse_entry_request(frame) {
            Ok((blob, meta)) => self.process(&blob, meta).await,
            Err(err) => Response::from_error(&err),
        }
    }

    /// Entry point for an `mn.onion_req_v2` bus request from a peer.
    pub async fn handle_bus_onion_request(&self, data: &[u8], peer: &LegacyPubkey) -> Response {
        if self.rate_limiter.should_rate_limit(peer, Instant::now()) {
            tracing::debug!(%peer, "Rate limiting peer onion request");
            return Response {
                status: 429,
                body: Vec::new(),
            };
        }
        match decode_onion_data(data) {
            Ok((blob, meta)) => self.process(&blob, meta).await,
            Err(err) => Response::from_error(&err),
        }
    }

    /// Unwrap one layer and execute whatever it asks for. The reply body
    /// for a relayed request is passed back verbatim; terminal and proxy
    /// bodies are encrypted here, once, to the layer's ephemeral key.
    async fn process(&self, blob: &[u8], meta: OnionRequestMetadata) -> Response {
        if self.is_shutting_down() {
            return Response::from_error(&OnionError::Shutdown);
        }

        let action = match process_layer(&self.channel, blob, &meta) {
            Ok(action) => action,
            Err(err) => {
                tracing::debug!(error = %err, hop_no = meta.hop_no, "Refusing onion layer");
                return Response::from_error(&err);
            }
        };

        match action {
            OnionAction::Forward {
                destination,
                payload,
                next,
            } => {
                let Some(node) = self.collab.swarm.find_node(&destination) else {
                    tracing::debug!(destination = %destination, "Onion forward to unknown peer");
                    return Response::from_error(&OnionError::UnknownPeer);
                };
                let data = encode_onion_data(&payload, &next);
                match self.collab.bus.send_onion_request(&node, data).await {
                    Ok(reply) => reply,
                    Err(err) => {
                        tracing::warn!(destination = %destination, error = %err,
                            "Failed to relay onion request");
                        Response {
                            status: 502,
                            body: b"failed to relay request to the next hop".to_vec(),
                        }
                    }
                }
            }

            OnionAction::Terminal { body } => {
                let Ok(request) = serde_json::from_slice::<serde_json::Value>(&body) else {
                    return Response::from_error(&OnionError::Malformed);
                };
                // The request may ask for a binary (non-base64) response.
                let base64 = request
                    .get("base64")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(true);
                match self.collab.handler.handle(request).await {
                    Ok(reply) if reply.status == 200 => self.encrypt_reply(&meta, &reply.body, base64),
                    Ok(reply) => reply,
                    Err(err) => {
                        tracing::warn!(error = %err, "Local onion request failed");
                        Response {
                            status: 500,
                            body: b"request handler failure".to_vec(),
                        }
                    }
                }
            }

            OnionAction::Proxy {
                host,
                target,
                port,
                protocol,
                body,
            } => {
                let url = format!("{protocol}://{host}:{port}{target}");
                match self.collab.proxy.post(&url, body).await {
                    Ok(reply) => self.encrypt_reply(&meta, &reply.body, false),
                    Err(err) => {
                        tracing::warn!(url = %url, error = %err, "Onion proxy request failed");
                        Response {
                            status: 502,
                            body: b"proxy request failed".to_vec(),
                        }
                    }
                }
            }
        }
    }

    fn encrypt_reply(&self, meta: &OnionRequestMetadata, body: &[u8], base64: bool) -> Response {
        match encrypt_response(&self.channel, meta, body, base64) {
            Ok(encrypted) => Response::ok(encrypted),
            Err(err) => {
                tracing::error!(error = %err, "Failed to encrypt onion response");
                Response {
                    status: 500,
                    body: b"failed to encrypt response".to_vec(),
                }
            }
        }
    }
}
