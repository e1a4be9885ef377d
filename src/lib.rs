//! Core of the mnode storage server daemon.
//!
//! This crate hosts the dispatcher boundary between the onion request
//! codec and the surrounding subsystems, plus the in-repo collaborator
//! implementations. The daemon binary in `main.rs` wires it together.

pub mod collab;
pub mod node;

pub use collab::{HttpProxyClient, SwarmMap};
pub use node::{
    BusTransport, Collaborators, HttpsListener, MasterNodeService, Node, ProxyClient,
    RequestHandler, Response, SwarmDirectory,
};

// Re-export the building blocks for embedders.
pub use mnode_crypto::{ChannelEncryption, EncryptType};
pub use mnode_onion as onion;
pub use mnode_ratelimit::{RateLimitKey, RateLimiter};
pub use mnode_types as types;

/// Storage server version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
