//! Onion request codec for the mnode storage server.
//!
//! Implements the three roles played against the layered envelope grammar
//! `size(u32 LE) || blob || json_tail`: building a nested request at the
//! originator, unwrapping one layer at a relay, and encrypting the terminal
//! response back to the originator. Also provides the bencoded payload
//! framing used for the `mn.onion_req_v2` inter-node call.

mod build;
mod bus;
mod control;
mod frame;
mod unwrap;

pub use build::{build_onion_request, FinalHopKey, PathHop};
pub use bus::{decode_onion_data, encode_onion_data};
pub use control::{parse_control, parse_entry, EntryControl, OnionControl, Protocol};
pub use frame::{encode_frame, parse_frame};
pub use unwrap::{
    encrypt_response, parse_entry_request, process_layer, OnionAction, OnionRequestMetadata,
    HOP_LIMIT,
};

pub use mnode_crypto::EncryptType;
pub use mnode_types::OnionError;
