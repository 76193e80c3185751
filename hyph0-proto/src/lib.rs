//! Hyphen0: a length-prefixed, packet-oriented transport with a bidirectional heartbeat
//! liveness layer, an ECDH handshake negotiating a symmetric AEAD cipher, and an
//! optional HTTP/1.1 obfuscation wrapper.
//!
//! This crate is transport only — it has no notion of a chat room or any other
//! application. See `hyph0-chat` for a thin illustration built on top of it.

pub mod cipher;
pub mod codec;
pub mod config;
pub mod crypt_socket;
pub mod error;
pub mod events;
pub mod handshake;
pub mod packet;
pub mod packets;
pub mod proto_socket;
pub mod socket;
pub mod zt;

pub use error::{Error, Result};
