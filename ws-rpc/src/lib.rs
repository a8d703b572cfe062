//! Process-boundary plumbing shared by the server and plugin binaries.
//!
//! The server spawns a plugin, reads its [`HandshakeLine`], opens a
//! [`Connection`] to the announced address and exchanges newline-delimited
//! JSON frames with the plugin's [`serve`] loop.

pub mod connection;
pub mod error;
pub mod handshake;
pub mod server;

pub use connection::{Connection, Outcome, RequestFrame, ResponseFrame};
pub use error::{Error, ErrorKind, Result};
pub use handshake::{
    HandshakeConfig, HandshakeError, HandshakeLine, Network, CORE_PROTOCOL_VERSION, PROTOCOL_NAME,
};
pub use server::{serve, serve_connection, serve_on, Dispatch, ServeError};
