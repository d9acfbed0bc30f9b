//! The Protocol Engine (§4.5): per-connection handshake, auth, and
//! binary-protocol dispatch wired on top of `registry`, `view`, and
//! `executor`.

pub mod auth;
pub mod handshake;
pub mod messages;
pub mod session;

pub use auth::{AuthMethod, AuthRequest, Trust};
pub use handshake::{Negotiated, ProtocolRange, ProtocolVersion};
pub use session::ProtocolEngine;
