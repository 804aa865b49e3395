//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound:
//!     guard.rs (socket acquired, released on any failure)
//!     → connector.rs (bind?, connect, client handshake)
//!     → channel.rs (input/output pair)
//!
//! Inbound:
//!     listener.rs (credentials, bind, listen)
//!     → listener.rs accept (TCP accept, server handshake)
//!     → channel.rs (input/output pair)
//!     → server/ dispatcher
//!
//! Socket states:
//!     Opened → Connected/Accepted → Handshaken (ChannelPair) → Closed
//!              any failure ───────────────────────────────────→ Closed
//! ```
//!
//! # Design Decisions
//! - A raw socket is always owned by exactly one of: a guard, a pending
//!   handshake, or a channel pair
//! - Each connection tracked for graceful drain

pub mod channel;
pub mod connection;
pub mod connector;
pub mod guard;
pub mod listener;

pub use channel::{ChannelPair, CloseStream, EncryptedSocket, InputStream, OutputStream, CLOSE_GRACE};
pub use connector::{connect, Connector};
pub use listener::{listen, ListenOptions, Listener, DEFAULT_BACKLOG};
