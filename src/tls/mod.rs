//! TLS engine integration.
//!
//! # Data Flow
//! ```text
//! certificate + key files
//!     → credentials.rs (PEM parsing, passphrase decryption)
//!     → context.rs (ServerContext / ClientContext, one protocol version each)
//!     → tokio-rustls acceptor / connector used by net/
//! ```

pub mod context;
pub mod credentials;
mod verifier;

pub use context::{ClientContext, ClientContextBuilder, ServerContext, TlsVersion};
pub use credentials::PassphraseCallback;
