//! IMAP4rev1 server
//!
//! The lifecycle of a connection:
//!
//! ```text
//!   TCP accept
//!       |
//!   "* OK [CAPABILITY ...] ready" greeting
//!       |
//!   plaintext command loop (CAPABILITY, STARTTLS, LOGIN, ...)
//!       |
//!   optional STARTTLS -> TLS handshake -> command loop continues
//!       |
//!   LOGOUT or disconnect
//! ```
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, connection dispatch, STARTTLS upgrade
//! - `session` -- per-connection state machine and command reader
//! - `handlers/` -- one module per IMAP command
//! - `sequence` -- sequence-set / UID-set parsing
//! - `tokenize` -- command-line tokenizer
//! - `io` -- shared read/write helpers

pub mod handlers;
pub mod io;
pub mod sequence;
pub mod server;
pub mod session;
pub mod tokenize;

pub use server::ImapServer;
pub use session::{ImapContext, Session};
