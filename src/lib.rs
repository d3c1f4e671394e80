#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Self-hosted mail server pair
//!
//! An SMTP submission endpoint that accepts authenticated outgoing mail
//! and deposits it into on-disk per-user mailboxes, and an IMAP4rev1
//! server that exposes those mailboxes to standard mail clients.
//!
//! Both servers share one [`store::Store`]: a Maildir tree per user plus
//! a per-user JSON registry that keeps IMAP UIDs stable across restarts.
//!
//! ## Module layout
//!
//! - `store` -- Maildir filesystem adapter, UID registry, folder wrapper
//! - `fetch` -- FETCH data-item parsing and response formatting
//! - `imap` -- session state machine, per-command handlers, listener
//! - `smtp` -- submission endpoint writing through the same store
//! - `auth` -- credential oracle trait plus the flat-map backend
//! - `config` -- JSON config file with environment fallbacks

pub mod auth;
pub mod config;
mod error;
pub mod fetch;
pub mod flag;
pub mod imap;
pub mod smtp;
pub mod store;

pub use auth::{Authenticator, StaticAuthenticator};
pub use config::Config;
pub use error::{Error, Result};
pub use store::Store;
