//! IMAP command handlers
//!
//! One module per command (or command family). Handlers receive the
//! client tag, their parsed arguments, and the buffered stream; they
//! write their untagged responses followed by the tagged completion
//! directly, so within a command the ordering is always data first,
//! completion last.

pub mod auth;
pub mod capability;
pub mod create;
pub mod expunge;
pub mod fetch;
pub mod idle;
pub mod list;
pub mod search;
pub mod select;
pub mod status;
pub mod store;
