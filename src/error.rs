//! Error types for selfmail

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("email parsing error: {0}")]
    Mail(#[from] mailparse::MailParseError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// A message file disappeared between enumeration and access.
    /// Another client deleted it; callers skip the message.
    #[error("message vanished: {0}")]
    MessageGone(String),

    #[error("mailbox does not exist: {0}")]
    MailboxMissing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),
}

pub type Result<T> = std::result::Result<T, Error>;
