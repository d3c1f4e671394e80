//! SMTP submission endpoint
//!
//! Accepts authenticated outgoing mail from local users and writes it
//! into the same UID-stable store the IMAP server reads: one copy into
//! the sender's `Sent` folder, one into each local recipient's INBOX,
//! both through [`crate::store::Folder::save`] so UID assignment is
//! shared with every other writer.
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, connection dispatch, STARTTLS upgrade
//! - `session` -- per-connection command loop (EHLO, AUTH, MAIL,
//!   RCPT, DATA, ...)
//! - `delivery` -- header fill-in and store writes

pub mod server;
pub mod session;

mod delivery;

pub use server::SmtpServer;
pub use session::SmtpContext;
