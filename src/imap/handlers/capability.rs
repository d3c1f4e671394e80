//! CAPABILITY command handler.
//!
//! Returns the capability list. STARTTLS appears only while the
//! session can still use it (a TLS acceptor is configured and the
//! transport is not yet upgraded).

use crate::imap::io::write_line;
use crate::imap::session::Session;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the CAPABILITY command.
pub async fn handle<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    session: &Session,
    stream: &mut BufReader<S>,
) {
    let line = format!("* CAPABILITY {}\r\n", session.capability_list());
    if write_line(stream, &line).await.is_err() {
        return;
    }
    let resp = format!("{tag} OK CAPABILITY completed\r\n");
    let _ = write_line(stream, &resp).await;
}
