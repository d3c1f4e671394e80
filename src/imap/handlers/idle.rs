//! IDLE command handler.
//!
//! The client enters idle, the server acknowledges with a
//! continuation, and the exchange ends when the client sends `DONE`.
//! No server-initiated notifications are pushed in between; a client
//! polls by leaving and re-entering IDLE (or issuing NOOP).

use crate::imap::io::{read_line_bounded, write_line, LineRead};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

const MAX_IDLE_LINE: usize = 1024;

/// Handle the IDLE command.
pub async fn handle<S: AsyncRead + AsyncWrite + Unpin>(tag: &str, stream: &mut BufReader<S>) {
    if write_line(stream, "+ idling\r\n").await.is_err() {
        return;
    }
    loop {
        match read_line_bounded(stream, MAX_IDLE_LINE).await {
            Ok(LineRead::Line(line)) if line.trim().eq_ignore_ascii_case("DONE") => {
                let resp = format!("{tag} OK IDLE terminated\r\n");
                let _ = write_line(stream, &resp).await;
                return;
            }
            Ok(LineRead::Line(_) | LineRead::TooLong | LineRead::BadEncoding) => {}
            Ok(LineRead::Eof) | Err(_) => return,
        }
    }
}
