//! Per-connection IMAP session
//!
//! Each TCP connection runs one session task. The session owns a
//! buffered reader over the (possibly TLS-wrapped) stream and
//! processes commands strictly in order:
//!
//! ```text
//!   Unauthenticated --LOGIN/AUTHENTICATE--> Authenticated
//!   Authenticated   --SELECT/EXAMINE-----> Selected
//!   any state       --LOGOUT-------------> closed
//! ```
//!
//! STARTTLS promotes the transport without changing the IMAP state;
//! the caller swaps the stream and re-enters [`run_session`].
//!
//! The reader is line-oriented with a 64 KiB ceiling. LITERAL+
//! argument literals (`{n}` / `{n+}`) are consumed inline, so clients
//! may send mailbox names and credentials as counted bytes.

use super::handlers;
use super::io::{read_line_bounded, write_line, LineRead};
use super::tokenize::tokenize;
use crate::auth::Authenticator;
use crate::store::Store;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tracing::debug;

/// Longest accepted command line, literals included.
const MAX_LINE: usize = 64 * 1024;

/// Server-wide context shared by every IMAP session.
pub struct ImapContext {
    pub store: Store,
    pub auth: Arc<dyn Authenticator>,
    pub host_name: String,
}

/// The folder a session has opened.
#[derive(Debug, Clone)]
pub struct Selected {
    pub folder: String,
    /// Set by EXAMINE; refuses STORE and implicit `\Seen` updates.
    pub read_only: bool,
}

/// Mutable per-connection state.
pub struct Session {
    pub user: Option<String>,
    pub selected: Option<Selected>,
    pub tls_available: bool,
    pub tls_active: bool,
}

impl Session {
    #[must_use]
    pub const fn new(tls_available: bool) -> Self {
        Self {
            user: None,
            selected: None,
            tls_available,
            tls_active: false,
        }
    }

    /// The capability list as currently advertisable: STARTTLS is
    /// offered only while it is still possible.
    #[must_use]
    pub fn capability_list(&self) -> String {
        let mut capabilities = String::from("IMAP4rev1 LITERAL+ IDLE AUTH=PLAIN");
        if self.tls_available && !self.tls_active {
            capabilities.push_str(" STARTTLS");
        }
        capabilities
    }
}

/// Why [`run_session`] returned.
pub(crate) enum SessionEnd {
    Closed,
    /// Tagged OK was already written; the caller performs the TLS
    /// handshake and re-enters with the wrapped stream.
    StartTls,
}

/// `{n}` / `{n+}` at the end of a line: `(text before, n, synchronizing)`.
fn literal_suffix(line: &str) -> Option<(&str, usize, bool)> {
    let rest = line.strip_suffix('}')?;
    let open = rest.rfind('{')?;
    let mut digits = &rest[open + 1..];
    let synchronizing = if let Some(stripped) = digits.strip_suffix('+') {
        digits = stripped;
        false
    } else {
        true
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let len: usize = digits.parse().ok()?;
    Some((&line[..open], len, synchronizing))
}

enum CommandInput {
    Tokens(Vec<String>),
    TooLong,
    BadEncoding,
    BadSyntax(String),
    Eof,
}

/// Read one complete command: a line plus any argument literals it
/// announces. Literal bytes become single tokens.
async fn read_command<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
) -> std::io::Result<CommandInput> {
    let mut tokens: Vec<String> = Vec::new();
    loop {
        let line = match read_line_bounded(stream, MAX_LINE).await? {
            LineRead::Eof => return Ok(CommandInput::Eof),
            LineRead::TooLong => return Ok(CommandInput::TooLong),
            LineRead::BadEncoding => return Ok(CommandInput::BadEncoding),
            LineRead::Line(line) => line,
        };

        if let Some((text, len, synchronizing)) = literal_suffix(&line) {
            match tokenize(text) {
                Ok(parsed) => tokens.extend(parsed),
                Err(reason) => return Ok(CommandInput::BadSyntax(reason)),
            }
            if len > MAX_LINE {
                // Drain the announced bytes so the stream stays in
                // sync, then reject the command.
                tokio::io::copy(&mut (&mut *stream).take(len as u64), &mut tokio::io::sink())
                    .await?;
                return Ok(CommandInput::TooLong);
            }
            if synchronizing && write_line(stream, "+ Ready for literal\r\n").await.is_err() {
                return Ok(CommandInput::Eof);
            }
            let mut buf = vec![0u8; len];
            stream.read_exact(&mut buf).await?;
            tokens.push(String::from_utf8_lossy(&buf).into_owned());
        } else {
            match tokenize(&line) {
                Ok(parsed) => tokens.extend(parsed),
                Err(reason) => return Ok(CommandInput::BadSyntax(reason)),
            }
            return Ok(CommandInput::Tokens(tokens));
        }
    }
}

fn needs_selected(command: &str) -> bool {
    matches!(
        command,
        "FETCH" | "STORE" | "SEARCH" | "UID" | "CLOSE" | "EXPUNGE" | "IDLE"
    )
}

/// Run the command loop over an established stream until the client
/// logs out, the connection drops, or STARTTLS is accepted.
#[allow(clippy::too_many_lines)]
pub(crate) async fn run_session<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    ctx: &ImapContext,
    session: &mut Session,
) -> SessionEnd {
    loop {
        let input = match read_command(stream).await {
            Ok(input) => input,
            Err(e) => {
                debug!("IMAP connection error: {e}");
                return SessionEnd::Closed;
            }
        };

        let tokens = match input {
            CommandInput::Eof => return SessionEnd::Closed,
            CommandInput::TooLong => {
                if write_line(stream, "* BAD Command line too long\r\n")
                    .await
                    .is_err()
                {
                    return SessionEnd::Closed;
                }
                continue;
            }
            CommandInput::BadEncoding => {
                if write_line(stream, "* BAD Command line is not valid UTF-8\r\n")
                    .await
                    .is_err()
                {
                    return SessionEnd::Closed;
                }
                continue;
            }
            CommandInput::BadSyntax(reason) => {
                if write_line(stream, &format!("* BAD {reason}\r\n")).await.is_err() {
                    return SessionEnd::Closed;
                }
                continue;
            }
            CommandInput::Tokens(tokens) => tokens,
        };

        if tokens.is_empty() {
            continue;
        }
        if tokens.len() < 2 {
            if write_line(stream, "* BAD Invalid command format\r\n")
                .await
                .is_err()
            {
                return SessionEnd::Closed;
            }
            continue;
        }

        let tag = tokens[0].clone();
        let command = tokens[1].to_ascii_uppercase();
        let args = &tokens[2..];
        debug!("IMAP << {tag} {command}");

        match command.as_str() {
            "CAPABILITY" => handlers::capability::handle(&tag, session, stream).await,
            "NOOP" => {
                let _ = write_line(stream, &format!("{tag} OK NOOP completed\r\n")).await;
            }
            "LOGOUT" => {
                let _ = write_line(stream, "* BYE IMAP4rev1 server logging out\r\n").await;
                let _ = write_line(stream, &format!("{tag} OK LOGOUT completed\r\n")).await;
                return SessionEnd::Closed;
            }
            "STARTTLS" => {
                if session.tls_active {
                    let _ =
                        write_line(stream, &format!("{tag} BAD TLS already active\r\n")).await;
                } else if !session.tls_available {
                    let _ = write_line(
                        stream,
                        &format!("{tag} BAD STARTTLS is not available\r\n"),
                    )
                    .await;
                } else if session.user.is_some() {
                    let _ = write_line(
                        stream,
                        &format!("{tag} BAD Cannot start TLS after authentication\r\n"),
                    )
                    .await;
                } else {
                    // Tagged OK goes out before the handshake; the
                    // caller discards any buffered plaintext input.
                    if write_line(stream, &format!("{tag} OK Begin TLS negotiation now\r\n"))
                        .await
                        .is_err()
                    {
                        return SessionEnd::Closed;
                    }
                    return SessionEnd::StartTls;
                }
            }
            "LOGIN" => handlers::auth::handle_login(&tag, args, ctx, session, stream).await,
            "AUTHENTICATE" => {
                handlers::auth::handle_authenticate(&tag, args, ctx, session, stream).await;
            }
            "SELECT" | "EXAMINE" | "LIST" | "LSUB" | "STATUS" | "CREATE" | "FETCH"
            | "STORE" | "SEARCH" | "UID" | "CLOSE" | "EXPUNGE" | "IDLE" => {
                let Some(user) = session.user.clone() else {
                    let _ = write_line(
                        stream,
                        &format!("{tag} NO [AUTHENTICATIONFAILED] Not authenticated\r\n"),
                    )
                    .await;
                    continue;
                };

                if needs_selected(&command) {
                    let Some(selected) = session.selected.clone() else {
                        let _ = write_line(
                            stream,
                            &format!("{tag} NO [CLIENTBUG] No folder selected\r\n"),
                        )
                        .await;
                        continue;
                    };
                    dispatch_selected(
                        &command, &tag, args, ctx, &user, &selected, session, stream,
                    )
                    .await;
                } else {
                    dispatch_authenticated(&command, &tag, args, ctx, &user, session, stream)
                        .await;
                }
            }
            _ => {
                let _ = write_line(
                    stream,
                    &format!("{tag} BAD Command '{command}' not recognized\r\n"),
                )
                .await;
            }
        }
    }
}

async fn dispatch_authenticated<S: AsyncRead + AsyncWrite + Unpin>(
    command: &str,
    tag: &str,
    args: &[String],
    ctx: &ImapContext,
    user: &str,
    session: &mut Session,
    stream: &mut BufReader<S>,
) {
    match command {
        "SELECT" => handlers::select::handle(tag, args, false, ctx, user, session, stream).await,
        "EXAMINE" => handlers::select::handle(tag, args, true, ctx, user, session, stream).await,
        "LIST" => handlers::list::handle(tag, args, false, ctx, user, stream).await,
        "LSUB" => handlers::list::handle(tag, args, true, ctx, user, stream).await,
        "STATUS" => handlers::status::handle(tag, args, ctx, user, stream).await,
        "CREATE" => handlers::create::handle(tag, args, ctx, user, stream).await,
        _ => {
            let _ = write_line(
                stream,
                &format!("{tag} BAD Command '{command}' not recognized\r\n"),
            )
            .await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_selected<S: AsyncRead + AsyncWrite + Unpin>(
    command: &str,
    tag: &str,
    args: &[String],
    ctx: &ImapContext,
    user: &str,
    selected: &Selected,
    session: &mut Session,
    stream: &mut BufReader<S>,
) {
    match command {
        "FETCH" => {
            handlers::fetch::handle(tag, args, false, ctx, user, selected, stream).await;
        }
        "STORE" => {
            handlers::store::handle(tag, args, false, ctx, user, selected, stream).await;
        }
        "SEARCH" => {
            handlers::search::handle(tag, args, false, ctx, user, selected, stream).await;
        }
        "EXPUNGE" => {
            handlers::expunge::handle_expunge(tag, ctx, user, selected, stream).await;
        }
        "CLOSE" => {
            handlers::expunge::handle_close(tag, ctx, user, selected, session, stream).await;
        }
        "IDLE" => handlers::idle::handle(tag, stream).await,
        "UID" => {
            let Some(subcommand) = args.first().map(|s| s.to_ascii_uppercase()) else {
                let _ =
                    write_line(stream, &format!("{tag} BAD Invalid UID command format\r\n")).await;
                return;
            };
            let rest = &args[1..];
            match subcommand.as_str() {
                "FETCH" => {
                    handlers::fetch::handle(tag, rest, true, ctx, user, selected, stream).await;
                }
                "STORE" => {
                    handlers::store::handle(tag, rest, true, ctx, user, selected, stream).await;
                }
                "SEARCH" => {
                    handlers::search::handle(tag, rest, true, ctx, user, selected, stream).await;
                }
                _ => {
                    let _ = write_line(
                        stream,
                        &format!("{tag} BAD UID subcommand '{subcommand}' not recognized\r\n"),
                    )
                    .await;
                }
            }
        }
        _ => {
            let _ = write_line(
                stream,
                &format!("{tag} BAD Command '{command}' not recognized\r\n"),
            )
            .await;
        }
    }
}
