//! Per-connection SMTP submission session
//!
//! The command loop speaks the submission subset: EHLO/HELO, STARTTLS,
//! AUTH PLAIN, MAIL, RCPT, DATA, RSET, NOOP, QUIT. When STARTTLS is
//! available it is mandatory before MAIL, and every submission
//! requires authentication. Only local recipients are accepted; this
//! is a submission endpoint, not a relay.

use super::delivery;
use crate::auth::Authenticator;
use crate::imap::io::{read_line_bounded, write_line, LineRead};
use crate::store::Store;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, warn};

/// SMTP command lines are short; RFC 5321 caps them at 512 octets.
const MAX_COMMAND_LINE: usize = 1024;
const MAX_DATA_LINE: usize = 8 * 1024;
/// Submission size cap for DATA payloads.
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Server-wide context shared by every SMTP session.
pub struct SmtpContext {
    pub store: Store,
    pub auth: Arc<dyn Authenticator>,
    pub host_name: String,
}

/// Why [`run_smtp_session`] returned.
pub(crate) enum SmtpEnd {
    Closed,
    /// `220` was already written; the caller performs the handshake
    /// and re-enters with the wrapped stream.
    StartTls,
}

/// Mutable per-connection state.
pub(crate) struct SmtpSession {
    pub tls_available: bool,
    pub tls_active: bool,
    pub authenticated: bool,
    mail_from: Option<String>,
    rcpt_to: Vec<String>,
}

impl SmtpSession {
    pub(crate) const fn new(tls_available: bool) -> Self {
        Self {
            tls_available,
            tls_active: false,
            authenticated: false,
            mail_from: None,
            rcpt_to: Vec::new(),
        }
    }

    fn reset_envelope(&mut self) {
        self.mail_from = None;
        self.rcpt_to.clear();
    }
}

/// Extract the address from `FROM:<a@b>` / `TO:<a@b>` (brackets
/// optional, parameters ignored).
fn parse_path(rest: &str, keyword: &str) -> Option<String> {
    let rest = rest.trim();
    let head = rest.as_bytes().get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword.as_bytes()) {
        return None;
    }
    let after = rest[keyword.len()..].trim_start();
    let after = after.strip_prefix(':')?.trim_start();
    let address = if let Some(open) = after.strip_prefix('<') {
        open.split('>').next()?
    } else {
        after.split_whitespace().next()?
    };
    let address = address.trim();
    if address.is_empty() {
        None
    } else {
        Some(address.to_string())
    }
}

/// Run the command loop until QUIT, disconnect, or STARTTLS.
#[allow(clippy::too_many_lines)]
pub(crate) async fn run_smtp_session<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    ctx: &SmtpContext,
    session: &mut SmtpSession,
) -> SmtpEnd {
    loop {
        let line = match read_line_bounded(stream, MAX_COMMAND_LINE).await {
            Ok(LineRead::Line(line)) => line,
            Ok(LineRead::Eof) | Err(_) => return SmtpEnd::Closed,
            Ok(LineRead::TooLong | LineRead::BadEncoding) => {
                if write_line(stream, "500 Line too long\r\n").await.is_err() {
                    return SmtpEnd::Closed;
                }
                continue;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let (verb, rest) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
        let verb = verb.to_ascii_uppercase();
        debug!("SMTP << {verb}");

        let ok = match verb.as_str() {
            "EHLO" | "HELO" => {
                let mut response = format!("250-{} Hello\r\n", ctx.host_name);
                if session.tls_available && !session.tls_active {
                    response.push_str("250-STARTTLS\r\n");
                }
                response.push_str("250 AUTH PLAIN\r\n");
                write_line(stream, &response).await
            }
            "STARTTLS" => {
                if session.tls_active || !session.tls_available {
                    write_line(stream, "454 TLS not available\r\n").await
                } else {
                    if write_line(stream, "220 Ready to start TLS\r\n").await.is_err() {
                        return SmtpEnd::Closed;
                    }
                    return SmtpEnd::StartTls;
                }
            }
            "AUTH" => handle_auth(rest, ctx, session, stream).await,
            "MAIL" => {
                if session.tls_available && !session.tls_active {
                    write_line(stream, "530 5.7.0 Must issue a STARTTLS command first\r\n").await
                } else if !session.authenticated {
                    write_line(stream, "530 5.7.0 Authentication required\r\n").await
                } else if let Some(address) = parse_path(rest, "FROM") {
                    session.mail_from = Some(address);
                    session.rcpt_to.clear();
                    write_line(stream, "250 OK\r\n").await
                } else {
                    write_line(stream, "501 Syntax: MAIL FROM:<address>\r\n").await
                }
            }
            "RCPT" => {
                if !session.authenticated {
                    write_line(stream, "530 5.7.0 Authentication required\r\n").await
                } else if session.mail_from.is_none() {
                    write_line(stream, "503 Need MAIL before RCPT\r\n").await
                } else if let Some(address) = parse_path(rest, "TO") {
                    if address.ends_with(&format!("@{}", ctx.host_name)) {
                        session.rcpt_to.push(address);
                        write_line(stream, "250 OK\r\n").await
                    } else {
                        write_line(stream, "550 not relaying to that domain\r\n").await
                    }
                } else {
                    write_line(stream, "501 Syntax: RCPT TO:<address>\r\n").await
                }
            }
            "DATA" => {
                if session.mail_from.is_none() || session.rcpt_to.is_empty() {
                    write_line(stream, "503 Bad sequence of commands\r\n").await
                } else {
                    handle_data(ctx, session, stream).await
                }
            }
            "RSET" => {
                session.reset_envelope();
                write_line(stream, "250 OK\r\n").await
            }
            "NOOP" => write_line(stream, "250 OK\r\n").await,
            "QUIT" => {
                let _ = write_line(stream, "221 Bye\r\n").await;
                return SmtpEnd::Closed;
            }
            _ => write_line(stream, "500 Command not recognized\r\n").await,
        };
        if ok.is_err() {
            return SmtpEnd::Closed;
        }
    }
}

/// `AUTH PLAIN [initial-response]`, with the continuation form when
/// the initial response is omitted.
async fn handle_auth<S: AsyncRead + AsyncWrite + Unpin>(
    rest: &str,
    ctx: &SmtpContext,
    session: &mut SmtpSession,
    stream: &mut BufReader<S>,
) -> std::io::Result<()> {
    let mut parts = rest.split_whitespace();
    let mechanism = parts.next().unwrap_or("").to_ascii_uppercase();
    if mechanism != "PLAIN" {
        return write_line(stream, "504 Unrecognized authentication type\r\n").await;
    }

    let payload = if let Some(initial) = parts.next() {
        initial.to_string()
    } else {
        write_line(stream, "334 \r\n").await?;
        match read_line_bounded(stream, MAX_COMMAND_LINE).await? {
            LineRead::Line(line) => line,
            LineRead::Eof => return Err(std::io::ErrorKind::UnexpectedEof.into()),
            LineRead::TooLong | LineRead::BadEncoding => {
                return write_line(stream, "501 Malformed credentials\r\n").await;
            }
        }
    };

    let verified = BASE64.decode(payload.trim()).ok().and_then(|decoded| {
        let mut fields = decoded.split(|&b| b == 0);
        let _authzid = fields.next()?;
        let authcid = String::from_utf8(fields.next()?.to_vec()).ok()?;
        let password = String::from_utf8(fields.next()?.to_vec()).ok()?;
        Some(ctx.auth.verify(&authcid, &password))
    });

    match verified {
        Some(true) => {
            session.authenticated = true;
            write_line(stream, "235 Authentication successful\r\n").await
        }
        Some(false) => write_line(stream, "535 Authentication credentials invalid\r\n").await,
        None => write_line(stream, "501 Malformed credentials\r\n").await,
    }
}

/// Receive the message body (dot-stuffed, terminated by a lone `.`)
/// and hand it to delivery.
async fn handle_data<S: AsyncRead + AsyncWrite + Unpin>(
    ctx: &SmtpContext,
    session: &mut SmtpSession,
    stream: &mut BufReader<S>,
) -> std::io::Result<()> {
    write_line(stream, "354 End data with <CR><LF>.<CR><LF>\r\n").await?;

    let mut raw: Vec<u8> = Vec::new();
    let mut oversized = false;
    loop {
        match read_line_bounded(stream, MAX_DATA_LINE).await? {
            LineRead::Line(line) => {
                if line == "." {
                    break;
                }
                let content = line.strip_prefix('.').map_or(line.as_str(), |rest| rest);
                if raw.len() + content.len() + 2 > MAX_MESSAGE_SIZE {
                    oversized = true;
                } else {
                    raw.extend_from_slice(content.as_bytes());
                    raw.extend_from_slice(b"\r\n");
                }
            }
            LineRead::TooLong | LineRead::BadEncoding => oversized = true,
            LineRead::Eof => return Err(std::io::ErrorKind::UnexpectedEof.into()),
        }
    }

    if oversized {
        return write_line(stream, "552 Message exceeds size limit\r\n").await;
    }

    let mail_from = session.mail_from.clone().unwrap_or_default();
    let recipients = session.rcpt_to.clone();
    session.reset_envelope();

    match delivery::deliver(ctx, &mail_from, &recipients, raw).await {
        Ok(()) => write_line(stream, "250 Message accepted for delivery\r\n").await,
        Err(e) => {
            warn!("delivery failed: {e}");
            write_line(stream, "451 Local error in processing\r\n").await
        }
    }
}
