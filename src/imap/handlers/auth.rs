//! LOGIN and AUTHENTICATE PLAIN handlers.
//!
//! SASL PLAIN (RFC 4616) carries `authzid NUL authcid NUL password`
//! base64-encoded on a continuation line:
//!
//! ```text
//!   Client:  A1 AUTHENTICATE PLAIN
//!   Server:  +
//!   Client:  AGFsaWNlQGxvY2FsaG9zdABzZWNyZXQ=
//!   Server:  A1 OK AUTHENTICATE completed
//! ```
//!
//! LOGIN is the convenience form of the same check. Either way the
//! credential oracle decides, and the stored session user is the
//! authcid with a trailing `@<hostname>` stripped -- mailbox
//! directories are named by the local part.

use crate::imap::io::{read_line_bounded, write_line, LineRead};
use crate::imap::session::{ImapContext, Session};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::info;

const MAX_CREDENTIAL_LINE: usize = 8 * 1024;

/// Handle the LOGIN command: `LOGIN <user> <password>`.
pub async fn handle_login<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &[String],
    ctx: &ImapContext,
    session: &mut Session,
    stream: &mut BufReader<S>,
) {
    if session.user.is_some() {
        let resp = format!("{tag} NO [ALREADYAUTHENTICATED] Already authenticated\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }
    if args.len() != 2 {
        let resp = format!("{tag} BAD Invalid LOGIN command format\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }
    finish(tag, "LOGIN", &args[0], &args[1], ctx, session, stream).await;
}

/// Handle `AUTHENTICATE PLAIN` with its continuation exchange.
pub async fn handle_authenticate<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &[String],
    ctx: &ImapContext,
    session: &mut Session,
    stream: &mut BufReader<S>,
) {
    if session.user.is_some() {
        let resp = format!("{tag} NO [ALREADYAUTHENTICATED] Already authenticated\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }
    if args.len() != 1 || !args[0].eq_ignore_ascii_case("PLAIN") {
        let resp = format!("{tag} NO Unsupported authentication mechanism\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }

    if write_line(stream, "+\r\n").await.is_err() {
        return;
    }
    let line = match read_line_bounded(stream, MAX_CREDENTIAL_LINE).await {
        Ok(LineRead::Line(line)) => line,
        Ok(LineRead::Eof) | Err(_) => return,
        Ok(LineRead::TooLong | LineRead::BadEncoding) => {
            let resp = format!("{tag} BAD Invalid PLAIN credentials format\r\n");
            let _ = write_line(stream, &resp).await;
            return;
        }
    };

    let Some((authcid, password)) = decode_plain(&line) else {
        let resp = format!("{tag} BAD Invalid PLAIN credentials format\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };
    finish(tag, "AUTHENTICATE", &authcid, &password, ctx, session, stream).await;
}

/// Decode a base64 SASL PLAIN response into `(authcid, password)`.
/// The authorization identity is accepted and ignored.
fn decode_plain(line: &str) -> Option<(String, String)> {
    let decoded = BASE64.decode(line.trim()).ok()?;
    let mut parts = decoded.split(|&b| b == 0);
    let _authzid = parts.next()?;
    let authcid = String::from_utf8(parts.next()?.to_vec()).ok()?;
    let password = String::from_utf8(parts.next()?.to_vec()).ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((authcid, password))
}

async fn finish<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    command_name: &str,
    username: &str,
    password: &str,
    ctx: &ImapContext,
    session: &mut Session,
    stream: &mut BufReader<S>,
) {
    if ctx.auth.verify(username, password) {
        let suffix = format!("@{}", ctx.host_name);
        let local = username.strip_suffix(suffix.as_str()).unwrap_or(username);
        info!("IMAP user {local} authenticated");
        session.user = Some(local.to_string());
        let resp = format!("{tag} OK {command_name} completed\r\n");
        let _ = write_line(stream, &resp).await;
    } else {
        let resp = format!("{tag} NO [AUTHENTICATIONFAILED] Invalid credentials\r\n");
        let _ = write_line(stream, &resp).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthenticator;
    use crate::store::Store;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;

    fn context(dir: &std::path::Path) -> ImapContext {
        let mut users = HashMap::new();
        users.insert("alice@localhost".to_string(), "secret".to_string());
        ImapContext {
            store: Store::new(dir, "localhost"),
            auth: Arc::new(StaticAuthenticator::new(users)),
            host_name: "localhost".to_string(),
        }
    }

    async fn run_login(args: &[&str], session: &mut Session) -> String {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);
        let args: Vec<String> = args.iter().map(ToString::to_string).collect();

        handle_login("A1", &args, &ctx, session, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn login_strips_host_suffix() {
        let mut session = Session::new(false);
        let output = run_login(&["alice@localhost", "secret"], &mut session).await;
        assert!(output.contains("A1 OK LOGIN completed"));
        assert_eq!(session.user.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn login_bad_password_fails() {
        let mut session = Session::new(false);
        let output = run_login(&["alice@localhost", "wrong"], &mut session).await;
        assert!(output.contains("NO [AUTHENTICATIONFAILED]"));
        assert!(session.user.is_none());
    }

    #[tokio::test]
    async fn second_login_is_rejected() {
        let mut session = Session::new(false);
        session.user = Some("alice".to_string());
        let output = run_login(&["alice@localhost", "secret"], &mut session).await;
        assert!(output.contains("NO [ALREADYAUTHENTICATED]"));
    }

    #[tokio::test]
    async fn authenticate_plain_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let mut session = Session::new(false);
        let (mut client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);

        let credentials = BASE64.encode(b"\0alice@localhost\0secret");
        let driver = tokio::spawn(async move {
            client
                .write_all(format!("{credentials}\r\n").as_bytes())
                .await
                .unwrap();
            let mut buf = Vec::new();
            tokio::io::AsyncReadExt::read_to_end(&mut client, &mut buf)
                .await
                .unwrap();
            String::from_utf8(buf).unwrap()
        });

        let args = vec!["PLAIN".to_string()];
        handle_authenticate("A2", &args, &ctx, &mut session, &mut stream).await;
        drop(stream);

        let output = driver.await.unwrap();
        assert!(output.starts_with("+\r\n"));
        assert!(output.contains("A2 OK AUTHENTICATE completed"));
        assert_eq!(session.user.as_deref(), Some("alice"));
    }

    #[test]
    fn decode_plain_splits_on_nul() {
        let line = BASE64.encode(b"authz\0user\0pass");
        assert_eq!(
            decode_plain(&line),
            Some(("user".to_string(), "pass".to_string()))
        );
        assert!(decode_plain("not base64!!!").is_none());
        let two_parts = BASE64.encode(b"user\0pass");
        assert!(decode_plain(&two_parts).is_none());
    }
}
