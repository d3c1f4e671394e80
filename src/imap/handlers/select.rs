//! SELECT and EXAMINE command handlers.
//!
//! Opening a folder reports its state before the tagged completion:
//!
//! ```text
//!   * 2 EXISTS
//!   * 1 RECENT
//!   * OK [UNSEEN 2] Message 2 is first unseen
//!   * FLAGS (\Answered \Flagged \Deleted \Seen \Draft)
//!   * OK [PERMANENTFLAGS (\Deleted \Seen)] Limited
//!   * OK [UIDVALIDITY 1718900000] UIDs valid
//!   * OK [UIDNEXT 3] Predicted next UID
//!   A2 OK [READ-WRITE] SELECT completed
//! ```
//!
//! EXAMINE is identical but completes with `[READ-ONLY]` and marks the
//! session read-only. The five folder queries run concurrently.

use crate::imap::io::write_line;
use crate::imap::session::{ImapContext, Selected, Session};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::warn;

/// Handle SELECT (or EXAMINE when `examine` is set).
pub async fn handle<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &[String],
    examine: bool,
    ctx: &ImapContext,
    user: &str,
    session: &mut Session,
    stream: &mut BufReader<S>,
) {
    let command_name = if examine { "EXAMINE" } else { "SELECT" };
    if args.len() != 1 {
        let resp = format!("{tag} BAD Invalid {command_name} command format\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }
    let mailbox_name = &args[0];

    let folder = ctx.store.folder(user, Some(mailbox_name));
    if mailbox_name.contains("..") || !folder.exists().await {
        session.selected = None;
        let resp = format!("{tag} NO [NONEXISTENT] Mailbox does not exist\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }

    let (exists, recent, first_unseen, uidvalidity, uidnext) = tokio::join!(
        folder.message_count(),
        folder.recent_count(),
        folder.first_unseen_seq(),
        folder.uidvalidity(),
        folder.uidnext(),
    );

    let (Ok(exists), Ok(recent), Ok(first_unseen), Ok(uidvalidity), Ok(uidnext)) =
        (exists, recent, first_unseen, uidvalidity, uidnext)
    else {
        warn!("{command_name} {mailbox_name} failed to gather folder state");
        session.selected = None;
        let resp = format!("{tag} NO [SERVERFAILURE] Server error\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    let mut response = format!("* {exists} EXISTS\r\n* {recent} RECENT\r\n");
    if let Some(unseen) = first_unseen {
        response.push_str(&format!(
            "* OK [UNSEEN {unseen}] Message {unseen} is first unseen\r\n"
        ));
    }
    response.push_str("* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)\r\n");
    response.push_str("* OK [PERMANENTFLAGS (\\Deleted \\Seen)] Limited\r\n");
    response.push_str(&format!("* OK [UIDVALIDITY {uidvalidity}] UIDs valid\r\n"));
    response.push_str(&format!("* OK [UIDNEXT {uidnext}] Predicted next UID\r\n"));
    let mode = if examine { "READ-ONLY" } else { "READ-WRITE" };
    response.push_str(&format!("{tag} OK [{mode}] {command_name} completed\r\n"));

    if write_line(stream, &response).await.is_err() {
        return;
    }
    session.selected = Some(Selected {
        folder: mailbox_name.clone(),
        read_only: examine,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthenticator;
    use crate::store::Store;
    use std::sync::Arc;

    fn context(dir: &std::path::Path) -> ImapContext {
        ImapContext {
            store: Store::new(dir, "localhost"),
            auth: Arc::new(StaticAuthenticator::default()),
            host_name: "localhost".to_string(),
        }
    }

    async fn run(
        tag: &str,
        mailbox: &str,
        examine: bool,
        ctx: &ImapContext,
        session: &mut Session,
    ) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);
        let args = vec![mailbox.to_string()];

        handle(tag, &args, examine, ctx, "alice", session, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    const RAW: &[u8] = b"From: a@x.org\r\nSubject: t\r\n\r\nbody\r\n";

    #[tokio::test]
    async fn empty_folder_select() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        ctx.store.folder("alice", None).create().await.unwrap();
        let mut session = Session::new(false);

        let output = run("A1", "INBOX", false, &ctx, &mut session).await;
        assert!(output.contains("* 0 EXISTS"));
        assert!(output.contains("* 0 RECENT"));
        assert!(!output.contains("UNSEEN"));
        assert!(output.contains("* OK [UIDNEXT 1]"));
        assert!(output.contains("A1 OK [READ-WRITE] SELECT completed"));
        assert_eq!(session.selected.as_ref().map(|s| s.folder.as_str()), Some("INBOX"));
    }

    #[tokio::test]
    async fn populated_folder_reports_counts_and_unseen() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let folder = ctx.store.folder("alice", None);
        folder.create().await.unwrap();
        folder.save(RAW.to_vec()).await.unwrap();
        folder.save(RAW.to_vec()).await.unwrap();
        let mut session = Session::new(false);

        let output = run("A2", "INBOX", false, &ctx, &mut session).await;
        assert!(output.contains("* 2 EXISTS"));
        assert!(output.contains("* 2 RECENT"));
        assert!(output.contains("* OK [UNSEEN 1]"));
        assert!(output.contains("* OK [UIDNEXT 3]"));
        assert!(output.contains("* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)"));
        assert!(output.contains("* OK [PERMANENTFLAGS (\\Deleted \\Seen)] Limited"));
        assert!(output.contains("UIDVALIDITY"));
    }

    #[tokio::test]
    async fn examine_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        ctx.store.folder("alice", None).create().await.unwrap();
        let mut session = Session::new(false);

        let output = run("A3", "INBOX", true, &ctx, &mut session).await;
        assert!(output.contains("A3 OK [READ-ONLY] EXAMINE completed"));
        assert!(session.selected.as_ref().is_some_and(|s| s.read_only));
    }

    #[tokio::test]
    async fn missing_mailbox_is_nonexistent() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let mut session = Session::new(false);

        let output = run("A4", "Nope", false, &ctx, &mut session).await;
        assert!(output.contains("A4 NO [NONEXISTENT]"));
        assert!(session.selected.is_none());
    }
}
