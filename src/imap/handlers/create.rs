//! CREATE command handler.
//!
//! Creates a new folder Maildir under the user's mailbox root,
//! including any missing intermediate folders of a `/`-separated
//! path.

use crate::imap::io::write_line;
use crate::imap::session::ImapContext;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::warn;

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && name
            .split('/')
            .all(|part| !part.is_empty() && !part.starts_with('.'))
}

/// Handle the CREATE command.
pub async fn handle<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &[String],
    ctx: &ImapContext,
    user: &str,
    stream: &mut BufReader<S>,
) {
    if args.len() != 1 {
        let resp = format!("{tag} BAD Invalid CREATE command format\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }
    let name = &args[0];

    if name.eq_ignore_ascii_case("INBOX") {
        let resp = format!("{tag} NO [ALREADYEXISTS] INBOX always exists\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }
    if !valid_name(name) {
        let resp = format!("{tag} BAD Invalid mailbox name\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }

    let folder = ctx.store.folder(user, Some(name));
    if folder.exists().await {
        let resp = format!("{tag} NO [ALREADYEXISTS] Mailbox already exists\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }

    match folder.create().await {
        Ok(()) => {
            let resp = format!("{tag} OK CREATE completed\r\n");
            let _ = write_line(stream, &resp).await;
        }
        Err(e) => {
            warn!("CREATE {name} failed: {e}");
            let resp = format!("{tag} NO [SERVERFAILURE] Cannot create mailbox\r\n");
            let _ = write_line(stream, &resp).await;
        }
    }
}
