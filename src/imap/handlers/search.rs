//! SEARCH and UID SEARCH command handlers.
//!
//! Only the criteria the folder model can answer honestly are
//! supported: `ALL` (or no criteria), `SEEN`, and `UNSEEN`. Anything
//! richer is rejected as `BAD` instead of returning wrong matches.

use crate::imap::io::write_line;
use crate::imap::session::{ImapContext, Selected};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::warn;

enum Criteria {
    All,
    Seen,
    Unseen,
}

/// Handle SEARCH (or UID SEARCH when `uid_mode` is set).
pub async fn handle<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &[String],
    uid_mode: bool,
    ctx: &ImapContext,
    user: &str,
    selected: &Selected,
    stream: &mut BufReader<S>,
) {
    let command_name = if uid_mode { "UID SEARCH" } else { "SEARCH" };

    let criteria = match args {
        [] => Criteria::All,
        [single] => match single.to_ascii_uppercase().as_str() {
            "ALL" => Criteria::All,
            "SEEN" => Criteria::Seen,
            "UNSEEN" => Criteria::Unseen,
            other => {
                let resp = format!("{tag} BAD Unsupported SEARCH criteria '{other}'\r\n");
                let _ = write_line(stream, &resp).await;
                return;
            }
        },
        _ => {
            let resp = format!("{tag} BAD Unsupported SEARCH criteria\r\n");
            let _ = write_line(stream, &resp).await;
            return;
        }
    };

    let folder = ctx.store.folder(user, Some(&selected.folder));
    let pairs = match folder.uid_key_pairs().await {
        Ok(pairs) => pairs,
        Err(e) => {
            warn!("{command_name} cannot enumerate folder: {e}");
            let resp = format!("{tag} NO [SERVERFAILURE] Server error\r\n");
            let _ = write_line(stream, &resp).await;
            return;
        }
    };

    let mut hits: Vec<u32> = Vec::new();
    for (index, (uid, key)) in pairs.iter().enumerate() {
        let matched = match criteria {
            Criteria::All => true,
            Criteria::Seen | Criteria::Unseen => {
                let Ok(Some((flags, _))) = folder.message_flags(key.clone()).await else {
                    continue;
                };
                let seen = flags.contains('S');
                matches!(criteria, Criteria::Seen) == seen
            }
        };
        if matched {
            #[allow(clippy::cast_possible_truncation)]
            hits.push(if uid_mode { *uid } else { index as u32 + 1 });
        }
    }

    let mut line = String::from("* SEARCH");
    for hit in hits {
        line.push_str(&format!(" {hit}"));
    }
    line.push_str("\r\n");
    if write_line(stream, &line).await.is_err() {
        return;
    }
    let resp = format!("{tag} OK {command_name} completed\r\n");
    let _ = write_line(stream, &resp).await;
}
