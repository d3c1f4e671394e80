//! End-to-end IMAP session tests
//!
//! Each test starts a real server on an ephemeral port, drives it over
//! a TCP socket like a mail client would, and asserts on the raw
//! protocol lines.

use selfmail::imap::{ImapContext, ImapServer};
use selfmail::{StaticAuthenticator, Store};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

const RAW_HI: &[u8] = b"From: carol@localhost\r\nSubject: Hi\r\n\r\nhello there\r\n";

fn test_context(root: &Path) -> ImapContext {
    let mut users = HashMap::new();
    users.insert("alice@localhost".to_string(), "secret".to_string());
    ImapContext {
        store: Store::new(root, "localhost"),
        auth: Arc::new(StaticAuthenticator::new(users)),
        host_name: "localhost".to_string(),
    }
}

async fn start_server(root: &Path) -> (SocketAddr, JoinHandle<()>) {
    let server = ImapServer::bind("127.0.0.1:0", test_context(root), None)
        .await
        .expect("bind ephemeral port");
    let addr = server.local_addr().expect("local addr");
    let handle = tokio::spawn(async move {
        let _ = server.run().await;
    });
    (addr, handle)
}

struct TestClient {
    stream: BufReader<TcpStream>,
    pub greeting: String,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let mut stream = BufReader::new(stream);
        let mut greeting = String::new();
        stream.read_line(&mut greeting).await.expect("greeting");
        Self { stream, greeting }
    }

    async fn send(&mut self, line: &str) {
        self.stream
            .get_mut()
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("write");
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.stream.read_line(&mut line).await.expect("read");
        line
    }

    /// Send a command and collect every response line through the
    /// tagged completion.
    async fn command(&mut self, tag: &str, command: &str) -> Vec<String> {
        self.send(&format!("{tag} {command}")).await;
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await;
            let done = line.starts_with(&format!("{tag} "));
            lines.push(line);
            if done {
                break;
            }
        }
        lines
    }

    async fn login(&mut self) {
        let lines = self.command("L1", "LOGIN alice@localhost secret").await;
        assert!(lines.last().unwrap().starts_with("L1 OK"));
    }
}

fn joined(lines: &[String]) -> String {
    lines.concat()
}

fn extract_bracketed_number(lines: &[String], code: &str) -> u64 {
    let line = lines
        .iter()
        .find(|line| line.contains(code))
        .unwrap_or_else(|| panic!("no {code} line"));
    let after = line.split(code).nth(1).expect("value follows code");
    after
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .expect("numeric value")
}

#[tokio::test]
async fn greeting_advertises_capabilities() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = start_server(dir.path()).await;
    let client = TestClient::connect(addr).await;
    assert!(client.greeting.starts_with("* OK [CAPABILITY IMAP4rev1 LITERAL+ IDLE AUTH=PLAIN"));
}

#[tokio::test]
async fn empty_select_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    ctx.store.folder("alice", None).create().await.unwrap();
    let (addr, _server) = start_server(dir.path()).await;

    let mut client = TestClient::connect(addr).await;
    client.login().await;

    let lines = client.command("A2", "SELECT INBOX").await;
    let all = joined(&lines);
    assert!(all.contains("* 0 EXISTS"));
    assert!(all.contains("* 0 RECENT"));
    assert!(!all.contains("UNSEEN"));
    assert!(all.contains("* FLAGS ("));
    assert!(all.contains("[UIDVALIDITY "));
    assert!(all.contains("[UIDNEXT 1]"));
    assert!(lines.last().unwrap().starts_with("A2 OK [READ-WRITE] SELECT completed"));
}

#[tokio::test]
async fn deliver_one_fetch_one_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    let inbox = ctx.store.folder("alice", None);
    inbox.create().await.unwrap();
    // The SMTP collaborator writes through the same save path.
    inbox.save(RAW_HI.to_vec()).await.unwrap();

    let (addr, _server) = start_server(dir.path()).await;
    let mut client = TestClient::connect(addr).await;
    client.login().await;

    let lines = client.command("A3", "SELECT INBOX").await;
    let all = joined(&lines);
    assert!(all.contains("* 1 EXISTS"));
    assert!(all.contains("* 1 RECENT"));
    assert!(all.contains("[UIDNEXT 2]"));

    let lines = client
        .command("A4", "UID FETCH 1 (FLAGS RFC822.SIZE)")
        .await;
    let all = joined(&lines);
    assert!(all.contains(&format!(
        "* 1 FETCH (UID 1 FLAGS (\\Recent) RFC822.SIZE {})",
        RAW_HI.len()
    )));
    assert!(lines.last().unwrap().starts_with("A4 OK UID FETCH completed"));
}

#[tokio::test]
async fn body_fetch_sets_seen_and_peek_does_not() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    let inbox = ctx.store.folder("alice", None);
    inbox.create().await.unwrap();
    inbox.save(RAW_HI.to_vec()).await.unwrap();
    inbox.save(RAW_HI.to_vec()).await.unwrap();

    let (addr, _server) = start_server(dir.path()).await;
    let mut client = TestClient::connect(addr).await;
    client.login().await;
    client.command("A3", "SELECT INBOX").await;

    // Scenario 3: BODY[] marks the first message seen.
    let lines = client.command("A5", "FETCH 1 (BODY[])").await;
    let all = joined(&lines);
    assert!(all.contains(&format!("BODY[] {{{}}}", RAW_HI.len())));
    assert!(all.contains("hello there"));

    let lines = client.command("A5b", "FETCH 1 (FLAGS)").await;
    assert!(joined(&lines).contains("FLAGS (\\Seen)"));

    // Scenario 4: BODY.PEEK leaves the second message untouched.
    let lines = client.command("A6", "FETCH 2 (BODY.PEEK[HEADER])").await;
    assert!(joined(&lines).contains("Subject: Hi"));

    let lines = client.command("A7", "FETCH 2 (FLAGS)").await;
    assert!(!joined(&lines).contains("\\Seen"));
}

#[tokio::test]
async fn uid_persistence_across_restart_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    let inbox = ctx.store.folder("alice", None);
    inbox.create().await.unwrap();
    inbox.save(RAW_HI.to_vec()).await.unwrap();
    inbox.save(RAW_HI.to_vec()).await.unwrap();

    let (addr, server) = start_server(dir.path()).await;
    let (uidvalidity, uidnext) = {
        let mut client = TestClient::connect(addr).await;
        client.login().await;
        let lines = client.command("A3", "SELECT INBOX").await;
        client.command("A5", "FETCH 1 (BODY[])").await;
        (
            extract_bracketed_number(&lines, "[UIDVALIDITY"),
            extract_bracketed_number(&lines, "[UIDNEXT"),
        )
    };
    assert_eq!(uidnext, 3);

    // Stop the server, then bring up a fresh process-equivalent on
    // the same storage root.
    server.abort();
    let (addr, _server) = start_server(dir.path()).await;

    let mut client = TestClient::connect(addr).await;
    client.login().await;
    let lines = client.command("A8", "SELECT INBOX").await;
    assert_eq!(
        extract_bracketed_number(&lines, "[UIDVALIDITY"),
        uidvalidity
    );
    assert_eq!(extract_bracketed_number(&lines, "[UIDNEXT"), 3);

    let lines = client.command("A9", "UID FETCH 1 (FLAGS)").await;
    assert!(joined(&lines).contains("\\Seen"));
}

#[tokio::test]
async fn list_wildcard_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    ctx.store.folder("alice", None).create().await.unwrap();

    let (addr, _server) = start_server(dir.path()).await;
    let mut client = TestClient::connect(addr).await;
    client.login().await;

    assert!(client.command("C1", "CREATE Sent").await.last().unwrap().starts_with("C1 OK"));
    assert!(client.command("C2", "CREATE Drafts").await.last().unwrap().starts_with("C2 OK"));

    let lines = client.command("A9", "LIST \"\" \"%\"").await;
    let list_lines: Vec<&String> = lines
        .iter()
        .filter(|line| line.starts_with("* LIST"))
        .collect();
    assert_eq!(list_lines.len(), 3);
    let all = joined(&lines);
    assert!(all.contains("\"INBOX\""));
    assert!(all.contains("\"Sent\""));
    assert!(all.contains("\"Drafts\""));
    assert!(lines.last().unwrap().starts_with("A9 OK LIST completed"));
}

#[tokio::test]
async fn select_noop_select_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    let inbox = ctx.store.folder("alice", None);
    inbox.create().await.unwrap();
    inbox.save(RAW_HI.to_vec()).await.unwrap();

    let (addr, _server) = start_server(dir.path()).await;
    let mut client = TestClient::connect(addr).await;
    client.login().await;

    let first = client.command("A1", "SELECT INBOX").await;
    client.command("A2", "NOOP").await;
    let second = client.command("A3", "SELECT INBOX").await;

    let pick = |lines: &[String], needle: &str| -> Vec<String> {
        lines
            .iter()
            .filter(|line| line.contains(needle))
            .cloned()
            .collect()
    };
    assert_eq!(pick(&first, "EXISTS"), pick(&second, "EXISTS"));
    assert_eq!(pick(&first, "UIDNEXT"), pick(&second, "UIDNEXT"));
}

#[tokio::test]
async fn fetch_uids_then_uid_fetch_agrees() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    let inbox = ctx.store.folder("alice", None);
    inbox.create().await.unwrap();
    for _ in 0..3 {
        inbox.save(RAW_HI.to_vec()).await.unwrap();
    }

    let (addr, _server) = start_server(dir.path()).await;
    let mut client = TestClient::connect(addr).await;
    client.login().await;
    client.command("A1", "SELECT INBOX").await;

    let lines = client.command("A2", "FETCH 1:* (UID)").await;
    let mut uids = Vec::new();
    for line in &lines {
        if let Some(rest) = line.split("UID ").nth(1) {
            let uid: String = rest.chars().take_while(char::is_ascii_digit).collect();
            uids.push(uid);
        }
    }
    assert_eq!(uids, vec!["1", "2", "3"]);

    let lines = client
        .command("A3", &format!("UID FETCH {} (FLAGS)", uids.join(",")))
        .await;
    let seqs: Vec<&String> = lines.iter().filter(|l| l.starts_with("* ")).collect();
    assert_eq!(seqs.len(), 3);
    assert!(seqs[0].starts_with("* 1 FETCH"));
    assert!(seqs[2].starts_with("* 3 FETCH"));
}

#[tokio::test]
async fn commands_require_authentication() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = start_server(dir.path()).await;
    let mut client = TestClient::connect(addr).await;

    let lines = client.command("A1", "SELECT INBOX").await;
    assert!(lines.last().unwrap().contains("NO [AUTHENTICATIONFAILED]"));

    let lines = client.command("A2", "LOGIN alice@localhost wrong").await;
    assert!(lines.last().unwrap().contains("NO [AUTHENTICATIONFAILED]"));

    let lines = client.command("A3", "BOGUS").await;
    assert!(lines.last().unwrap().starts_with("A3 BAD"));
}

#[tokio::test]
async fn authenticate_plain_over_socket() {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;

    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    ctx.store.folder("alice", None).create().await.unwrap();
    let (addr, _server) = start_server(dir.path()).await;

    let mut client = TestClient::connect(addr).await;
    client.send("A1 AUTHENTICATE PLAIN").await;
    let continuation = client.read_line().await;
    assert!(continuation.starts_with('+'));

    client
        .send(&BASE64.encode(b"\0alice@localhost\0secret"))
        .await;
    let line = client.read_line().await;
    assert!(line.starts_with("A1 OK AUTHENTICATE completed"));

    let lines = client.command("A2", "SELECT INBOX").await;
    assert!(lines.last().unwrap().starts_with("A2 OK"));
}

#[tokio::test]
async fn login_with_nonsynchronizing_literals() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    ctx.store.folder("alice", None).create().await.unwrap();
    let (addr, _server) = start_server(dir.path()).await;

    let mut client = TestClient::connect(addr).await;
    client.send("A1 LOGIN {15+}\r\nalice@localhost {6+}\r\nsecret").await;
    let line = client.read_line().await;
    assert!(line.starts_with("A1 OK LOGIN completed"));
}

#[tokio::test]
async fn store_and_expunge_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    let inbox = ctx.store.folder("alice", None);
    inbox.create().await.unwrap();
    inbox.save(RAW_HI.to_vec()).await.unwrap();
    inbox.save(RAW_HI.to_vec()).await.unwrap();

    let (addr, _server) = start_server(dir.path()).await;
    let mut client = TestClient::connect(addr).await;
    client.login().await;
    client.command("A1", "SELECT INBOX").await;

    let lines = client.command("A2", "STORE 1 +FLAGS (\\Deleted)").await;
    assert!(joined(&lines).contains("FLAGS (\\Deleted"));

    let lines = client.command("A3", "EXPUNGE").await;
    let all = joined(&lines);
    assert!(all.contains("* 1 EXPUNGE"));
    assert!(lines.last().unwrap().starts_with("A3 OK EXPUNGE completed"));

    // The survivor keeps UID 2 and is now sequence 1.
    let lines = client.command("A4", "FETCH 1 (UID)").await;
    assert!(joined(&lines).contains("UID 2"));
}

#[tokio::test]
async fn idle_acknowledges_done() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    ctx.store.folder("alice", None).create().await.unwrap();
    let (addr, _server) = start_server(dir.path()).await;

    let mut client = TestClient::connect(addr).await;
    client.login().await;
    client.command("A1", "SELECT INBOX").await;

    client.send("A2 IDLE").await;
    let line = client.read_line().await;
    assert!(line.starts_with("+ idling"));
    client.send("DONE").await;
    let line = client.read_line().await;
    assert!(line.starts_with("A2 OK IDLE terminated"));
}

#[tokio::test]
async fn logout_says_bye_last_line_tagged() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server) = start_server(dir.path()).await;
    let mut client = TestClient::connect(addr).await;

    let lines = client.command("A1", "LOGOUT").await;
    assert!(lines[0].starts_with("* BYE"));
    assert!(lines.last().unwrap().starts_with("A1 OK LOGOUT completed"));
}
