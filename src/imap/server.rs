//! IMAP listener and STARTTLS upgrade.
//!
//! Accepts connections and hands each to a session task. When a TLS
//! acceptor is configured, the session may upgrade mid-connection: the
//! tagged OK goes out on the plaintext stream, the handshake runs, and
//! the command loop resumes over the wrapped stream with a fresh read
//! buffer (any plaintext bytes a client optimistically pipelined are
//! discarded).

use super::io::write_line;
use super::session::{run_session, ImapContext, Session, SessionEnd};
use crate::error::{Error, Result};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// The IMAP server: a bound listener plus the shared session context.
pub struct ImapServer {
    listener: TcpListener,
    ctx: Arc<ImapContext>,
    acceptor: Option<TlsAcceptor>,
}

impl ImapServer {
    /// Bind the listening socket. Fails when the address is taken.
    pub async fn bind(
        addr: &str,
        ctx: ImapContext,
        acceptor: Option<TlsAcceptor>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Io(std::io::Error::new(e.kind(), format!("bind {addr}: {e}"))))?;
        info!("IMAP server listening on {addr}");
        Ok(Self {
            listener,
            ctx: Arc::new(ctx),
            acceptor,
        })
    }

    /// The bound address (useful with port 0).
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever. Each connection runs in its own
    /// task; a failed accept is logged and does not stop the server.
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("IMAP accept failed: {e}");
                    continue;
                }
            };
            debug!("IMAP connection from {peer}");
            let ctx = Arc::clone(&self.ctx);
            let acceptor = self.acceptor.clone();
            tokio::spawn(async move {
                serve_connection(stream, acceptor, &ctx).await;
            });
        }
    }
}

/// Drive one connection from greeting to close.
pub(crate) async fn serve_connection(
    stream: TcpStream,
    acceptor: Option<TlsAcceptor>,
    ctx: &ImapContext,
) {
    let mut session = Session::new(acceptor.is_some());
    let mut reader = BufReader::new(stream);

    let greeting = format!(
        "* OK [CAPABILITY {}] selfmail IMAP4rev1 server ready\r\n",
        session.capability_list()
    );
    if write_line(&mut reader, &greeting).await.is_err() {
        return;
    }

    match run_session(&mut reader, ctx, &mut session).await {
        SessionEnd::Closed => {}
        SessionEnd::StartTls => {
            let Some(acceptor) = acceptor else {
                // The session gate refuses STARTTLS without an
                // acceptor, so this cannot be reached.
                return;
            };
            // into_inner drops the read buffer: leftover plaintext
            // input does not leak into the TLS session.
            let tcp = reader.into_inner();
            let tls = match acceptor.accept(tcp).await {
                Ok(tls) => tls,
                Err(e) => {
                    debug!("TLS handshake failed: {e}");
                    return;
                }
            };
            session.tls_active = true;
            let mut reader = BufReader::new(tls);
            let _ = run_session(&mut reader, ctx, &mut session).await;
        }
    }
}
