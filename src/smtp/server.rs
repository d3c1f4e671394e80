//! SMTP listener and STARTTLS upgrade.
//!
//! Mirrors the IMAP listener: accept, greet, run the session loop,
//! and on STARTTLS swap the transport and start over with a clean
//! protocol state (RFC 3207 requires discarding everything learned on
//! the plaintext half).

use super::session::{run_smtp_session, SmtpContext, SmtpEnd, SmtpSession};
use crate::error::{Error, Result};
use crate::imap::io::write_line;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// The SMTP submission server.
pub struct SmtpServer {
    listener: TcpListener,
    ctx: Arc<SmtpContext>,
    acceptor: Option<TlsAcceptor>,
}

impl SmtpServer {
    /// Bind the listening socket. Fails when the address is taken.
    pub async fn bind(
        addr: &str,
        ctx: SmtpContext,
        acceptor: Option<TlsAcceptor>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Io(std::io::Error::new(e.kind(), format!("bind {addr}: {e}"))))?;
        info!("SMTP server listening on {addr}");
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

    /// Accept connections forever.
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("SMTP accept failed: {e}");
                    continue;
                }
            };
            debug!("SMTP connection from {peer}");
            let ctx = Arc::clone(&self.ctx);
            let acceptor = self.acceptor.clone();
            tokio::spawn(async move {
                serve_connection(stream, acceptor, &ctx).await;
            });
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    acceptor: Option<TlsAcceptor>,
    ctx: &SmtpContext,
) {
    let mut session = SmtpSession::new(acceptor.is_some());
    let mut reader = BufReader::new(stream);

    let greeting = format!("220 {} selfmail SMTP service ready\r\n", ctx.host_name);
    if write_line(&mut reader, &greeting).await.is_err() {
        return;
    }

    match run_smtp_session(&mut reader, ctx, &mut session).await {
        SmtpEnd::Closed => {}
        SmtpEnd::StartTls => {
            let Some(acceptor) = acceptor else {
                return;
            };
            let tcp = reader.into_inner();
            let tls = match acceptor.accept(tcp).await {
                Ok(tls) => tls,
                Err(e) => {
                    debug!("SMTP TLS handshake failed: {e}");
                    return;
                }
            };
            // Fresh protocol state on the encrypted channel.
            let mut session = SmtpSession::new(true);
            session.tls_active = true;
            let mut reader = BufReader::new(tls);
            let _ = run_smtp_session(&mut reader, ctx, &mut session).await;
        }
    }
}
