#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Launcher for the selfmail server pair (SMTP submission + IMAP)

use anyhow::Context as _;
use clap::Parser;
use selfmail::imap::{ImapContext, ImapServer};
use selfmail::smtp::{SmtpContext, SmtpServer};
use selfmail::{Config, StaticAuthenticator, Store};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "selfmail")]
#[command(about = "Self-hosted SMTP submission and IMAP4rev1 server over Maildir storage")]
struct Args {
    /// Path to the JSON configuration file; environment variables
    /// (and `.env`) are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Build the STARTTLS acceptor from the configured PEM files, if any.
fn tls_acceptor(config: &Config) -> anyhow::Result<Option<TlsAcceptor>> {
    let Some(paths) = &config.tls else {
        return Ok(None);
    };

    let mut cert_reader = std::io::BufReader::new(
        std::fs::File::open(&paths.cert_path)
            .with_context(|| format!("cannot open {}", paths.cert_path.display()))?,
    );
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .context("cannot parse certificate chain")?;

    let mut key_reader = std::io::BufReader::new(
        std::fs::File::open(&paths.key_path)
            .with_context(|| format!("cannot open {}", paths.key_path.display()))?,
    );
    let key = rustls_pemfile::private_key(&mut key_reader)
        .context("cannot parse private key")?
        .context("no private key found")?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("invalid TLS material")?;
    Ok(Some(TlsAcceptor::from(Arc::new(tls_config))))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    let store = Store::new(&config.storage_root, config.host_name.as_str());
    store.init().context("cannot create storage root")?;
    let auth = Arc::new(StaticAuthenticator::new(config.users.clone()));
    let acceptor = tls_acceptor(&config)?;

    let imap = ImapServer::bind(
        &format!("{}:{}", config.host_name, config.imap_port),
        ImapContext {
            store: store.clone(),
            auth: auth.clone(),
            host_name: config.host_name.clone(),
        },
        acceptor.clone(),
    )
    .await
    .context("cannot bind IMAP listener")?;

    let smtp = SmtpServer::bind(
        &format!("{}:{}", config.host_name, config.smtp_port),
        SmtpContext {
            store,
            auth,
            host_name: config.host_name.clone(),
        },
        acceptor,
    )
    .await
    .context("cannot bind SMTP listener")?;

    tokio::try_join!(imap.run(), smtp.run())?;
    Ok(())
}
