//! Server configuration
//!
//! Configuration is a JSON document (listening host, SMTP/IMAP ports,
//! storage root, flat user map, optional TLS material paths). It can
//! also be assembled from environment variables, reading a `.env` file
//! if present -- convenient for development setups.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Paths to PEM-encoded TLS material for STARTTLS.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Hostname the servers bind to and the local mail domain.
    pub host_name: String,
    pub imap_port: u16,
    pub smtp_port: u16,
    /// Directory holding one Maildir tree per user.
    pub storage_root: PathBuf,
    /// Flat username -> password map for the built-in auth backend.
    #[serde(default)]
    pub users: HashMap<String, String>,
    /// When absent, STARTTLS is not advertised.
    #[serde(default)]
    pub tls: Option<TlsPaths>,
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Assemble configuration from environment variables.
    ///
    /// Reads from `.env` if present. All variables are optional:
    /// - `MAIL_HOST` (default: `localhost`)
    /// - `MAIL_IMAP_PORT` (default: `1143`)
    /// - `MAIL_SMTP_PORT` (default: `1587`)
    /// - `MAIL_STORAGE_ROOT` (default: `./mail`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            host_name: env::var("MAIL_HOST").unwrap_or_else(|_| "localhost".to_string()),
            imap_port: port_var("MAIL_IMAP_PORT", 1143)?,
            smtp_port: port_var("MAIL_SMTP_PORT", 1587)?,
            storage_root: env::var("MAIL_STORAGE_ROOT")
                .map_or_else(|_| PathBuf::from("./mail"), PathBuf::from),
            users: HashMap::new(),
            tls: None,
        })
    }
}

fn port_var(name: &str, default: u16) -> Result<u16> {
    env::var(name).map_or(Ok(default), |raw| {
        raw.parse()
            .map_err(|e| Error::Config(format!("invalid {name}: {e}")))
    })
}
