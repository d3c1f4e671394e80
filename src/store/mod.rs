//! UID-stable Maildir storage
//!
//! One directory per user, laid out the classic Maildir way:
//!
//! ```text
//! <root>/<user>/               INBOX maildir root
//!    cur/  new/  tmp/
//!    .uid_mapping              JSON UID registry (all folders)
//!    .Sent/   cur/ new/ tmp/   subfolder "Sent"
//!    .Drafts/ ...
//! ```
//!
//! ## Module layout
//!
//! - `maildir` -- filesystem adapter (keys, reads, atomic delivery,
//!   flag renames)
//! - `registry` -- per-user `(UIDVALIDITY, UIDNEXT, key<->UID)` document
//! - `folder` -- per-folder handle composing the two, with async
//!   wrappers that run every filesystem critical section on the
//!   blocking pool

pub mod maildir;
pub mod registry;

mod folder;

pub use folder::{Folder, StoredMessage};

use crate::error::Result;
use registry::UserRegistry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Handle to the storage root shared by the IMAP and SMTP servers.
///
/// Owns one registry lock per user; every mailbox operation goes
/// through [`Store::folder`], so there is no process-wide mutable
/// state outside this table.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

pub(crate) struct StoreInner {
    root: PathBuf,
    host_name: String,
    registries: Mutex<HashMap<String, Arc<Mutex<UserRegistry>>>>,
}

impl Store {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, host_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                root: root.into(),
                host_name: host_name.into(),
                registries: Mutex::new(HashMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Create the storage root directory if it does not exist yet.
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.inner.root)?;
        Ok(())
    }

    /// Handle for one folder of one user. `None` selects the INBOX;
    /// subfolder paths use `/` separators (`"Archive/2024"`).
    ///
    /// The handle is cheap: nothing is touched on disk until an
    /// operation runs.
    #[must_use]
    pub fn folder(&self, user: &str, name: Option<&str>) -> Folder {
        let name = name.filter(|n| !n.eq_ignore_ascii_case("INBOX"));
        Folder::new(Arc::clone(&self.inner), user, name)
    }
}

impl StoreInner {
    pub(crate) fn host_name(&self) -> &str {
        &self.host_name
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    /// The registry lock for one user, created on first use.
    pub(crate) fn registry_for(&self, user: &str) -> Arc<Mutex<UserRegistry>> {
        let mut table = self
            .registries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(table.entry(user.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(UserRegistry::new(&self.root.join(user))))
        }))
    }
}
