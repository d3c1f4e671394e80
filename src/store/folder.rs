//! Per-folder mailbox handle
//!
//! [`Folder`] composes the Maildir adapter and the UID registry into
//! the handle the protocol layers work with: counts, UID lookups,
//! message load/store with UID assignment, flag mutation.
//!
//! Every operation takes the user's registry mutex, enumerates the
//! Maildir, reconciles, and mutates -- all inside one
//! `spawn_blocking` closure. The mutex is therefore held only for the
//! filesystem critical section, never across network I/O, and Maildir
//! mutation is serialized with reconciliation.

use super::maildir::{self, Maildir, Subdir};
use super::registry::UserRegistry;
use super::StoreInner;
use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError};
use std::time::SystemTime;
use tokio::task;

/// A message loaded through a [`Folder`], together with the state the
/// FETCH engine needs.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub key: String,
    pub uid: u32,
    /// Persistent Maildir flag letters.
    pub flags: String,
    /// Whether the file still resides in `new/`.
    pub recent: bool,
    pub raw: Vec<u8>,
    pub internal_date: SystemTime,
}

impl StoredMessage {
    #[must_use]
    pub fn has_flag(&self, letter: char) -> bool {
        self.flags.contains(letter)
    }
}

/// Handle to one folder of one user.
///
/// Cheap to clone; all methods are async wrappers that run their
/// filesystem work on the blocking pool.
#[derive(Clone)]
pub struct Folder {
    store: Arc<StoreInner>,
    user: String,
    /// `None` for the INBOX, `/`-separated path otherwise.
    name: Option<String>,
}

impl Folder {
    pub(super) fn new(store: Arc<StoreInner>, user: &str, name: Option<&str>) -> Self {
        Self {
            store,
            user: user.to_string(),
            name: name.map(ToString::to_string),
        }
    }

    /// The key this folder uses in the UID registry document.
    #[must_use]
    pub fn folder_key(&self) -> &str {
        self.name.as_deref().unwrap_or("INBOX")
    }

    fn user_root(&self) -> PathBuf {
        self.store.root().join(&self.user)
    }

    fn maildir_path(&self) -> PathBuf {
        let mut path = self.user_root();
        if let Some(name) = &self.name {
            for part in name.split('/') {
                path.push(format!(".{part}"));
            }
        }
        path
    }

    fn open_maildir(&self) -> Result<Maildir> {
        Maildir::open(self.maildir_path())
    }

    fn with_registry<R>(&self, f: impl FnOnce(&mut UserRegistry) -> Result<R>) -> Result<R> {
        let lock = self.store.registry_for(&self.user);
        let mut registry = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut registry)
    }

    /// Open the Maildir, reconcile the registry against its current
    /// keys, then run `f` -- all under the user's registry mutex.
    fn reconciled<R>(
        &self,
        f: impl FnOnce(&mut UserRegistry, &Maildir) -> Result<R>,
    ) -> Result<R> {
        let maildir = self.open_maildir()?;
        self.with_registry(|registry| {
            let current: BTreeSet<String> = maildir.list_keys()?.into_iter().collect();
            registry.reconcile(self.folder_key(), &current)?;
            f(registry, &maildir)
        })
    }

    async fn run_blocking<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(Self) -> Result<R> + Send + 'static,
    {
        let this = self.clone();
        task::spawn_blocking(move || f(this))
            .await
            .map_err(|e| Error::Storage(format!("storage task failed: {e}")))?
    }

    /// Whether the folder exists on disk as a selectable Maildir.
    pub async fn exists(&self) -> bool {
        self.run_blocking(|f| Ok(Maildir::is_maildir(&f.maildir_path())))
            .await
            .unwrap_or(false)
    }

    /// Create the folder (and any missing ancestors, each a Maildir of
    /// its own).
    pub async fn create(&self) -> Result<()> {
        self.run_blocking(|f| {
            let mut path = f.user_root();
            Maildir::create(&path)?;
            if let Some(name) = &f.name {
                for part in name.split('/') {
                    path.push(format!(".{part}"));
                    Maildir::create(&path)?;
                }
            }
            Ok(())
        })
        .await
    }

    pub async fn message_count(&self) -> Result<usize> {
        self.run_blocking(|f| Ok(f.open_maildir()?.list_keys()?.len()))
            .await
    }

    /// Messages still in `new/`.
    pub async fn recent_count(&self) -> Result<usize> {
        self.run_blocking(|f| f.open_maildir()?.recent_count())
            .await
    }

    pub async fn uidvalidity(&self) -> Result<u64> {
        self.run_blocking(|f| {
            f.with_registry(|registry| Ok(registry.record(f.folder_key())?.uidvalidity))
        })
        .await
    }

    /// UIDNEXT, reconciled against the filesystem first.
    pub async fn uidnext(&self) -> Result<u32> {
        self.run_blocking(|f| f.reconciled(|registry, _| Ok(registry.record(f.folder_key())?.uidnext)))
            .await
    }

    /// Live `(uid, key)` pairs sorted by UID ascending -- the ordering
    /// that defines sequence numbers.
    pub async fn uid_key_pairs(&self) -> Result<Vec<(u32, String)>> {
        self.run_blocking(|f| {
            f.reconciled(|registry, _| {
                Ok(registry
                    .record(f.folder_key())?
                    .uid_to_key
                    .iter()
                    .map(|(uid, key)| (*uid, key.clone()))
                    .collect())
            })
        })
        .await
    }

    /// 1-based sequence number of the first message without `S`, in
    /// UID order.
    pub async fn first_unseen_seq(&self) -> Result<Option<usize>> {
        self.run_blocking(|f| {
            f.reconciled(|registry, maildir| {
                for (seq, (_, key)) in registry
                    .record(f.folder_key())?
                    .uid_to_key
                    .iter()
                    .enumerate()
                    .map(|(i, pair)| (i + 1, pair))
                {
                    match maildir.flags_of(key) {
                        Ok((_, flags)) if !flags.contains('S') => return Ok(Some(seq)),
                        Ok(_) => {}
                        Err(Error::MessageGone(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(None)
            })
        })
        .await
    }

    /// Count of messages without the `S` flag (STATUS UNSEEN).
    pub async fn unseen_count(&self) -> Result<usize> {
        self.run_blocking(|f| {
            let maildir = f.open_maildir()?;
            let mut unseen = 0;
            for key in maildir.list_keys()? {
                match maildir.flags_of(&key) {
                    Ok((_, flags)) if !flags.contains('S') => unseen += 1,
                    Ok(_) | Err(Error::MessageGone(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(unseen)
        })
        .await
    }

    /// Append a message and assign its UID.
    ///
    /// The registry entry is persisted before the `tmp/` -> `new/`
    /// rename: a crash in between leaves an orphan mapping that the
    /// next reconcile drops, never a message without a UID.
    pub async fn save(&self, raw: Vec<u8>) -> Result<u32> {
        self.run_blocking(move |f| {
            let maildir = f.open_maildir()?;
            f.with_registry(|registry| {
                let current: BTreeSet<String> = maildir.list_keys()?.into_iter().collect();
                registry.reconcile(f.folder_key(), &current)?;

                let key = maildir::generate_key(f.store.host_name());
                maildir.write_tmp(&key, &raw)?;
                let uid = registry.append(f.folder_key(), &key)?;
                if let Err(e) = maildir.commit_new(&key) {
                    maildir.discard_tmp(&key);
                    return Err(e);
                }
                Ok(uid)
            })
        })
        .await
    }

    /// Load a message by UID. `Ok(None)` when the UID is unknown or
    /// the file vanished; with `mark_seen`, the `S` flag is added (and
    /// the file moved to `cur/`) before the message is returned.
    pub async fn load_by_uid(&self, uid: u32, mark_seen: bool) -> Result<Option<StoredMessage>> {
        self.run_blocking(move |f| {
            f.reconciled(|registry, maildir| {
                let Some(key) = registry.record(f.folder_key())?.uid_to_key.get(&uid).cloned()
                else {
                    return Ok(None);
                };
                Self::load_message(maildir, &key, uid, mark_seen)
            })
        })
        .await
    }

    /// Load a message by key; see [`Folder::load_by_uid`].
    pub async fn load_by_key(&self, key: String, mark_seen: bool) -> Result<Option<StoredMessage>> {
        self.run_blocking(move |f| {
            f.reconciled(|registry, maildir| {
                let Some(uid) = registry.record(f.folder_key())?.key_to_uid.get(&key).copied()
                else {
                    return Ok(None);
                };
                Self::load_message(maildir, &key, uid, mark_seen)
            })
        })
        .await
    }

    fn load_message(
        maildir: &Maildir,
        key: &str,
        uid: u32,
        mark_seen: bool,
    ) -> Result<Option<StoredMessage>> {
        if mark_seen {
            match maildir.flags_of(key) {
                Ok((_, flags)) if !flags.contains('S') => {
                    match maildir.set_flags(key, &format!("{flags}S")) {
                        Ok(()) | Err(Error::MessageGone(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(_) => {}
                Err(Error::MessageGone(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        match maildir.read(key) {
            Ok(file) => Ok(Some(StoredMessage {
                key: file.key,
                uid,
                flags: file.flags,
                recent: file.subdir == Subdir::New,
                raw: file.raw,
                internal_date: file.modified,
            })),
            Err(Error::MessageGone(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Current flag letters and `\Recent` state of a message, without
    /// reading its contents. `Ok(None)` when it vanished.
    pub async fn message_flags(&self, key: String) -> Result<Option<(String, bool)>> {
        self.run_blocking(move |f| {
            let maildir = f.open_maildir()?;
            match maildir.flags_of(&key) {
                Ok((subdir, flags)) => Ok(Some((flags, subdir == Subdir::New))),
                Err(Error::MessageGone(_)) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Replace the persistent flag set of a message. `Ok(false)` when
    /// the message vanished.
    pub async fn set_flags(&self, key: String, letters: String) -> Result<bool> {
        self.run_blocking(move |f| {
            let maildir = f.open_maildir()?;
            f.with_registry(|_| match maildir.set_flags(&key, &letters) {
                Ok(()) => Ok(true),
                Err(Error::MessageGone(_)) => Ok(false),
                Err(e) => Err(e),
            })
        })
        .await
    }

    /// Delete a message file and drop its registry mapping.
    pub async fn delete_message(&self, key: String) -> Result<()> {
        self.run_blocking(move |f| {
            let maildir = f.open_maildir()?;
            f.with_registry(|registry| {
                match maildir.remove(&key) {
                    Ok(()) | Err(Error::MessageGone(_)) => {}
                    Err(e) => return Err(e),
                }
                let current: BTreeSet<String> = maildir.list_keys()?.into_iter().collect();
                registry.reconcile(f.folder_key(), &current)
            })
        })
        .await
    }

    /// Names of immediate subfolders.
    pub async fn list_folders(&self) -> Result<Vec<String>> {
        self.run_blocking(|f| f.open_maildir()?.subfolders()).await
    }

    /// LIST attributes of this folder.
    pub async fn attributes(&self) -> Result<Vec<&'static str>> {
        self.run_blocking(|f| {
            let path = f.maildir_path();
            let mut attributes = Vec::new();
            if !path.join("cur").is_dir() {
                attributes.push("\\Noselect");
            }
            let has_new = std::fs::read_dir(path.join("new"))
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false);
            attributes.push(if has_new { "\\Marked" } else { "\\Unmarked" });
            let has_children = std::fs::read_dir(&path).is_ok_and(|entries| {
                entries.flatten().any(|entry| {
                    entry.file_name().to_string_lossy().starts_with('.')
                        && entry.path().is_dir()
                        && Maildir::is_maildir(&entry.path())
                })
            });
            attributes.push(if has_children {
                "\\HasChildren"
            } else {
                "\\HasNoChildren"
            });
            Ok(attributes)
        })
        .await
    }
}
