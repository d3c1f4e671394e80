//! Maildir filesystem adapter
//!
//! Each message is one file. Delivery writes to `tmp/` and renames
//! into `new/`, so readers never observe a partial message. The
//! filename base before `:2,` is the message key; the letters after it
//! are the persistent flags. Moving a file from `new/` to `cur/`
//! records that a reader has taken note of it.

use crate::error::{Error, Result};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Separator between the message key and its flag letters.
pub const INFO_SEPARATOR: &str = ":2,";

static DELIVERY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a fresh message key following the Maildir delivery
/// convention. Unique per process via the atomic counter; unique
/// across processes via pid and microseconds.
#[must_use]
pub fn generate_key(host: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let seq = DELIVERY_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(
        "{}.M{}P{}Q{seq}.{host}",
        now.as_secs(),
        now.subsec_micros(),
        std::process::id()
    )
}

/// Which subdirectory a message file lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subdir {
    New,
    Cur,
}

impl Subdir {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Cur => "cur",
        }
    }
}

/// A message file read from disk.
#[derive(Debug, Clone)]
pub struct MessageFile {
    pub key: String,
    pub subdir: Subdir,
    /// Maildir flag letters from the `:2,` suffix, alphabetical.
    pub flags: String,
    pub raw: Vec<u8>,
    /// Delivery time, taken from the file modification time.
    pub modified: SystemTime,
}

/// One Maildir directory (`cur/`, `new/`, `tmp/`).
#[derive(Debug, Clone)]
pub struct Maildir {
    path: PathBuf,
}

impl Maildir {
    /// Open an existing Maildir. Fails with [`Error::MailboxMissing`]
    /// when the three subdirectories are not all present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !Self::is_maildir(&path) {
            return Err(Error::MailboxMissing(path.display().to_string()));
        }
        Ok(Self { path })
    }

    /// Create a Maildir (and any missing parents), then open it.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path)?;
        for sub in ["cur", "new", "tmp"] {
            fs::create_dir_all(path.join(sub))?;
        }
        Ok(Self { path })
    }

    #[must_use]
    pub fn is_maildir(path: &Path) -> bool {
        path.join("cur").is_dir() && path.join("new").is_dir() && path.join("tmp").is_dir()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Split a filename into `(key, flags)`.
    fn split_name(name: &str) -> (&str, &str) {
        name.find(INFO_SEPARATOR).map_or((name, ""), |at| {
            (&name[..at], &name[at + INFO_SEPARATOR.len()..])
        })
    }

    fn entries(&self, subdir: Subdir) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.path.join(subdir.as_str()))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    /// All message keys, the union of `new/` and `cur/`, sorted.
    pub fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for subdir in [Subdir::New, Subdir::Cur] {
            for name in self.entries(subdir)? {
                keys.push(Self::split_name(&name).0.to_string());
            }
        }
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    /// Number of files in `new/`, the `\Recent` count.
    pub fn recent_count(&self) -> Result<usize> {
        Ok(self.entries(Subdir::New)?.len())
    }

    /// Find the file currently holding `key`.
    fn locate(&self, key: &str) -> Result<(Subdir, PathBuf, String)> {
        for subdir in [Subdir::Cur, Subdir::New] {
            for name in self.entries(subdir)? {
                let (base, flags) = Self::split_name(&name);
                if base == key {
                    let path = self.path.join(subdir.as_str()).join(&name);
                    return Ok((subdir, path, flags.to_string()));
                }
            }
        }
        Err(Error::MessageGone(key.to_string()))
    }

    /// The subdirectory and flag letters of a message, without reading
    /// its contents.
    pub fn flags_of(&self, key: &str) -> Result<(Subdir, String)> {
        let (subdir, _, flags) = self.locate(key)?;
        Ok((subdir, flags))
    }

    /// Read a message by key. [`Error::MessageGone`] when another
    /// client removed it between enumeration and access.
    pub fn read(&self, key: &str) -> Result<MessageFile> {
        let (subdir, path, flags) = self.locate(key)?;
        let raw = fs::read(&path).map_err(|e| gone_if_missing(key, e))?;
        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .unwrap_or_else(|_| SystemTime::now());
        Ok(MessageFile {
            key: key.to_string(),
            subdir,
            flags,
            raw,
            modified,
        })
    }

    /// Write message bytes to `tmp/<key>`, synced to disk.
    pub fn write_tmp(&self, key: &str, raw: &[u8]) -> Result<PathBuf> {
        let path = self.path.join("tmp").join(key);
        let mut file = fs::File::create(&path)?;
        file.write_all(raw)?;
        file.sync_all()?;
        Ok(path)
    }

    /// Atomically publish a previously written `tmp/` file into `new/`.
    pub fn commit_new(&self, key: &str) -> Result<()> {
        let tmp = self.path.join("tmp").join(key);
        let dest = self.path.join("new").join(key);
        fs::rename(&tmp, &dest)?;
        Ok(())
    }

    /// Best-effort removal of an abandoned `tmp/` file.
    pub fn discard_tmp(&self, key: &str) {
        let _ = fs::remove_file(self.path.join("tmp").join(key));
    }

    /// Replace the persistent flag letters of a message.
    ///
    /// A message with any flag set lives in `cur/` with a `:2,<flags>`
    /// suffix; an unflagged message in `new/` stays there untouched.
    pub fn set_flags(&self, key: &str, letters: &str) -> Result<()> {
        let letters = crate::flag::normalize_letters(letters);
        let (subdir, path, current) = self.locate(key)?;
        let dest = if letters.is_empty() && subdir == Subdir::New {
            self.path.join("new").join(key)
        } else {
            self.path
                .join("cur")
                .join(format!("{key}{INFO_SEPARATOR}{letters}"))
        };
        if current != letters || dest != path {
            fs::rename(&path, &dest).map_err(|e| gone_if_missing(key, e))?;
        }
        Ok(())
    }

    /// Delete a message file.
    pub fn remove(&self, key: &str) -> Result<()> {
        let (_, path, _) = self.locate(key)?;
        fs::remove_file(&path).map_err(|e| gone_if_missing(key, e))
    }

    /// Names of immediate subfolders: dot-prefixed child Maildirs,
    /// returned without the leading dot.
    pub fn subfolders(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stripped) = name.strip_prefix('.') {
                    if !stripped.is_empty() && Self::is_maildir(&entry.path()) {
                        names.push(stripped.to_string());
                    }
                }
            }
        }
        names.sort_unstable();
        Ok(names)
    }
}

fn gone_if_missing(key: &str, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::MessageGone(key.to_string())
    } else {
        Error::Io(e)
    }
}
