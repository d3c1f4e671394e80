//! IMAP message flags and their Maildir encoding
//!
//! Provides a strongly-typed enum for IMAP system flags instead of raw
//! strings, plus the mapping to the single-letter Maildir filename
//! codes (`S` Seen, `R` Answered, `F` Flagged, `T` Deleted, `D` Draft).
//! `\Recent` has no letter: it is derived from a message still sitting
//! in the `new/` subdirectory.

use std::fmt;

/// An IMAP system flag.
///
/// # Examples
///
/// ```
/// use selfmail::flag::Flag;
///
/// assert_eq!(Flag::Seen.as_imap_str(), "\\Seen");
/// assert_eq!(Flag::Seen.maildir_letter(), Some('S'));
/// assert_eq!(Flag::Recent.maildir_letter(), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Message has been read (`\Seen`).
    Seen,
    /// Message has been answered (`\Answered`).
    Answered,
    /// Message is flagged for attention (`\Flagged`).
    Flagged,
    /// Message is marked for deletion (`\Deleted`).
    Deleted,
    /// Message is a draft (`\Draft`).
    Draft,
    /// Message arrived since the folder was last selected (`\Recent`).
    /// Derived from residency in `new/`, never stored in a filename.
    Recent,
}

impl Flag {
    /// The IMAP wire representation, including the leading backslash.
    #[must_use]
    pub const fn as_imap_str(self) -> &'static str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
        }
    }

    /// The Maildir filename letter, or `None` for `\Recent`.
    #[must_use]
    pub const fn maildir_letter(self) -> Option<char> {
        match self {
            Self::Seen => Some('S'),
            Self::Answered => Some('R'),
            Self::Flagged => Some('F'),
            Self::Deleted => Some('T'),
            Self::Draft => Some('D'),
            Self::Recent => None,
        }
    }

    /// Parse a Maildir filename letter.
    #[must_use]
    pub const fn from_maildir_letter(letter: char) -> Option<Self> {
        match letter {
            'S' => Some(Self::Seen),
            'R' => Some(Self::Answered),
            'F' => Some(Self::Flagged),
            'T' => Some(Self::Deleted),
            'D' => Some(Self::Draft),
            _ => None,
        }
    }

    /// Parse an IMAP flag atom, case-insensitively.
    #[must_use]
    pub fn from_imap_str(atom: &str) -> Option<Self> {
        match atom.to_ascii_uppercase().as_str() {
            "\\SEEN" => Some(Self::Seen),
            "\\ANSWERED" => Some(Self::Answered),
            "\\FLAGGED" => Some(Self::Flagged),
            "\\DELETED" => Some(Self::Deleted),
            "\\DRAFT" => Some(Self::Draft),
            "\\RECENT" => Some(Self::Recent),
            _ => None,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap_str())
    }
}

/// Map stored Maildir letters to IMAP atoms, prepending `\Recent` for
/// messages still in `new/`. Unknown letters are ignored.
#[must_use]
pub fn letters_to_atoms(letters: &str, recent: bool) -> Vec<&'static str> {
    let mut atoms = Vec::new();
    if recent {
        atoms.push(Flag::Recent.as_imap_str());
    }
    atoms.extend(
        letters
            .chars()
            .filter_map(Flag::from_maildir_letter)
            .map(Flag::as_imap_str),
    );
    atoms
}

/// Map IMAP flag atoms to the sorted, deduplicated Maildir letter
/// string used as the `:2,` filename suffix. `\Recent` and unknown
/// keywords carry no letter and are dropped.
pub fn atoms_to_letters<'a, I>(atoms: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut letters: Vec<char> = atoms
        .into_iter()
        .filter_map(Flag::from_imap_str)
        .filter_map(Flag::maildir_letter)
        .collect();
    letters.sort_unstable();
    letters.dedup();
    letters.into_iter().collect()
}

/// Sort and deduplicate a raw Maildir letter string. Maildir requires
/// the flag letters in the filename to be in ASCII order.
#[must_use]
pub fn normalize_letters(letters: &str) -> String {
    let mut chars: Vec<char> = letters.chars().collect();
    chars.sort_unstable();
    chars.dedup();
    chars.into_iter().collect()
}
