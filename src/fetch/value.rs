//! Typed FETCH response fragments
//!
//! FETCH data items are heterogeneous: numbers, flag atoms, quoted
//! strings, counted literals, and nested parenthesized lists (ENVELOPE
//! and BODYSTRUCTURE). Each item is modeled as a [`FetchValue`] and
//! serialized by one `write_to` operation, so response fragments are
//! never carried around as untyped strings.

/// One value in a FETCH response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchValue {
    /// Plain integer, e.g. `RFC822.SIZE 1234`.
    Number(u64),
    /// Unquoted atom, e.g. a flag like `\Seen` or `NIL` placeholders
    /// inside structures.
    Atom(String),
    /// Quoted string with `"` and `\` escaped.
    Quoted(String),
    /// Counted literal: `{N}\r\n` followed by exactly N raw bytes.
    Literal(Vec<u8>),
    /// The `NIL` token.
    Nil,
    /// Parenthesized list of values, space-separated.
    List(Vec<FetchValue>),
}

impl FetchValue {
    /// Convenience for an owned atom.
    pub fn atom(s: impl Into<String>) -> Self {
        Self::Atom(s.into())
    }

    /// A quoted string, or `NIL` for `None`.
    pub fn quoted_or_nil(value: Option<&str>) -> Self {
        value.map_or(Self::Nil, |s| Self::Quoted(s.to_string()))
    }

    /// Serialize into the wire representation.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Self::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
            Self::Atom(atom) => out.extend_from_slice(atom.as_bytes()),
            Self::Quoted(s) => {
                out.push(b'"');
                for byte in s.bytes() {
                    match byte {
                        b'"' | b'\\' => {
                            out.push(b'\\');
                            out.push(byte);
                        }
                        // A quoted string cannot carry line breaks.
                        b'\r' | b'\n' => out.push(b' '),
                        _ => out.push(byte),
                    }
                }
                out.push(b'"');
            }
            Self::Literal(bytes) => {
                out.extend_from_slice(format!("{{{}}}\r\n", bytes.len()).as_bytes());
                out.extend_from_slice(bytes);
            }
            Self::Nil => out.extend_from_slice(b"NIL"),
            Self::List(items) => {
                out.push(b'(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(b' ');
                    }
                    item.write_to(out);
                }
                out.push(b')');
            }
        }
    }

    /// Serialize to a fresh buffer. Handy in tests and for single
    /// fragments.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(value: &FetchValue) -> String {
        String::from_utf8(value.to_bytes()).unwrap()
    }

    #[test]
    fn number_and_atom() {
        assert_eq!(rendered(&FetchValue::Number(42)), "42");
        assert_eq!(rendered(&FetchValue::atom("\\Seen")), "\\Seen");
    }

    #[test]
    fn quoted_escapes_specials() {
        assert_eq!(
            rendered(&FetchValue::Quoted("say \"hi\" \\ there".into())),
            "\"say \\\"hi\\\" \\\\ there\""
        );
    }

    #[test]
    fn quoted_flattens_line_breaks() {
        assert_eq!(rendered(&FetchValue::Quoted("a\r\nb".into())), "\"a  b\"");
    }

    #[test]
    fn literal_counts_bytes() {
        assert_eq!(
            rendered(&FetchValue::Literal(b"hello".to_vec())),
            "{5}\r\nhello"
        );
        assert_eq!(rendered(&FetchValue::Literal(Vec::new())), "{0}\r\n");
    }

    #[test]
    fn nested_list() {
        let value = FetchValue::List(vec![
            FetchValue::Nil,
            FetchValue::List(vec![FetchValue::Number(1), FetchValue::atom("\\Seen")]),
        ]);
        assert_eq!(rendered(&value), "(NIL (1 \\Seen))");
    }

    #[test]
    fn quoted_or_nil() {
        assert_eq!(rendered(&FetchValue::quoted_or_nil(None)), "NIL");
        assert_eq!(rendered(&FetchValue::quoted_or_nil(Some("x"))), "\"x\"");
    }
}
