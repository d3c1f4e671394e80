//! Command-line tokenizer
//!
//! IMAP command lines split on whitespace, with double-quoted strings
//! kept whole. Inside quotes, `\"` and `\\` are escapes. Quotes are
//! stripped from the produced tokens: `LOGIN "a b" c` tokenizes to
//! `LOGIN`, `a b`, `c`.

/// Tokenize one command line (without its CRLF).
///
/// Returns an error message suitable for a `BAD` response when a
/// quoted string is left open.
pub fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                // Quoted string: consume through the closing quote.
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => return Err("unterminated quoted string".to_string()),
                        },
                        Some(inner) => current.push(inner),
                        None => return Err("unterminated quoted string".to_string()),
                    }
                }
            }
            ' ' | '\t' => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            _ => {
                in_token = true;
                current.push(ch);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}
