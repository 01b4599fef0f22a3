//! Password capture from raw keystrokes.
//!
//! While a session waits for a password, every `remote-input` chunk is fed
//! through a [`CredentialBuffer`]. Control bytes are interpreted one
//! character at a time:
//!
//! - `0x7F` (DEL, what terminals send for Backspace) and `0x08` (BS) delete
//!   the previous character, never underflowing.
//! - A single carriage-return or line-feed byte completes the password.
//!   Anything after it in the same chunk is discarded.
//! - Every other character is appended verbatim.

use std::fmt;

const DEL: char = '\u{7f}';
const BS: char = '\u{08}';

/// A captured password. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Borrow the secret for handing to the remote adapter.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Result of feeding a chunk into the buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum CredentialInput {
    /// More keystrokes are needed.
    Pending,
    /// Enter was pressed; the buffer has been emptied.
    Complete(Credential),
}

/// Accumulates password keystrokes until Enter.
#[derive(Default)]
pub struct CredentialBuffer {
    chars: Vec<char>,
}

impl CredentialBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw input chunk.
    pub fn feed(&mut self, chunk: &str) -> CredentialInput {
        for c in chunk.chars() {
            match c {
                DEL | BS => {
                    self.chars.pop();
                }
                '\r' | '\n' => {
                    let secret: String = self.chars.drain(..).collect();
                    return CredentialInput::Complete(Credential(secret));
                }
                other => self.chars.push(other),
            }
        }
        CredentialInput::Pending
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn clear(&mut self) {
        self.chars.clear();
    }
}

impl fmt::Debug for CredentialBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialBuffer(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(chunks: &[&str]) -> Option<String> {
        let mut buffer = CredentialBuffer::new();
        for chunk in chunks {
            if let CredentialInput::Complete(c) = buffer.feed(chunk) {
                return Some(c.expose().to_string());
            }
        }
        None
    }

    #[test]
    fn test_single_keystrokes() {
        assert_eq!(capture(&["s", "3", "\r"]), Some("s3".to_string()));
    }

    #[test]
    fn test_backspace_deletes_previous() {
        assert_eq!(
            capture(&["s", "e", "c", "\u{7f}", "3", "\r"]),
            Some("se3".to_string())
        );
    }

    #[test]
    fn test_backspace_never_underflows() {
        assert_eq!(
            capture(&["\u{7f}", "\u{7f}", "a", "\u{7f}", "\u{7f}", "b", "\n"]),
            Some("b".to_string())
        );
    }

    #[test]
    fn test_ctrl_h_also_deletes() {
        assert_eq!(capture(&["ab\u{08}c\r"]), Some("ac".to_string()));
    }

    #[test]
    fn test_embedded_backspace_in_chunk() {
        assert_eq!(capture(&["hunter\u{7f}\u{7f}22", "\r"]), Some("hunt22".to_string()));
    }

    #[test]
    fn test_lf_terminates() {
        assert_eq!(capture(&["pw", "\n"]), Some("pw".to_string()));
    }

    #[test]
    fn test_crlf_in_pasted_chunk() {
        assert_eq!(capture(&["pasted\r\n"]), Some("pasted".to_string()));
    }

    #[test]
    fn test_trailing_input_after_enter_is_discarded() {
        let mut buffer = CredentialBuffer::new();
        match buffer.feed("pw\rls -la\r") {
            CredentialInput::Complete(c) => assert_eq!(c.expose(), "pw"),
            CredentialInput::Pending => panic!("expected completion"),
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_escaped_sequences_are_literal() {
        // A two-character backslash-r is content, not Enter.
        assert_eq!(capture(&["a\\r", "\r"]), Some("a\\r".to_string()));
    }

    #[test]
    fn test_empty_password() {
        assert_eq!(capture(&["\r"]), Some(String::new()));
    }

    #[test]
    fn test_pending_until_enter() {
        let mut buffer = CredentialBuffer::new();
        assert_eq!(buffer.feed("abc"), CredentialInput::Pending);
        assert_eq!(buffer.len(), 3);
        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multibyte_characters() {
        assert_eq!(capture(&["pä", "ß\u{7f}", "s\r"]), Some("päs".to_string()));
    }

    #[test]
    fn test_debug_redacts() {
        let mut buffer = CredentialBuffer::new();
        buffer.feed("secret");
        assert!(!format!("{:?}", buffer).contains("secret"));
        assert!(!format!("{:?}", Credential::new("secret")).contains("secret"));
    }
}
