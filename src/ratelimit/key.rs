//! Limit key derivation and handling.

use std::fmt::Write as _;

/// Key used when a caller has no identifier.
pub const GUEST_KEY: &str = "guest";

/// Identifies the subject a window is tracked for.
///
/// Built from the caller's identifier (typically a chat or web session id),
/// optionally namespaced so that two scopes limiting the same session keep
/// separate windows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimitKey {
    /// Optional scope namespace
    pub namespace: Option<String>,
    /// Caller identifier, or the guest key
    pub subject: String,
}

impl LimitKey {
    /// Create a key from a caller identifier.
    ///
    /// Missing, empty, or whitespace-only identifiers fall back to `guest`.
    /// Any other identifier is kept byte for byte.
    pub fn new(subject: Option<&str>, guest: &str) -> Self {
        let subject = match subject {
            Some(s) if !s.trim().is_empty() => s.to_string(),
            _ => guest.to_string(),
        };

        Self {
            namespace: None,
            subject,
        }
    }

    /// Place the key under a namespace.
    pub fn with_namespace(mut self, namespace: Option<&str>) -> Self {
        self.namespace = namespace.filter(|n| !n.is_empty()).map(str::to_string);
        self
    }

    /// The key as handed to a store.
    ///
    /// `:` and `%` are escaped in both parts, so the only bare `:` is the
    /// namespace separator and an unscoped subject can never spell a
    /// namespaced key.
    pub fn to_string_key(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!(
                "{}:{}",
                escape_separator(namespace),
                escape_separator(&self.subject)
            ),
            None => escape_separator(&self.subject),
        }
    }

    /// Whether this key is the guest fallback.
    pub fn is_guest(&self, guest: &str) -> bool {
        self.subject == guest
    }
}

impl std::fmt::Display for LimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

fn escape_separator(part: &str) -> String {
    part.replace('%', "%25").replace(':', "%3A")
}

/// Encode a store key so it is safe as a single file name component.
///
/// `[A-Za-z0-9_-]` pass through; every other byte becomes `%XX`.
pub fn encode_file_component(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' => out.push(byte as char),
            _ => {
                let _ = write!(out, "%{:02X}", byte);
            }
        }
    }
    out
}
