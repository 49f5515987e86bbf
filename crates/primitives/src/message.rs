//! Content-addressed message identifiers.

use core::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifier of a message, derived from its ciphertext payload.
///
/// The value is `base64(sha256(payload))`, so two identical ciphertexts
/// always share an identifier. Identifiers are never transmitted alongside
/// the bytes they name; a receiver recomputes them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Box<str>);

impl MessageId {
    /// Derives the identifier for a payload.
    pub fn of(payload: &[u8]) -> Self {
        let digest = Sha256::digest(payload);
        Self(STANDARD.encode(digest).into_boxed_str())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value.into_boxed_str())
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{from_value as from_json_value, json, to_string as to_json_string};

    use super::*;

    #[test]
    fn test_content_address() {
        let id = MessageId::of(b"Hello World");

        assert_eq!(id.as_str(), "pZGm1Av0IEBKARczz7exkNYsZb8LzaMrV7J32a2fFG4=");
    }

    #[test]
    fn test_identical_payloads_share_id() {
        assert_eq!(MessageId::of(b"payload"), MessageId::of(b"payload"));
        assert_ne!(MessageId::of(b"payload"), MessageId::of(b"payloae"));
    }

    #[test]
    fn test_serde() {
        let id = MessageId::of(b"Hello World");

        assert_eq!(
            to_json_string(&id).unwrap(),
            "\"pZGm1Av0IEBKARczz7exkNYsZb8LzaMrV7J32a2fFG4=\""
        );

        assert_eq!(
            from_json_value::<MessageId>(json!("pZGm1Av0IEBKARczz7exkNYsZb8LzaMrV7J32a2fFG4="))
                .unwrap(),
            id
        );
    }
}
