//! Deterministic digests of conversation prefixes.

use std::{
    fmt::{self, Write as _},
    io,
};

use {
    relaygate_common::ChatMessage,
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
};

/// SHA-256 of a canonicalized message list, as 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log fields.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Keys are declared in sorted order so serialization is canonical.
#[derive(Serialize)]
struct CanonicalMessage<'a> {
    content: &'a str,
    role: &'a str,
}

/// Compact JSON with everything outside printable ASCII written as `\uXXXX`
/// (UTF-16 units), so digests match stores written by other relays.
struct AsciiFormatter;

impl serde_json::ser::Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            if (' '..='~').contains(&c) {
                continue;
            }
            writer.write_all(&fragment.as_bytes()[start..i])?;
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = i + c.len_utf8();
        }
        writer.write_all(&fragment.as_bytes()[start..])
    }
}

/// Fingerprint of an ordered message list.
///
/// The canonical form is a compact JSON array of `{"content","role"}`
/// objects with non-ASCII escaped; order and content both change the digest.
pub fn fingerprint(messages: &[ChatMessage]) -> Fingerprint {
    let canonical: Vec<CanonicalMessage<'_>> = messages
        .iter()
        .map(|m| CanonicalMessage {
            content: &m.content,
            role: m.role.as_str(),
        })
        .collect();
    let mut json = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut json, AsciiFormatter);
    // Serializing borrowed strings into a Vec cannot fail.
    let _ = canonical.serialize(&mut ser);
    let digest = Sha256::digest(&json);
    Fingerprint(hex(&digest))
}

/// Lookup key for a request: every message except the newest.
pub fn prefix_fingerprint(messages: &[ChatMessage]) -> Fingerprint {
    let prefix = match messages.split_last() {
        Some((_, rest)) => rest,
        None => messages,
    };
    fingerprint(prefix)
}

/// Key stored after a successful turn: the request history plus the reply,
/// which is what the caller's next request will carry as its prefix.
pub fn next_fingerprint(messages: &[ChatMessage], reply: &str) -> Fingerprint {
    let mut full = Vec::with_capacity(messages.len() + 1);
    full.extend_from_slice(messages);
    full.push(ChatMessage::assistant(reply));
    fingerprint(&full)
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_history_is_hash_of_empty_array() {
        // sha256("[]")
        assert_eq!(
            fingerprint(&[]).as_str(),
            "4f53cda18c2baa0c0354bb5f9a3ecbe5ed12ab4d8e11ba873c2f11161202b945"
        );
    }

    #[test]
    fn canonical_json_shape() {
        let messages = [ChatMessage::user("Hello!")];
        let expected = Sha256::digest(br#"[{"content":"Hello!","role":"user"}]"#);
        assert_eq!(fingerprint(&messages).as_str(), hex(&expected));
    }

    #[test]
    fn non_ascii_is_escaped_as_utf16() {
        let messages = [ChatMessage::user("Gr\u{fc}\u{df}e \u{1f600}\u{7f}")];
        let expected =
            Sha256::digest(br#"[{"content":"Gr\u00fc\u00dfe \ud83d\ude00\u007f","role":"user"}]"#);
        assert_eq!(fingerprint(&messages).as_str(), hex(&expected));
        assert_eq!(
            fingerprint(&messages).as_str(),
            "8f540e079d4a04d98a05be5cea7bf650ef304db3efc8b69079b2a7c15961cc69"
        );
    }

    #[test]
    fn control_characters_use_short_escapes() {
        let messages = [ChatMessage::user("a\nb\t\"c\"\u{1}")];
        let expected = Sha256::digest(br#"[{"content":"a\nb\t\"c\"\u0001","role":"user"}]"#);
        assert_eq!(fingerprint(&messages).as_str(), hex(&expected));
    }

    #[test]
    fn order_and_content_sensitive() {
        let a = [ChatMessage::user("one"), ChatMessage::assistant("two")];
        let b = [ChatMessage::assistant("two"), ChatMessage::user("one")];
        let c = [ChatMessage::user("one"), ChatMessage::assistant("two!")];
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&c));
        assert_eq!(fingerprint(&a), fingerprint(&a.clone()));
    }

    #[test]
    fn role_is_part_of_digest() {
        assert_ne!(
            fingerprint(&[ChatMessage::user("x")]),
            fingerprint(&[ChatMessage::system("x")])
        );
    }

    #[test]
    fn next_turn_prefix_matches_stored_key() {
        let first = vec![
            ChatMessage::system("You are terse."),
            ChatMessage::user("Hello!"),
        ];
        let stored = next_fingerprint(&first, "Hi there.");

        let mut second = first.clone();
        second.push(ChatMessage::assistant("Hi there."));
        second.push(ChatMessage::user("How are you?"));
        assert_eq!(prefix_fingerprint(&second), stored);
    }

    #[test]
    fn single_message_prefix_is_empty_history() {
        assert_eq!(
            prefix_fingerprint(&[ChatMessage::user("Hello!")]),
            fingerprint(&[])
        );
    }

    #[test]
    fn short_form() {
        let fp = fingerprint(&[]);
        assert_eq!(fp.short(), "4f53cda18c2b");
        assert_eq!(fp.to_string().len(), 64);
    }
}
