use crate::error::Error;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Number of random bytes in a [`SessionId`].
pub const SESSION_ID_LEN: usize = 20;

/// Opaque random identifier used as a session token.
///
/// Displayed and serialized as 40 lowercase hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId([u8; SESSION_ID_LEN]);

impl SessionId {
    /// Generates a fresh identifier from the thread-local RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_ID_LEN];
        rand::rng().fill(&mut bytes[..]);
        SessionId(bytes)
    }

    /// Builds an identifier from its binary form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let bytes = <[u8; SESSION_ID_LEN]>::try_from(bytes).map_err(|_| Error::InvalidSessionId)?;
        Ok(SessionId(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_ID_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({self})")
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.as_bytes();
        if text.len() != SESSION_ID_LEN * 2 {
            return Err(Error::InvalidSessionId);
        }
        let mut bytes = [0u8; SESSION_ID_LEN];
        for (slot, pair) in bytes.iter_mut().zip(text.chunks_exact(2)) {
            *slot = (hex_value(pair[0])? << 4) | hex_value(pair[1])?;
        }
        Ok(SessionId(bytes))
    }
}

fn hex_value(c: u8) -> Result<u8, Error> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::InvalidSessionId),
    }
}

impl Serialize for SessionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_form_parses_back() {
        let id = SessionId::generate();
        let text = id.to_string();
        assert_eq!(text.len(), 40);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(text.parse::<SessionId>().unwrap(), id);
        assert_eq!(text.to_uppercase().parse::<SessionId>().unwrap(), id);
    }

    #[test]
    fn rejects_malformed_text() {
        assert!(matches!("abc".parse::<SessionId>(), Err(Error::InvalidSessionId)));
        let bad = "zz".repeat(SESSION_ID_LEN);
        assert!(matches!(bad.parse::<SessionId>(), Err(Error::InvalidSessionId)));
        let long = "00".repeat(SESSION_ID_LEN + 1);
        assert!(long.parse::<SessionId>().is_err());
    }

    #[test]
    fn binary_form_requires_exact_length() {
        let id = SessionId::generate();
        assert_eq!(SessionId::from_bytes(id.as_bytes()).unwrap(), id);
        assert!(SessionId::from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn serializes_as_hex_string() {
        let id = SessionId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
