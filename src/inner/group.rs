use crate::error::Error;
use crate::inner::SessionId;
use std::fmt::Display;
use uuid::Uuid;

/// Identifier of a group of sessions that can be invalidated together,
/// typically "every session of user X".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupId {
    Text(String),
    Bytes(Vec<u8>),
}

impl GroupId {
    /// Uses the `Display` text of any value as the group identifier.
    pub fn display<T: Display + ?Sized>(value: &T) -> Self {
        GroupId::Text(value.to_string())
    }

    /// Normalizes the identifier to the string stored in the group key and
    /// in session pointers.
    pub fn to_key_string(&self) -> Result<String, Error> {
        match self {
            GroupId::Text(text) => Ok(text.clone()),
            GroupId::Bytes(bytes) => String::from_utf8(bytes.clone()).map_err(|err| {
                Error::UnsupportedGroupIdentifier(format!("group bytes are not utf-8: {err}"))
            }),
        }
    }
}

impl From<&str> for GroupId {
    fn from(value: &str) -> Self {
        GroupId::Text(value.to_string())
    }
}

impl From<String> for GroupId {
    fn from(value: String) -> Self {
        GroupId::Text(value)
    }
}

impl From<&String> for GroupId {
    fn from(value: &String) -> Self {
        GroupId::Text(value.clone())
    }
}

impl From<&[u8]> for GroupId {
    fn from(value: &[u8]) -> Self {
        GroupId::Bytes(value.to_vec())
    }
}

impl From<Vec<u8>> for GroupId {
    fn from(value: Vec<u8>) -> Self {
        GroupId::Bytes(value)
    }
}

impl From<SessionId> for GroupId {
    fn from(value: SessionId) -> Self {
        GroupId::display(&value)
    }
}

impl From<&SessionId> for GroupId {
    fn from(value: &SessionId) -> Self {
        GroupId::display(value)
    }
}

impl From<Uuid> for GroupId {
    fn from(value: Uuid) -> Self {
        GroupId::display(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_forms_normalize_verbatim() {
        assert_eq!(GroupId::from("user-7").to_key_string().unwrap(), "user-7");
        assert_eq!(
            GroupId::from(String::from("team")).to_key_string().unwrap(),
            "team"
        );
        assert_eq!(GroupId::display(&42u32).to_key_string().unwrap(), "42");
    }

    #[test]
    fn bytes_must_be_utf8() {
        assert_eq!(
            GroupId::from(&b"abc"[..]).to_key_string().unwrap(),
            "abc"
        );
        let err = GroupId::from(vec![0xff, 0xfe]).to_key_string().unwrap_err();
        assert!(matches!(err, Error::UnsupportedGroupIdentifier(_)));
    }

    #[test]
    fn identifiers_use_their_text_encoding() {
        let id = SessionId::generate();
        assert_eq!(GroupId::from(&id).to_key_string().unwrap(), id.to_string());
        let user = Uuid::nil();
        assert_eq!(
            GroupId::from(user).to_key_string().unwrap(),
            "00000000-0000-0000-0000-000000000000"
        );
    }
}
