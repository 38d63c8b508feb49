//! Key layout in the external store.
//!
//! Every key is the configured prefix, a one-letter tag and a suffix:
//!
//! | tag | key                  | value                                  |
//! |-----|----------------------|----------------------------------------|
//! | `s` | session data         | serialized payload                     |
//! | `z` | session to group     | group identifier string                |
//! | `g` | group index          | sorted set of membership entries       |
//! | `b` | rate-limit bucket    | hash `{t: last update ns, b: tokens}`  |

use crate::inner::SessionId;

/// Separates the two keys inside a group membership entry.
pub const MEMBER_SEPARATOR: char = '|';

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyCodec {
    prefix: String,
}

impl KeyCodec {
    pub fn new(prefix: &str) -> Self {
        KeyCodec {
            prefix: prefix.to_string(),
        }
    }

    pub fn session_key(&self, id: &SessionId) -> String {
        format!("{}s{}", self.prefix, id)
    }

    pub fn session_to_group_key(&self, id: &SessionId) -> String {
        format!("{}z{}", self.prefix, id)
    }

    pub fn group_key(&self, group: &str) -> String {
        format!("{}g{}", self.prefix, group)
    }

    pub fn rate_limit_key(&self, client: &str) -> String {
        format!("{}b{}", self.prefix, client)
    }

    pub fn membership(&self, id: &SessionId) -> Membership {
        Membership {
            session_key: self.session_key(id),
            pointer_key: self.session_to_group_key(id),
        }
    }
}

/// One entry of a group index: the session key and its pointer key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub session_key: String,
    pub pointer_key: String,
}

impl Membership {
    pub fn encode(&self) -> String {
        format!("{}{}{}", self.session_key, MEMBER_SEPARATOR, self.pointer_key)
    }

    /// Parses a stored entry. Entries without a separator are treated as a
    /// bare key so they still get deleted.
    pub fn decode(entry: &str) -> Membership {
        match entry.split_once(MEMBER_SEPARATOR) {
            Some((session_key, pointer_key)) => Membership {
                session_key: session_key.to_string(),
                pointer_key: pointer_key.to_string(),
            },
            None => Membership {
                session_key: entry.to_string(),
                pointer_key: String::new(),
            },
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        [self.session_key.as_str(), self.pointer_key.as_str()]
            .into_iter()
            .filter(|key| !key.is_empty())
    }
}
