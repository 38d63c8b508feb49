use crate::error::Error;
use crate::keys::MEMBER_SEPARATOR;
use std::time::Duration;

/// Longest expiry the store accepts (`PEXPIRE` takes a signed 64-bit count
/// of milliseconds).
pub const MAX_SESSION_DURATION: Duration = Duration::from_millis(i64::MAX as u64);

/// How [`crate::SessionStore::invalidate_sessions`] removes a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidationMode {
    /// Enumerate the members, then delete them in a second round trip.
    /// Sessions joining the group in between may survive.
    #[default]
    BestEffort,
    /// Enumerate and delete inside one server-side script.
    Atomic,
}

/// Connection and behaviour settings for a session store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub(crate) address: String,
    pub(crate) credential: Option<String>,
    pub(crate) session_duration: Duration,
    pub(crate) max_sessions_per_group: usize,
    pub(crate) key_prefix: String,
    pub(crate) pool_size: usize,
    pub(crate) command_timeout: Duration,
    pub(crate) invalidation: InvalidationMode,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            address: "127.0.0.1:6379".to_string(),
            credential: None,
            session_duration: Duration::from_secs(24 * 60 * 60),
            max_sessions_per_group: 0,
            key_prefix: String::new(),
            pool_size: 16,
            command_timeout: Duration::from_secs(5),
            invalidation: InvalidationMode::BestEffort,
        }
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        StoreOptions::default()
    }
    /// Store endpoint: `host:port`, `:port` or a `redis://` URL.
    pub fn address(mut self, address: &str) -> Self {
        self.address = address.to_string();
        self
    }
    pub fn credential(mut self, credential: &str) -> Self {
        self.credential = Some(credential.to_string());
        self
    }
    /// TTL applied to session, pointer and group keys.
    pub fn session_duration(mut self, session_duration: Duration) -> Self {
        self.session_duration = session_duration;
        self
    }
    /// Oldest sessions are evicted once a group grows past `max`. Zero means unbounded.
    pub fn max_sessions_per_group(mut self, max: usize) -> Self {
        self.max_sessions_per_group = max;
        self
    }
    pub fn key_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = prefix.to_string();
        self
    }
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }
    /// Upper bound on every round trip to the store, pool checkout included.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
    pub fn invalidation(mut self, mode: InvalidationMode) -> Self {
        self.invalidation = mode;
        self
    }

    pub fn get_session_duration(&self) -> Duration {
        self.session_duration
    }
    pub fn get_max_sessions_per_group(&self) -> usize {
        self.max_sessions_per_group
    }
    pub fn get_key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.address.trim().is_empty() {
            return Err(Error::Config("address must not be empty".to_string()));
        }
        if self.session_duration < Duration::from_millis(1) {
            return Err(Error::Config(
                "session duration must be at least one millisecond".to_string(),
            ));
        }
        if self.session_duration > MAX_SESSION_DURATION {
            return Err(Error::Config(format!(
                "session duration must be at most {MAX_SESSION_DURATION:?}"
            )));
        }
        if self.key_prefix.contains(MEMBER_SEPARATOR) {
            return Err(Error::Config(format!(
                "key prefix must not contain {MEMBER_SEPARATOR:?}"
            )));
        }
        if self.pool_size == 0 {
            return Err(Error::Config("pool size must be positive".to_string()));
        }
        if self.command_timeout.is_zero() {
            return Err(Error::Config("command timeout must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = StoreOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.get_max_sessions_per_group(), 0);
        assert_eq!(options.invalidation, InvalidationMode::BestEffort);
    }

    #[test]
    fn rejects_bad_settings() {
        let cases = [
            StoreOptions::new().session_duration(Duration::ZERO),
            StoreOptions::new().session_duration(Duration::from_secs(u64::MAX)),
            StoreOptions::new().session_duration(MAX_SESSION_DURATION + Duration::from_millis(1)),
            StoreOptions::new().key_prefix("app|"),
            StoreOptions::new().pool_size(0),
            StoreOptions::new().address(" "),
            StoreOptions::new().command_timeout(Duration::ZERO),
        ];
        for options in cases {
            assert!(matches!(options.validate(), Err(Error::Config(_))), "{options:?}");
        }
    }

    #[test]
    fn longest_session_duration_is_accepted() {
        let options = StoreOptions::new().session_duration(MAX_SESSION_DURATION);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn builder_overrides_fields() {
        let options = StoreOptions::new()
            .address(":6380")
            .credential("secret")
            .session_duration(Duration::from_secs(60))
            .max_sessions_per_group(5)
            .key_prefix("auth:")
            .invalidation(InvalidationMode::Atomic);
        assert_eq!(options.address, ":6380");
        assert_eq!(options.credential.as_deref(), Some("secret"));
        assert_eq!(options.get_session_duration(), Duration::from_secs(60));
        assert_eq!(options.get_max_sessions_per_group(), 5);
        assert_eq!(options.get_key_prefix(), "auth:");
        assert_eq!(options.invalidation, InvalidationMode::Atomic);
    }
}
