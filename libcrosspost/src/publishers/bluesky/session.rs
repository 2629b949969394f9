use std::time::{Duration, Instant};

/// Sessions older than this are replaced before the next request
pub const SESSION_REFRESH_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

/// An authenticated PDS session
#[derive(Debug, Clone)]
pub struct Session {
    pub did: String,
    pub access_jwt: String,
    pub created_at: Instant,
}

impl Session {
    pub fn new(did: String, access_jwt: String) -> Self {
        Self {
            did,
            access_jwt,
            created_at: Instant::now(),
        }
    }

    /// Younger than `max_age`
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.is_fresh_at(Instant::now(), max_age)
    }

    pub fn is_fresh_at(&self, now: Instant, max_age: Duration) -> bool {
        now.saturating_duration_since(self.created_at) < max_age
    }
}
