use chrono::{DateTime, Duration, Utc};

/// Decides whether a read should be served from the local snapshot or go
/// to the remote store: local wins while offline, and for a freshness
/// window after the last local write (read-your-own-write without a
/// redundant remote round trip). Past the window, remote is preferred so
/// cached data cannot go stale indefinitely.
#[derive(Debug, Clone, Copy)]
pub struct StalenessPolicy {
    window: Duration,
}

impl StalenessPolicy {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Default five-minute window from the original system.
    pub fn default_window() -> Self {
        Self::new(Duration::minutes(5))
    }

    pub fn should_use_local(
        &self,
        online: bool,
        last_write: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if !online {
            return true;
        }
        match last_write {
            Some(written_at) => now - written_at < self.window,
            None => false,
        }
    }
}
