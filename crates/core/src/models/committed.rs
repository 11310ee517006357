use chrono::{DateTime, Utc};

/// Result of a durable authoritative write.
///
/// `previous` is the row as it was before the write, if it existed; the
/// synchronizer uses it to clean up keys that moved (slug changes).
#[derive(Debug, Clone, PartialEq)]
pub struct Committed<T> {
    pub value: T,
    pub previous: Option<T>,
    pub committed_at: DateTime<Utc>,
}

impl<T> Committed<T> {
    pub fn new(value: T, previous: Option<T>, committed_at: DateTime<Utc>) -> Self {
        Self {
            value,
            previous,
            committed_at,
        }
    }

    pub fn is_create(&self) -> bool {
        self.previous.is_none()
    }
}
