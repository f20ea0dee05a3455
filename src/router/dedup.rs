// src/router/dedup.rs
//! Last-surfaced notification tracking

pub const DEFAULT_QUIET_PERIOD_MS: i64 = 1500;

/// Remembers the last notification a listener surfaced.
///
/// Push events compare keys and time; poll-synthesized events only look at
/// the time. Both paths move the same timestamp.
#[derive(Debug, Clone)]
pub struct DedupCursor {
    last_message_key: Option<String>,
    last_surfaced_at_ms: Option<i64>,
    quiet_period_ms: i64,
}

impl Default for DedupCursor {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_PERIOD_MS)
    }
}

impl DedupCursor {
    pub fn new(quiet_period_ms: i64) -> Self {
        Self {
            last_message_key: None,
            last_surfaced_at_ms: None,
            quiet_period_ms,
        }
    }

    pub fn last_message_key(&self) -> Option<&str> {
        self.last_message_key.as_deref()
    }

    pub fn last_surfaced_at_ms(&self) -> Option<i64> {
        self.last_surfaced_at_ms
    }

    /// True while less than the quiet period has passed since the last surfacing
    pub fn in_quiet_period(&self, now_ms: i64) -> bool {
        self.last_surfaced_at_ms
            .is_some_and(|last| now_ms - last < self.quiet_period_ms)
    }

    /// A keyed event may surface unless it repeats the last key inside the quiet period
    pub fn admits(&self, key: &str, now_ms: i64) -> bool {
        self.last_message_key.as_deref() != Some(key) || !self.in_quiet_period(now_ms)
    }

    pub fn record_keyed(&mut self, key: String, now_ms: i64) {
        self.last_message_key = Some(key);
        self.last_surfaced_at_ms = Some(now_ms);
    }

    pub fn record_unkeyed(&mut self, now_ms: i64) {
        self.last_surfaced_at_ms = Some(now_ms);
    }
}
