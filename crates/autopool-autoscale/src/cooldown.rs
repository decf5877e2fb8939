//! Pool-wide scaling cooldown.

/// Suppresses every policy of a pool until `until` after an executed
/// scaling action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CooldownTracker {
    until: Option<u64>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, now: u64, cooldown_secs: u64) {
        self.until = Some(now.saturating_add(cooldown_secs));
    }

    pub fn is_active(&self, now: u64) -> bool {
        self.until.is_some_and(|until| now < until)
    }

    /// Seconds left, zero once expired.
    pub fn remaining(&self, now: u64) -> u64 {
        self.until.map_or(0, |until| until.saturating_sub(now))
    }

    pub fn until(&self) -> Option<u64> {
        self.until
    }
}
