//! Debounced auto-save.
//!
//! A save is due once the board is dirty and no further change arrived for
//! the quiet period. Each change restarts the period.

use std::time::{Duration, Instant};

/// Default quiet period before a checkpoint is written.
pub const DEFAULT_AUTOSAVE_QUIET_MS: u64 = 800;

/// Tracks unsaved changes and decides when to write a checkpoint.
#[derive(Debug, Clone)]
pub struct AutoSave {
    quiet: Duration,
    /// Time of the most recent change not yet saved.
    dirty_since: Option<Instant>,
    last_save: Option<Instant>,
}

impl AutoSave {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            dirty_since: None,
            last_save: None,
        }
    }

    /// Get the quiet period.
    pub fn quiet_period(&self) -> Duration {
        self.quiet
    }

    /// Record a change. Restarts the quiet period.
    pub fn mark_dirty(&mut self) {
        self.mark_dirty_at(Instant::now());
    }

    pub fn mark_dirty_at(&mut self, now: Instant) {
        self.dirty_since = Some(now);
    }

    /// Check if the board has unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty_since.is_some()
    }

    /// Whether a save is due now.
    pub fn should_save(&self) -> bool {
        self.should_save_at(Instant::now())
    }

    pub fn should_save_at(&self, now: Instant) -> bool {
        match self.dirty_since {
            Some(changed) => now.saturating_duration_since(changed) >= self.quiet,
            None => false,
        }
    }

    /// Time left until a save is due, if one is pending.
    pub fn time_until_save(&self, now: Instant) -> Option<Duration> {
        self.dirty_since
            .map(|changed| self.quiet.saturating_sub(now.saturating_duration_since(changed)))
    }

    /// Clear the dirty flag after a successful save.
    pub fn saved(&mut self) {
        self.saved_at(Instant::now());
    }

    pub fn saved_at(&mut self, now: Instant) {
        self.dirty_since = None;
        self.last_save = Some(now);
    }

    pub fn last_save(&self) -> Option<Instant> {
        self.last_save
    }
}

impl Default for AutoSave {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_AUTOSAVE_QUIET_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_never_saves() {
        let autosave = AutoSave::default();
        assert!(!autosave.is_dirty());
        assert!(!autosave.should_save_at(Instant::now() + Duration::from_secs(10)));
    }

    #[test]
    fn test_debounce() {
        let start = Instant::now();
        let mut autosave = AutoSave::default();

        autosave.mark_dirty_at(start);
        assert!(!autosave.should_save_at(start + Duration::from_millis(500)));

        // A second change restarts the quiet period
        autosave.mark_dirty_at(start + Duration::from_millis(500));
        assert!(!autosave.should_save_at(start + Duration::from_millis(1000)));
        assert!(autosave.should_save_at(start + Duration::from_millis(1300)));
        assert_eq!(
            autosave.time_until_save(start + Duration::from_millis(1000)),
            Some(Duration::from_millis(300))
        );
    }

    #[test]
    fn test_saved_clears_dirty() {
        let start = Instant::now();
        let mut autosave = AutoSave::default();
        autosave.mark_dirty_at(start);
        autosave.saved_at(start + Duration::from_secs(1));

        assert!(!autosave.is_dirty());
        assert!(!autosave.should_save_at(start + Duration::from_secs(5)));
        assert_eq!(autosave.last_save(), Some(start + Duration::from_secs(1)));
    }
}
