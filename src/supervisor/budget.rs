use std::time::{Duration, Instant, SystemTime};

/// Bounds how many restarts may occur within a rolling time window.
///
/// The count resets once the window has elapsed; while the count sits at
/// the ceiling the supervisor stops spawning for one full window instead
/// of giving up permanently.
#[derive(Debug, Clone)]
pub struct RestartBudget {
    /// Restarts recorded in the current window
    count: usize,
    /// Monotonic start of the current window; None until the first restart
    window_start: Option<Instant>,
    /// Wall-clock time of the last recorded restart, for status reporting
    last_restart: Option<SystemTime>,
    /// Window size
    window: Duration,
    /// Maximum restarts per window
    max_restarts: usize,
}

impl RestartBudget {
    pub fn new(max_restarts: usize, window: Duration) -> Self {
        Self {
            count: 0,
            window_start: None,
            last_restart: None,
            window,
            max_restarts,
        }
    }

    /// Reset the count if the window has elapsed since it opened
    pub fn reset_if_expired(&mut self, now: Instant) {
        if let Some(start) = self.window_start {
            if now.duration_since(start) > self.window {
                self.count = 0;
                self.window_start = None;
            }
        }
    }

    /// Whether the budget is spent for the current window
    pub fn exhausted(&self) -> bool {
        self.count >= self.max_restarts
    }

    /// Record a restart attempt, opening a window on the first one
    pub fn record(&mut self, now: Instant) {
        if self.window_start.is_none() {
            self.window_start = Some(now);
        }
        self.count += 1;
        self.last_restart = Some(SystemTime::now());
    }

    /// Force the count back to zero (used when the cooldown elapses)
    pub fn reset(&mut self) {
        self.count = 0;
        self.window_start = None;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn max_restarts(&self) -> usize {
        self.max_restarts
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn last_restart(&self) -> Option<SystemTime> {
        self.last_restart
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_new() {
        let budget = RestartBudget::new(50, Duration::from_secs(300));
        assert_eq!(budget.count(), 0);
        assert!(!budget.exhausted());
        assert!(budget.last_restart().is_none());
    }

    #[test]
    fn test_budget_count_never_exceeds_max_when_gated() {
        // Simulates the supervisor's gate: record only while not exhausted.
        let mut budget = RestartBudget::new(3, Duration::from_secs(300));
        let now = Instant::now();

        for n in 1..=10 {
            budget.reset_if_expired(now);
            if !budget.exhausted() {
                budget.record(now);
            }
            assert_eq!(budget.count(), n.min(3));
        }
        assert!(budget.exhausted());
    }

    #[test]
    fn test_budget_resets_after_window() {
        let mut budget = RestartBudget::new(3, Duration::from_millis(50));
        let start = Instant::now();

        budget.record(start);
        budget.record(start);
        assert_eq!(budget.count(), 2);

        // Still inside the window
        budget.reset_if_expired(start + Duration::from_millis(40));
        assert_eq!(budget.count(), 2);

        // Window elapsed
        budget.reset_if_expired(start + Duration::from_millis(60));
        assert_eq!(budget.count(), 0);
        assert!(!budget.exhausted());
    }

    #[test]
    fn test_budget_window_opens_on_first_record() {
        let mut budget = RestartBudget::new(2, Duration::from_millis(50));
        let start = Instant::now();

        // First record opens the window; later records do not move it
        budget.record(start);
        budget.record(start + Duration::from_millis(40));
        assert!(budget.exhausted());

        // 60ms after the window opened: expired despite the recent record
        budget.reset_if_expired(start + Duration::from_millis(60));
        assert_eq!(budget.count(), 0);
    }

    #[test]
    fn test_budget_manual_reset() {
        let mut budget = RestartBudget::new(2, Duration::from_secs(300));
        let now = Instant::now();

        budget.record(now);
        budget.record(now);
        assert!(budget.exhausted());

        budget.reset();
        assert_eq!(budget.count(), 0);
        assert!(!budget.exhausted());
    }

    #[test]
    fn test_budget_records_last_restart_time() {
        let mut budget = RestartBudget::new(5, Duration::from_secs(300));
        budget.record(Instant::now());
        assert!(budget.last_restart().is_some());
    }
}
