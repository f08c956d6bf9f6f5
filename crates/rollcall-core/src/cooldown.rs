//! Duplicate suppression and punch throttling.
//!
//! Both are process-lifetime bookkeeping: nothing here is persisted, so a
//! restart forgets every window.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::decision::Status;
use crate::types::ActionKind;

/// Prevents logging the same accepted action for the same identity twice
/// within the window.
#[derive(Debug, Clone)]
pub struct DuplicateSuppressor {
    window: Duration,
    last_accepted: HashMap<(String, ActionKind), DateTime<Utc>>,
}

impl DuplicateSuppressor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// True when an accepted attempt falls inside the window of the last
    /// recorded one for the same name and action. Rejected attempts are
    /// never duplicates.
    pub fn is_duplicate(&self, name: &str, action: ActionKind, now: DateTime<Utc>, status: Status) -> bool {
        if status != Status::Accepted {
            return false;
        }
        match self.last_accepted.get(&(name.to_string(), action)) {
            Some(&last) if now - last < self.window => {
                tracing::info!(
                    name,
                    action = %action,
                    elapsed_secs = (now - last).num_seconds(),
                    "duplicate accepted punch suppressed"
                );
                true
            }
            _ => false,
        }
    }

    /// Open a new window for an accepted attempt that reached the ledger.
    /// Rejected attempts never refresh the window.
    pub fn record(&mut self, name: &str, action: ActionKind, now: DateTime<Utc>, status: Status) {
        if status == Status::Accepted {
            self.last_accepted.insert((name.to_string(), action), now);
        }
    }

    /// `is_duplicate` and `record` in one step, for callers whose write
    /// cannot fail.
    pub fn should_log(&mut self, name: &str, action: ActionKind, now: DateTime<Utc>, status: Status) -> bool {
        if self.is_duplicate(name, action, now, status) {
            return false;
        }
        self.record(name, action, now, status);
        true
    }

    pub fn last_accepted(&self, name: &str, action: ActionKind) -> Option<DateTime<Utc>> {
        self.last_accepted.get(&(name.to_string(), action)).copied()
    }
}

/// Minimum spacing between an accepted punch and the next attempt.
#[derive(Debug, Clone)]
pub struct ActionThrottle {
    min_interval: Duration,
    last_accepted: Option<DateTime<Utc>>,
}

impl ActionThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: None,
        }
    }

    /// `Err(remaining)` while still inside the interval.
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), Duration> {
        match self.last_accepted {
            Some(last) if now - last < self.min_interval => Err(self.min_interval - (now - last)),
            _ => Ok(()),
        }
    }

    pub fn arm(&mut self, now: DateTime<Utc>) {
        self.last_accepted = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn suppressor() -> DuplicateSuppressor {
        DuplicateSuppressor::new(Duration::seconds(60))
    }

    #[test]
    fn test_first_entry_always_logged() {
        let mut s = suppressor();
        assert!(s.should_log("Alice", ActionKind::In, at(0), Status::Accepted));
        assert_eq!(s.last_accepted("Alice", ActionKind::In), Some(at(0)));
    }

    #[test]
    fn test_accepted_duplicate_within_window_suppressed() {
        let mut s = suppressor();
        assert!(s.should_log("Alice", ActionKind::In, at(0), Status::Accepted));
        assert!(!s.should_log("Alice", ActionKind::In, at(10), Status::Accepted));
        // Suppressed attempt does not move the window
        assert_eq!(s.last_accepted("Alice", ActionKind::In), Some(at(0)));
    }

    #[test]
    fn test_accepted_after_window_logged() {
        let mut s = suppressor();
        assert!(s.should_log("Alice", ActionKind::In, at(0), Status::Accepted));
        assert!(s.should_log("Alice", ActionKind::In, at(70), Status::Accepted));
        assert_eq!(s.last_accepted("Alice", ActionKind::In), Some(at(70)));
    }

    #[test]
    fn test_window_boundary_logs() {
        let mut s = suppressor();
        assert!(s.should_log("Alice", ActionKind::In, at(0), Status::Accepted));
        assert!(s.should_log("Alice", ActionKind::In, at(60), Status::Accepted));
    }

    #[test]
    fn test_rejected_never_suppressed() {
        let mut s = suppressor();
        assert!(s.should_log("Alice", ActionKind::In, at(0), Status::Accepted));
        assert!(s.should_log("Alice", ActionKind::In, at(5), Status::Rejected));
        assert!(s.should_log("Alice", ActionKind::In, at(6), Status::Rejected));
        assert_eq!(s.last_accepted("Alice", ActionKind::In), Some(at(0)));
    }

    #[test]
    fn test_rejected_does_not_open_window() {
        let mut s = suppressor();
        assert!(s.should_log("Alice", ActionKind::In, at(0), Status::Rejected));
        assert!(s.should_log("Alice", ActionKind::In, at(1), Status::Accepted));
    }

    #[test]
    fn test_keys_are_per_name_and_action() {
        let mut s = suppressor();
        assert!(s.should_log("Alice", ActionKind::In, at(0), Status::Accepted));
        assert!(s.should_log("Alice", ActionKind::Out, at(1), Status::Accepted));
        assert!(s.should_log("Bob", ActionKind::In, at(2), Status::Accepted));
        assert!(!s.should_log("Alice", ActionKind::Out, at(3), Status::Accepted));
    }

    #[test]
    fn test_check_does_not_open_window() {
        let mut s = suppressor();
        assert!(!s.is_duplicate("Alice", ActionKind::In, at(0), Status::Accepted));
        assert_eq!(s.last_accepted("Alice", ActionKind::In), None);
        assert!(!s.is_duplicate("Alice", ActionKind::In, at(10), Status::Accepted));

        s.record("Alice", ActionKind::In, at(10), Status::Accepted);
        assert!(s.is_duplicate("Alice", ActionKind::In, at(20), Status::Accepted));
        s.record("Bob", ActionKind::In, at(10), Status::Rejected);
        assert_eq!(s.last_accepted("Bob", ActionKind::In), None);
    }

    #[test]
    fn test_throttle() {
        let mut t = ActionThrottle::new(Duration::seconds(3));
        assert!(t.check(at(0)).is_ok());
        t.arm(at(0));
        assert_eq!(t.check(at(1)), Err(Duration::seconds(2)));
        assert!(t.check(at(3)).is_ok());
    }
}
