//! Single-slot memory of the most recent open prompt, for "reopen last prompt".
//!
//! Process-local and never persisted. Wall-clock based: if the clock jumps
//! backwards the slot is simply not expired yet.

use chrono::{DateTime, Duration, Utc};

use crate::config::DEFAULT_DIALOG_TTL_SECS;
use crate::types::AskRequest;

#[derive(Debug, Clone)]
pub struct DialogCorrelator {
    ttl: Duration,
    slot: Option<(AskRequest, DateTime<Utc>)>,
}

impl Default for DialogCorrelator {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_DIALOG_TTL_SECS as i64))
    }
}

impl DialogCorrelator {
    pub fn new(ttl: Duration) -> Self {
        DialogCorrelator { ttl, slot: None }
    }

    /// Last write wins; `None` clears.
    pub fn set_pending(&mut self, request: Option<AskRequest>) {
        self.set_pending_at(request, Utc::now());
    }

    pub fn set_pending_at(&mut self, request: Option<AskRequest>, now: DateTime<Utc>) {
        self.slot = request.map(|request| (request, now));
    }

    pub fn get_pending(&mut self) -> Option<AskRequest> {
        self.get_pending_at(Utc::now())
    }

    /// The stored request, unless more than the TTL has elapsed since it was
    /// set, in which case the slot is cleared.
    pub fn get_pending_at(&mut self, now: DateTime<Utc>) -> Option<AskRequest> {
        let (request, set_at) = self.slot.as_ref()?;
        if now.signed_duration_since(*set_at) > self.ttl {
            self.slot = None;
            return None;
        }
        Some(request.clone())
    }

    /// Clears the slot only if it holds `request_id`.
    pub fn clear_if(&mut self, request_id: &str) -> bool {
        let holds = self
            .slot
            .as_ref()
            .is_some_and(|(request, _)| request.request_id == request_id);
        if holds {
            self.slot = None;
        }
        holds
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Request;

    fn ask(id: &str) -> AskRequest {
        AskRequest::from(&Request::stub(id))
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_expires_after_ten_minutes() {
        let mut correlator = DialogCorrelator::default();
        correlator.set_pending_at(Some(ask("q1")), t0());

        let before = t0() + Duration::minutes(9) + Duration::seconds(59);
        assert_eq!(
            correlator.get_pending_at(before).map(|r| r.request_id),
            Some("q1".to_string())
        );

        let after = t0() + Duration::minutes(10) + Duration::seconds(1);
        assert!(correlator.get_pending_at(after).is_none());
        // Cleared, not just hidden.
        assert!(correlator.get_pending_at(t0()).is_none());
    }

    #[test]
    fn test_clock_jump_backwards_is_not_expired() {
        let mut correlator = DialogCorrelator::default();
        correlator.set_pending_at(Some(ask("q1")), t0());
        assert!(correlator
            .get_pending_at(t0() - Duration::hours(3))
            .is_some());
    }

    #[test]
    fn test_last_write_wins_and_none_clears() {
        let mut correlator = DialogCorrelator::default();
        correlator.set_pending_at(Some(ask("q1")), t0());
        correlator.set_pending_at(Some(ask("q2")), t0());
        assert_eq!(
            correlator.get_pending_at(t0()).map(|r| r.request_id),
            Some("q2".to_string())
        );

        correlator.set_pending_at(None, t0());
        assert!(correlator.get_pending_at(t0()).is_none());
    }

    #[test]
    fn test_clear_if_matches_id_only() {
        let mut correlator = DialogCorrelator::default();
        correlator.set_pending(Some(ask("q1")));
        assert!(!correlator.clear_if("other"));
        assert!(correlator.get_pending().is_some());
        assert!(correlator.clear_if("q1"));
        assert!(correlator.get_pending().is_none());
    }
}
