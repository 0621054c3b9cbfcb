//! The per-domain status state machine.
//!
//! `apply_verdict` is pure: it takes the stored row and a verdict and returns
//! the next row plus the side effects the caller must persist alongside it.
//! Both the local worker path and the external ingress go through it.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::database::models::{Domain, DomainStatus, HISTORY_LIMIT};
use crate::monitoring::Verdict;

/// Minutes a domain must stay down before the down alert may go out.
pub const DOWN_DEBOUNCE_MINUTES: i64 = 3;
/// Minutes a domain must stay up before the recovery alert may go out.
pub const UP_DEBOUNCE_MINUTES: i64 = 5;

pub fn down_debounce() -> TimeDelta {
    TimeDelta::minutes(DOWN_DEBOUNCE_MINUTES)
}

pub fn up_debounce() -> TimeDelta {
    TimeDelta::minutes(UP_DEBOUNCE_MINUTES)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    IntoOk,
    IntoDown,
    IntoError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    OpenIncident { status_before: DomainStatus, message: Option<String> },
    CloseIncident,
    ScheduleDownEvaluation { at: DateTime<Utc> },
    ScheduleUpEvaluation { at: DateTime<Utc> },
    /// Down past the debounce window with no alert sent yet
    DownAlertDue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub domain: Domain,
    pub previous: DomainStatus,
    pub transition: Option<Transition>,
    pub events: Vec<Event>,
}

pub fn apply_verdict(domain: &Domain, verdict: &Verdict, now: DateTime<Utc>) -> Applied {
    let mut next = domain.clone();
    let previous = domain.status;
    let status = DomainStatus::from(verdict.status);

    next.history.push(u8::from(verdict.is_up()));
    if next.history.len() > HISTORY_LIMIT {
        let excess = next.history.len() - HISTORY_LIMIT;
        next.history.drain(..excess);
    }

    let mut events = Vec::new();
    let mut transition = None;

    if status != previous {
        next.status = status;
        next.status_since = now;

        match status {
            DomainStatus::Ok => {
                transition = Some(Transition::IntoOk);
                next.last_up_at = Some(now);
                next.down_notified_at = None;
                if matches!(previous, DomainStatus::Down | DomainStatus::Error) {
                    events.push(Event::CloseIncident);
                }
                if previous == DomainStatus::Down {
                    events.push(Event::ScheduleUpEvaluation { at: now + up_debounce() });
                }
            }
            DomainStatus::Down => {
                transition = Some(Transition::IntoDown);
                next.last_down_at = Some(now);
                next.up_notified_at = None;
                events.push(Event::OpenIncident {
                    status_before: previous,
                    message: verdict.error.clone(),
                });
                events.push(Event::ScheduleDownEvaluation { at: now + down_debounce() });
            }
            DomainStatus::Error => transition = Some(Transition::IntoError),
            DomainStatus::Pending => {}
        }
    } else if status == DomainStatus::Down
        && domain.down_notified_at.is_none()
        && now - domain.status_since >= down_debounce()
    {
        events.push(Event::DownAlertDue);
    }

    next.ssl_valid = verdict.ssl_valid;
    // A reporter's clock may run ahead; never record a check from the future.
    next.last_checked_at = Some(verdict.checked_at.map_or(now, |at| at.min(now)));
    next.last_check_error = verdict.error.clone();
    next.queued_at = None;

    Applied { domain: next, previous, transition, events }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::SslState;
    use crate::monitoring::VerdictStatus;

    fn t(minutes: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + TimeDelta::minutes(minutes)
    }

    fn domain() -> Domain {
        let mut domain = Domain::pending(1, "example.com", t(-60));
        domain.id = 10;
        domain
    }

    fn status(status: VerdictStatus) -> Verdict {
        Verdict { status, ssl_valid: SslState::Valid, error: None, checked_at: None }
    }

    #[test]
    fn test_first_ok_leaves_pending() {
        let applied = apply_verdict(&domain(), &Verdict::ok(), t(0));

        assert_eq!(applied.transition, Some(Transition::IntoOk));
        assert_eq!(applied.domain.status_since, t(0));
        assert_eq!(applied.domain.last_up_at, Some(t(0)));
        assert!(applied.events.is_empty());
        assert_eq!(applied.domain.history, vec![1]);
    }

    #[test]
    fn test_same_status_keeps_status_since() {
        let first = apply_verdict(&domain(), &Verdict::ok(), t(0)).domain;
        let second = apply_verdict(&first, &Verdict::ok(), t(5));

        assert_eq!(second.transition, None);
        assert_eq!(second.domain.status_since, t(0));
        assert_eq!(second.domain.last_checked_at, Some(t(5)));
        assert_eq!(second.domain.history, vec![1, 1]);
    }

    #[test]
    fn test_into_down_opens_incident_and_schedules_evaluation() {
        let mut up = apply_verdict(&domain(), &Verdict::ok(), t(0)).domain;
        up.up_notified_at = Some(t(0));

        let applied = apply_verdict(&up, &Verdict::down("HTTP status 500"), t(10));

        assert_eq!(applied.transition, Some(Transition::IntoDown));
        assert_eq!(applied.domain.last_down_at, Some(t(10)));
        assert_eq!(applied.domain.up_notified_at, None);
        assert_eq!(applied.domain.last_check_error.as_deref(), Some("HTTP status 500"));
        assert_eq!(
            applied.events,
            vec![
                Event::OpenIncident {
                    status_before: DomainStatus::Ok,
                    message: Some("HTTP status 500".to_string())
                },
                Event::ScheduleDownEvaluation { at: t(13) },
            ]
        );
    }

    #[test]
    fn test_recovery_closes_incident_and_clears_down_flag() {
        let mut down = domain();
        down.status = DomainStatus::Down;
        down.status_since = t(0);
        down.down_notified_at = Some(t(3));

        let applied = apply_verdict(&down, &Verdict::ok(), t(10));

        assert_eq!(applied.transition, Some(Transition::IntoOk));
        assert_eq!(applied.domain.down_notified_at, None);
        assert_eq!(
            applied.events,
            vec![Event::CloseIncident, Event::ScheduleUpEvaluation { at: t(15) }]
        );
    }

    #[test]
    fn test_error_recovery_closes_without_up_alert() {
        let mut errored = domain();
        errored.status = DomainStatus::Error;

        let applied = apply_verdict(&errored, &Verdict::ok(), t(1));

        assert_eq!(applied.events, vec![Event::CloseIncident]);
    }

    #[test]
    fn test_into_error_has_no_side_effects() {
        let up = apply_verdict(&domain(), &Verdict::ok(), t(0)).domain;

        let applied = apply_verdict(&up, &status(VerdictStatus::Error), t(1));

        assert_eq!(applied.transition, Some(Transition::IntoError));
        assert!(applied.events.is_empty());
        assert_eq!(applied.domain.history, vec![1, 0]);
    }

    #[test]
    fn test_sustained_unnotified_outage_raises_alert_due() {
        let mut down = domain();
        down.status = DomainStatus::Down;
        down.status_since = t(0);

        let early = apply_verdict(&down, &Verdict::down("timeout"), t(2));
        let late = apply_verdict(&down, &Verdict::down("timeout"), t(3));
        down.down_notified_at = Some(t(3));
        let notified = apply_verdict(&down, &Verdict::down("timeout"), t(4));

        assert!(early.events.is_empty());
        assert_eq!(late.events, vec![Event::DownAlertDue]);
        assert!(notified.events.is_empty());
    }

    #[test]
    fn test_history_is_capped_oldest_first() {
        let mut current = domain();
        for minute in 0..30 {
            let verdict = if minute < 6 { Verdict::down("x") } else { Verdict::ok() };
            current = apply_verdict(&current, &verdict, t(minute)).domain;
        }

        assert_eq!(current.history.len(), HISTORY_LIMIT);
        assert!(current.history.iter().all(|sample| *sample == 1));
    }

    #[test]
    fn test_reported_check_time_and_placeholder() {
        let mut queued = domain();
        queued.queued_at = Some(t(0));
        let verdict = Verdict::ok().checked_at(t(-1));

        let applied = apply_verdict(&queued, &verdict, t(0));

        assert_eq!(applied.domain.last_checked_at, Some(t(-1)));
        assert_eq!(applied.domain.status_since, t(0));
        assert_eq!(applied.domain.queued_at, None);
    }

    #[test]
    fn test_future_check_time_is_clamped() {
        let verdict = Verdict::ok().checked_at(t(90));

        let applied = apply_verdict(&domain(), &verdict, t(0));

        assert_eq!(applied.domain.last_checked_at, Some(t(0)));
    }
}
