use chrono::{DateTime, Utc};

use super::applier::Event;
use crate::database::IncidentChange;

/// Incident bookkeeping implied by the applier's events.
///
/// Opening is skipped by the store when an incident is already open, and a
/// close with nothing open is a no-op there as well.
pub fn incident_change(events: &[Event], now: DateTime<Utc>) -> Option<IncidentChange> {
    events.iter().find_map(|event| match event {
        Event::OpenIncident { status_before, message } => Some(IncidentChange::Open {
            status_before: *status_before,
            message: message.clone(),
            at: now,
        }),
        Event::CloseIncident => Some(IncidentChange::Close { at: now }),
        _ => None,
    })
}
