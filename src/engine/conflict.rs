use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.end <= span.start {
        return Err(EngineError::Validation("end must be after start"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Approved bookings on this calendar overlapping `span`, oldest start
/// first. Only `Approved` constrains — pending, rejected, cancelled and
/// completed bookings never block a slot. `exclude` skips the booking being
/// re-checked at approval time.
pub(crate) fn approved_conflicts(
    cal: &ResourceCalendar,
    span: &Span,
    exclude: Option<Ulid>,
) -> Vec<Booking> {
    cal.overlapping(span)
        .filter(|b| b.status == BookingStatus::Approved)
        .filter(|b| exclude != Some(b.id))
        .cloned()
        .collect()
}

pub(crate) fn check_no_conflict(
    cal: &ResourceCalendar,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let conflicts = approved_conflicts(cal, span, exclude);
    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Conflict(
            conflicts.into_iter().map(|b| b.id).collect(),
        ))
    }
}
