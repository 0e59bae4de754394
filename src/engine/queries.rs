use ulid::Ulid;

use crate::limits::MAX_QUERY_LIMIT;
use crate::model::*;

use super::conflict::{approved_conflicts, validate_span};
use super::{Engine, EngineError};

impl Engine {
    /// Snapshot of one booking.
    pub async fn booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let resource_id = self
            .store
            .resource_for_booking(&id)
            .ok_or(EngineError::NotFound(id))?;
        let cal = self
            .store
            .calendar(&resource_id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = cal.read().await;
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// All bookings for a resource, newest start first. Unknown resources
    /// have empty calendars, not errors.
    pub async fn bookings_for_resource(
        &self,
        resource_id: Ulid,
        status: Option<BookingStatus>,
    ) -> Vec<Booking> {
        let Some(cal) = self.store.calendar(&resource_id) else {
            return Vec::new();
        };
        let guard = cal.read().await;
        let mut out: Vec<Booking> = guard
            .bookings
            .iter()
            .filter(|b| status.is_none_or(|s| b.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|b| std::cmp::Reverse(b.span.start));
        out
    }

    /// All bookings by a requester across resources, newest start first.
    pub async fn bookings_for_requester(
        &self,
        requester_id: Ulid,
        status: Option<BookingStatus>,
    ) -> Vec<Booking> {
        let mut out = Vec::new();
        for booking_id in self.store.bookings_of_requester(&requester_id) {
            let Some(resource_id) = self.store.resource_for_booking(&booking_id) else {
                continue;
            };
            let Some(cal) = self.store.calendar(&resource_id) else {
                continue;
            };
            let guard = cal.read().await;
            if let Some(b) = guard.booking(booking_id)
                && status.is_none_or(|s| b.status == s)
            {
                out.push(b.clone());
            }
        }
        out.sort_by_key(|b| std::cmp::Reverse(b.span.start));
        out
    }

    /// Pending bookings for a resource, oldest request first — the fair
    /// manual-review queue.
    pub async fn pending_for_resource(&self, resource_id: Ulid) -> Vec<Booking> {
        let Some(cal) = self.store.calendar(&resource_id) else {
            return Vec::new();
        };
        let guard = cal.read().await;
        let mut out: Vec<Booking> = guard
            .bookings
            .iter()
            .filter(|b| b.status == BookingStatus::Pending)
            .cloned()
            .collect();
        out.sort_by_key(|b| b.created_at);
        out
    }

    /// Approved bookings that haven't started yet, soonest first, optionally
    /// narrowed to one requester.
    pub async fn upcoming_approved(
        &self,
        requester_id: Option<Ulid>,
        limit: usize,
    ) -> Vec<Booking> {
        let limit = limit.min(MAX_QUERY_LIMIT);
        let now = self.now_ms();
        let mut out = Vec::new();
        for resource_id in self.store.resource_ids() {
            let Some(cal) = self.store.calendar(&resource_id) else {
                continue;
            };
            let guard = cal.read().await;
            for b in &guard.bookings {
                if b.status == BookingStatus::Approved
                    && b.span.start > now
                    && requester_id.is_none_or(|r| b.requester_id == Some(r))
                {
                    out.push(b.clone());
                }
            }
        }
        out.sort_by_key(|b| b.span.start);
        out.truncate(limit);
        out
    }

    /// Read-only conflict probe: the approved bookings overlapping `span`,
    /// optionally excluding one id (re-approval and edit flows). Exposed so
    /// callers can pre-validate a slot before submitting.
    pub async fn find_conflicts(
        &self,
        resource_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError> {
        validate_span(&span)?;
        let Some(cal) = self.store.calendar(&resource_id) else {
            return Ok(Vec::new());
        };
        let guard = cal.read().await;
        Ok(approved_conflicts(&guard, &span, exclude))
    }

    /// Counts per status, for the admin dashboard.
    pub async fn booking_stats(&self) -> BookingStats {
        let mut stats = BookingStats::default();
        for resource_id in self.store.resource_ids() {
            let Some(cal) = self.store.calendar(&resource_id) else {
                continue;
            };
            let guard = cal.read().await;
            for b in &guard.bookings {
                stats.total += 1;
                match b.status {
                    BookingStatus::Pending => stats.pending += 1,
                    BookingStatus::Approved => stats.approved += 1,
                    BookingStatus::Rejected => stats.rejected += 1,
                    BookingStatus::Cancelled => stats.cancelled += 1,
                    BookingStatus::Completed => stats.completed += 1,
                }
            }
        }
        stats
    }
}
