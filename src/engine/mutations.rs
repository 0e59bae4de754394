use std::sync::Arc;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, validate_span};
use super::{Engine, EngineError};

/// Caller knobs for `create_booking`. `check_conflicts` defaults on;
/// `auto_approve` is set when the resource catalog says the resource does
/// not require approval.
#[derive(Debug, Clone, Copy)]
pub struct CreateOptions {
    pub check_conflicts: bool,
    pub auto_approve: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            check_conflicts: true,
            auto_approve: false,
        }
    }
}

impl Engine {
    /// Create a booking in `Pending` (or directly `Approved` when the
    /// resource needs no approval). The calendar write lock is held from the
    /// conflict scan through the WAL commit, so two racing creates on the
    /// same resource serialize.
    pub async fn create_booking(
        &self,
        id: Ulid,
        resource_id: Ulid,
        requester_id: Option<Ulid>,
        span: Span,
        opts: CreateOptions,
    ) -> Result<Booking, EngineError> {
        let result = self
            .create_inner(id, resource_id, requester_id, span, opts)
            .await;
        track_op("create", &result);
        result
    }

    async fn create_inner(
        &self,
        id: Ulid,
        resource_id: Ulid,
        requester_id: Option<Ulid>,
        span: Span,
        opts: CreateOptions,
    ) -> Result<Booking, EngineError> {
        validate_span(&span)?;
        // Reserve the id up front — two racing creates with the same id must
        // resolve before either touches a calendar.
        if !self.store.claim_booking(id, resource_id) {
            return Err(EngineError::Validation("booking id already in use"));
        }
        let result = self
            .create_claimed(id, resource_id, requester_id, span, opts)
            .await;
        if result.is_err() {
            self.store.release_booking(&id);
        }
        result
    }

    async fn create_claimed(
        &self,
        id: Ulid,
        resource_id: Ulid,
        requester_id: Option<Ulid>,
        span: Span,
        opts: CreateOptions,
    ) -> Result<Booking, EngineError> {
        // A concurrent purge can remove the calendar from the map while we
        // wait on its lock; committing into that orphan would strand the
        // booking. Re-fetch until the locked calendar is the live one.
        let mut cal = self.store.calendar_or_create(resource_id);
        let mut guard = loop {
            let guard = cal.clone().write_owned().await;
            let current = self.store.calendar_or_create(resource_id);
            if Arc::ptr_eq(&cal, &current) {
                break guard;
            }
            cal = current;
        };
        if guard.bookings.len() >= MAX_BOOKINGS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many bookings on resource"));
        }

        // An auto-approved create lands straight in the invariant-bearing
        // state, so it always scans — the caller flag only covers the
        // pending path, where approval re-checks anyway.
        if opts.check_conflicts || opts.auto_approve {
            check_no_conflict(&guard, &span, None)?;
        }

        let status = if opts.auto_approve {
            BookingStatus::Approved
        } else {
            BookingStatus::Pending
        };
        let at = self.now_ms();
        let event = Event::BookingCreated {
            id,
            resource_id,
            requester_id,
            span,
            status,
            at,
        };
        self.persist_and_apply(resource_id, &mut guard, &event)
            .await?;
        snapshot(&guard, id)
    }

    /// Approve a pending booking. The conflict scan re-runs here, excluding
    /// the booking itself, because the world may have changed since create —
    /// an overlapping request may have been approved first. On conflict the
    /// booking stays `Pending` for manual resolution.
    pub async fn approve_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let result = self.approve_inner(id).await;
        track_op("approve", &result);
        result
    }

    async fn approve_inner(&self, id: Ulid) -> Result<Booking, EngineError> {
        let (resource_id, mut guard) = self.resolve_booking_write(&id).await?;
        let current = snapshot(&guard, id)?;
        if !current.status.can_decide() {
            return Err(EngineError::InvalidTransition {
                id,
                status: current.status,
                action: "approve",
            });
        }

        check_no_conflict(&guard, &current.span, Some(id))?;

        let event = Event::BookingApproved {
            id,
            resource_id,
            at: self.now_ms(),
        };
        self.persist_and_apply(resource_id, &mut guard, &event)
            .await?;
        snapshot(&guard, id)
    }

    /// Reject a pending booking. No conflict scan — rejection never creates
    /// a commitment.
    pub async fn reject_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let result = self.reject_inner(id).await;
        track_op("reject", &result);
        result
    }

    async fn reject_inner(&self, id: Ulid) -> Result<Booking, EngineError> {
        let (resource_id, mut guard) = self.resolve_booking_write(&id).await?;
        let current = snapshot(&guard, id)?;
        if !current.status.can_decide() {
            return Err(EngineError::InvalidTransition {
                id,
                status: current.status,
                action: "reject",
            });
        }

        let event = Event::BookingRejected {
            id,
            resource_id,
            at: self.now_ms(),
        };
        self.persist_and_apply(resource_id, &mut guard, &event)
            .await?;
        snapshot(&guard, id)
    }

    /// Cancel a pending or approved booking. A cancelled booking no longer
    /// constrains future conflict checks.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let result = self.cancel_inner(id).await;
        track_op("cancel", &result);
        result
    }

    async fn cancel_inner(&self, id: Ulid) -> Result<Booking, EngineError> {
        let (resource_id, mut guard) = self.resolve_booking_write(&id).await?;
        let current = snapshot(&guard, id)?;
        if !current.status.can_cancel() {
            return Err(EngineError::InvalidTransition {
                id,
                status: current.status,
                action: "cancel",
            });
        }

        let event = Event::BookingCancelled {
            id,
            resource_id,
            at: self.now_ms(),
        };
        self.persist_and_apply(resource_id, &mut guard, &event)
            .await?;
        snapshot(&guard, id)
    }

    /// Mark an approved booking completed. The engine only validates the
    /// precondition — deciding *when* end has passed is the sweep's job.
    pub async fn complete_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let result = self.complete_inner(id).await;
        track_op("complete", &result);
        result
    }

    async fn complete_inner(&self, id: Ulid) -> Result<Booking, EngineError> {
        let (resource_id, mut guard) = self.resolve_booking_write(&id).await?;
        let current = snapshot(&guard, id)?;
        if !current.status.can_complete() {
            return Err(EngineError::InvalidTransition {
                id,
                status: current.status,
                action: "complete",
            });
        }

        let event = Event::BookingCompleted {
            id,
            resource_id,
            at: self.now_ms(),
        };
        self.persist_and_apply(resource_id, &mut guard, &event)
            .await?;
        snapshot(&guard, id)
    }

    /// Identity collaborator callback: the requester was removed. Their
    /// bookings survive as history with `requester_id` nullified. Returns
    /// how many bookings were detached.
    pub async fn detach_requester(&self, requester_id: Ulid) -> Result<usize, EngineError> {
        let booking_ids = self.store.bookings_of_requester(&requester_id);
        let mut detached = 0usize;
        for booking_id in booking_ids {
            // The booking may have been purged with its resource meanwhile.
            let (resource_id, mut guard) = match self.resolve_booking_write(&booking_id).await {
                Ok(pair) => pair,
                Err(EngineError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let event = Event::RequesterDetached {
                booking_id,
                resource_id,
            };
            self.persist_and_apply(resource_id, &mut guard, &event)
                .await?;
            detached += 1;
        }
        Ok(detached)
    }

    /// Resource collaborator callback: the resource was removed from the
    /// catalog. Cascade — the calendar and every booking on it go away.
    /// Returns how many bookings were dropped.
    pub async fn purge_resource(&self, resource_id: Ulid) -> Result<usize, EngineError> {
        let Some(cal) = self.store.calendar(&resource_id) else {
            return Ok(0);
        };
        let guard = cal.write().await;
        let event = Event::ResourcePurged { resource_id };
        self.wal_append(&event).await?;
        self.store.forget_bookings(&guard.bookings);
        let dropped = guard.bookings.len();
        self.store.remove_calendar(&resource_id);
        self.notify.send(resource_id, &event);
        self.notify.remove(&resource_id);
        Ok(dropped)
    }

    /// Approved bookings whose end has passed, as `(booking_id, resource_id)`.
    /// Input for the completion sweep; each completion is then an independent
    /// atomic operation.
    pub fn collect_elapsed(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut elapsed = Vec::new();
        for resource_id in self.store.resource_ids() {
            let Some(cal) = self.store.calendar(&resource_id) else {
                continue;
            };
            if let Ok(guard) = cal.try_read() {
                for b in &guard.bookings {
                    if b.status == BookingStatus::Approved && b.span.end <= now {
                        elapsed.push((b.id, resource_id));
                    }
                }
            }
        }
        elapsed
    }

    /// Compact the WAL: rewrite it with the minimal events recreating the
    /// current state — one create per live booking, plus its final status
    /// transition so `updated_at` survives replay.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Baseline before snapshotting. Any append that commits between here
        // and the rewrite moves the counter, the writer refuses the stale
        // snapshot, and the compactor tries again on its next tick — a
        // rewrite from stale state would erase durably acknowledged events.
        let expected_appends = self.wal_appends_since_compact().await;

        let mut events = Vec::new();
        for resource_id in self.store.resource_ids() {
            let Some(cal) = self.store.calendar(&resource_id) else {
                continue;
            };
            let guard = cal
                .try_read()
                .map_err(|_| EngineError::Wal("compact: calendar busy".into()))?;
            for b in &guard.bookings {
                events.push(Event::BookingCreated {
                    id: b.id,
                    resource_id,
                    requester_id: b.requester_id,
                    span: b.span,
                    status: BookingStatus::Pending,
                    at: b.created_at,
                });
                if let Some(transition) = final_transition(b, resource_id) {
                    events.push(transition);
                }
            }
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.wal_tx
            .send(super::WalCommand::Compact {
                events,
                expected_appends,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self
            .wal_tx
            .send(super::WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// The status event that takes a freshly recreated pending booking to the
/// booking's current status. `Completed` needs two hops (approve, complete)
/// live, but replay applies statuses directly, so one event suffices.
fn final_transition(b: &Booking, resource_id: Ulid) -> Option<Event> {
    let id = b.id;
    let at = b.updated_at;
    match b.status {
        BookingStatus::Pending => None,
        BookingStatus::Approved => Some(Event::BookingApproved { id, resource_id, at }),
        BookingStatus::Rejected => Some(Event::BookingRejected { id, resource_id, at }),
        BookingStatus::Cancelled => Some(Event::BookingCancelled { id, resource_id, at }),
        BookingStatus::Completed => Some(Event::BookingCompleted { id, resource_id, at }),
    }
}

fn snapshot(cal: &ResourceCalendar, id: Ulid) -> Result<Booking, EngineError> {
    cal.booking(id).cloned().ok_or(EngineError::NotFound(id))
}

fn track_op<T>(op: &'static str, result: &Result<T, EngineError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(EngineError::Conflict(_)) => {
            metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
            "conflict"
        }
        Err(_) => "error",
    };
    metrics::counter!(observability::LIFECYCLE_OPS_TOTAL, "op" => op, "outcome" => outcome)
        .increment(1);
}
