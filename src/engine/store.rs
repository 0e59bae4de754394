use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::SharedCalendar;

/// In-memory booking store: one calendar per resource plus the reverse
/// indexes the query surface needs. The store is the only code that mutates
/// persisted booking state — mutations go through `apply_event`, queries
/// read through the calendar locks.
pub struct BookingStore {
    calendars: DashMap<Ulid, SharedCalendar>,
    /// Reverse lookup: booking id → resource id.
    booking_to_resource: DashMap<Ulid, Ulid>,
    /// Requester → booking ids, history included.
    by_requester: DashMap<Ulid, Vec<Ulid>>,
}

impl Default for BookingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingStore {
    pub fn new() -> Self {
        Self {
            calendars: DashMap::new(),
            booking_to_resource: DashMap::new(),
            by_requester: DashMap::new(),
        }
    }

    // ── Calendar access ──────────────────────────────────────

    pub fn calendar(&self, resource_id: &Ulid) -> Option<SharedCalendar> {
        self.calendars.get(resource_id).map(|e| e.value().clone())
    }

    /// Calendars come into existence with the first booking — resource
    /// existence is the catalog's concern, not ours.
    pub fn calendar_or_create(&self, resource_id: Ulid) -> SharedCalendar {
        self.calendars
            .entry(resource_id)
            .or_insert_with(|| Arc::new(RwLock::new(ResourceCalendar::new(resource_id))))
            .value()
            .clone()
    }

    pub fn remove_calendar(&self, resource_id: &Ulid) -> Option<SharedCalendar> {
        self.calendars
            .remove(resource_id)
            .map(|(_, cal)| cal)
    }

    pub fn resource_ids(&self) -> Vec<Ulid> {
        self.calendars.iter().map(|e| *e.key()).collect()
    }

    // ── Booking index ────────────────────────────────────────

    pub fn resource_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_resource
            .get(booking_id)
            .map(|e| *e.value())
    }

    /// Atomically reserve a booking id for a create in flight. Two racing
    /// creates with the same caller-supplied id resolve here: exactly one
    /// claim succeeds.
    pub fn claim_booking(&self, booking_id: Ulid, resource_id: Ulid) -> bool {
        match self.booking_to_resource.entry(booking_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(resource_id);
                true
            }
        }
    }

    /// Release a claim whose create did not commit.
    pub fn release_booking(&self, booking_id: &Ulid) {
        self.booking_to_resource.remove(booking_id);
    }

    // ── Requester index ──────────────────────────────────────

    pub fn bookings_of_requester(&self, requester_id: &Ulid) -> Vec<Ulid> {
        self.by_requester
            .get(requester_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Drop index entries for bookings that no longer exist (resource purge).
    pub fn forget_bookings(&self, bookings: &[Booking]) {
        for b in bookings {
            self.booking_to_resource.remove(&b.id);
            if let Some(rid) = b.requester_id
                && let Some(mut ids) = self.by_requester.get_mut(&rid)
            {
                ids.retain(|id| id != &b.id);
            }
        }
    }

    // ── Event application ────────────────────────────────────

    /// Apply an event to a calendar the caller has locked. `ResourcePurged`
    /// is handled at the calendar-map level, not here.
    pub fn apply_event(&self, cal: &mut ResourceCalendar, event: &Event) {
        match event {
            Event::BookingCreated {
                id,
                resource_id,
                requester_id,
                span,
                status,
                at,
            } => {
                cal.insert_booking(Booking {
                    id: *id,
                    resource_id: *resource_id,
                    requester_id: *requester_id,
                    span: *span,
                    status: *status,
                    created_at: *at,
                    updated_at: *at,
                });
                self.booking_to_resource.insert(*id, *resource_id);
                if let Some(rid) = requester_id {
                    self.by_requester.entry(*rid).or_default().push(*id);
                }
            }
            Event::BookingApproved { id, at, .. } => {
                set_status(cal, *id, BookingStatus::Approved, *at);
            }
            Event::BookingRejected { id, at, .. } => {
                set_status(cal, *id, BookingStatus::Rejected, *at);
            }
            Event::BookingCancelled { id, at, .. } => {
                set_status(cal, *id, BookingStatus::Cancelled, *at);
            }
            Event::BookingCompleted { id, at, .. } => {
                set_status(cal, *id, BookingStatus::Completed, *at);
            }
            Event::RequesterDetached { booking_id, .. } => {
                if let Some(b) = cal.booking_mut(*booking_id) {
                    if let Some(rid) = b.requester_id.take()
                        && let Some(mut ids) = self.by_requester.get_mut(&rid)
                    {
                        ids.retain(|id| id != booking_id);
                    }
                }
            }
            Event::ResourcePurged { .. } => {}
        }
    }
}

fn set_status(cal: &mut ResourceCalendar, id: Ulid, status: BookingStatus, at: Ms) {
    if let Some(b) = cal.booking_mut(id) {
        b.status = status;
        b.updated_at = at;
    }
}
