use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// The conflict rule. Touching endpoints do not overlap, so back-to-back
    /// bookings are always legal; any shared instant is a conflict.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Booking workflow states. `Rejected`, `Cancelled` and `Completed` are
/// terminal. Only `Approved` bookings count toward conflict detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Approval and rejection both gate on this: the booking must still be
    /// awaiting a decision.
    pub fn can_decide(&self) -> bool {
        matches!(self, BookingStatus::Pending)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Approved)
    }

    pub fn can_complete(&self) -> bool {
        matches!(self, BookingStatus::Approved)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Rejected | BookingStatus::Cancelled | BookingStatus::Completed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single booking. `requester_id` is `None` when the requester's identity
/// was removed after the fact — the booking itself is kept as history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub requester_id: Option<Ulid>,
    pub span: Span,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// All bookings for one resource, sorted by `span.start`.
///
/// Calendars are created lazily on the first booking for a resource —
/// resource existence is validated by the resource catalog, not here.
#[derive(Debug, Clone)]
pub struct ResourceCalendar {
    pub resource_id: Ulid,
    pub bookings: Vec<Booking>,
}

impl ResourceCalendar {
    pub fn new(resource_id: Ulid) -> Self {
        Self {
            resource_id,
            bookings: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        if let Some(pos) = self.bookings.iter().position(|b| b.id == id) {
            Some(self.bookings.remove(pos))
        } else {
            None
        }
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Only bookings whose span overlaps the query window. Binary search
    /// skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
/// Every event carries its own timestamp so replay never reads a clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// `status` is `Pending`, or `Approved` when the resource catalog said
    /// the resource needs no approval.
    BookingCreated {
        id: Ulid,
        resource_id: Ulid,
        requester_id: Option<Ulid>,
        span: Span,
        status: BookingStatus,
        at: Ms,
    },
    BookingApproved {
        id: Ulid,
        resource_id: Ulid,
        at: Ms,
    },
    BookingRejected {
        id: Ulid,
        resource_id: Ulid,
        at: Ms,
    },
    BookingCancelled {
        id: Ulid,
        resource_id: Ulid,
        at: Ms,
    },
    BookingCompleted {
        id: Ulid,
        resource_id: Ulid,
        at: Ms,
    },
    /// Requester identity removed — nullify the reference, keep the booking.
    RequesterDetached {
        booking_id: Ulid,
        resource_id: Ulid,
    },
    /// Resource removed from the catalog — cascade: the whole calendar goes.
    ResourcePurged {
        resource_id: Ulid,
    },
}

/// Booking counts by status, for the administrative dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookingStats {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub cancelled: usize,
    pub completed: usize,
}
