//! Hard caps on caller input. Nothing here is tunable at runtime — a caller
//! that hits one of these gets `EngineError::LimitExceeded`.

use crate::model::Ms;

/// Earliest accepted timestamp: 2000-01-01T00:00:00Z.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;

/// Latest accepted timestamp: 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Widest single booking: 90 days.
pub const MAX_SPAN_DURATION_MS: Ms = 90 * 24 * 3_600_000;

/// Bookings retained per resource calendar (all statuses, history included).
pub const MAX_BOOKINGS_PER_RESOURCE: usize = 100_000;

/// Cap on the `limit` parameter of list queries.
pub const MAX_QUERY_LIMIT: usize = 1_000;
