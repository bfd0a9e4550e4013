use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A time window `[starts_at, ends_at)` during which a sandbox should be
/// active.
///
/// Whether the window carries exclusivity semantics is derived from the
/// owning user's role at scheduling time, never stored here, so role changes
/// take effect on the next reload.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Reservation {
    /// The reservation's id.
    pub id: i64,

    /// The sandbox the window is bound to.
    pub sandbox_id: i64,

    /// When the window opens.
    pub starts_at: DateTime<Utc>,

    /// When the window closes. Always after `starts_at`.
    pub ends_at: DateTime<Utc>,

    /// Soft-disable flag; inactive reservations are ignored at reload time.
    pub active: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Reservation {
    /// Whether this window overlaps another half-open window.
    pub fn overlaps(&self, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> bool {
        self.starts_at < ends_at && starts_at < self.ends_at
    }
}
