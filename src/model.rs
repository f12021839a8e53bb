use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::calendar::Calendar;

/// Money in minor currency units. Single currency only.
pub type Amount = u64;

/// Half-open date interval `[check_in, check_out)`. A stay from the 15th to
/// the 17th occupies the nights of the 15th and the 16th.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl Stay {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Self { check_in, check_out }
    }

    /// Whole nights in the stay. Zero or negative for an inverted range.
    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn is_inverted(&self) -> bool {
        self.check_in >= self.check_out
    }

    pub fn overlaps(&self, other: &Stay) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }
}

impl fmt::Display for Stay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.check_in, self.check_out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

/// Lifecycle actions. Which status each one leads to lives in
/// [`BookingStatus::after`] and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Approve,
    Reject,
    Cancel,
    Complete,
}

impl BookingStatus {
    /// The allowed-transition table. `None` means the transition is not
    /// permitted from `self`.
    pub const fn after(self, transition: Transition) -> Option<BookingStatus> {
        use BookingStatus::*;
        match (self, transition) {
            (Pending, Transition::Approve) => Some(Confirmed),
            (Pending, Transition::Reject) => Some(Cancelled),
            (Pending | Confirmed, Transition::Cancel) => Some(Cancelled),
            (Confirmed, Transition::Complete) => Some(Completed),
            _ => None,
        }
    }

    /// Pending and confirmed bookings hold an entry in the host calendar.
    pub const fn holds_calendar(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" | "canceled" => Ok(BookingStatus::Cancelled),
            "completed" => Ok(BookingStatus::Completed),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

impl Transition {
    pub const fn as_str(self) -> &'static str {
        match self {
            Transition::Approve => "approve",
            Transition::Reject => "reject",
            Transition::Cancel => "cancel",
            Transition::Complete => "complete",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    Host,
    /// Background tasks and the host-catalog feed.
    System,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "guest" => Ok(Role::Guest),
            "host" => Ok(Role::Host),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Who is calling. Supplied by the identity layer and trusted as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn guest(user_id: Ulid) -> Self {
        Self { user_id, role: Role::Guest }
    }

    pub fn host(user_id: Ulid) -> Self {
        Self { user_id, role: Role::Host }
    }

    pub fn system() -> Self {
        Self { user_id: Ulid::nil(), role: Role::System }
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }

    /// Acting as the owner of `host`.
    pub fn owns(&self, host: &HostProfile) -> bool {
        self.role == Role::Host && self.user_id == host.owner_id
    }

    /// Acting as the guest of `booking`.
    pub fn is_guest_of(&self, booking: &Booking) -> bool {
        self.role == Role::Guest && self.user_id == booking.guest_id
    }
}

/// Host reference data, fed by the host catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostProfile {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub nightly_rate: Amount,
    pub max_guests: u32,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub host_id: Ulid,
    pub guest_id: Ulid,
    pub stay: Stay,
    pub guest_count: u32,
    pub status: BookingStatus,
    pub message: Option<String>,
    /// Host rate at request time; `total_price` derives from it, not the live rate.
    pub nightly_rate: Amount,
    pub total_price: Amount,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Confirmed and its check-out date has arrived.
    pub fn is_due_for_completion(&self, today: NaiveDate) -> bool {
        self.status == BookingStatus::Confirmed && self.stay.check_out <= today
    }

    /// Status as seen by a reader on `today`. Completion is applied lazily,
    /// so a stored `confirmed` may already read as `completed`.
    pub fn observed_status(&self, today: NaiveDate) -> BookingStatus {
        if self.is_due_for_completion(today) {
            BookingStatus::Completed
        } else {
            self.status
        }
    }

    /// Copy of the record as seen on `today`.
    pub fn observed(&self, today: NaiveDate) -> Booking {
        let mut b = self.clone();
        b.status = self.observed_status(today);
        b
    }
}

/// Everything the engine keeps for one host. Guarded as a unit by the host lock.
#[derive(Debug, Clone)]
pub struct HostState {
    pub profile: HostProfile,
    pub bookings: HashMap<Ulid, Booking>,
    /// Intervals of pending and confirmed bookings.
    pub calendar: Calendar,
}

impl HostState {
    pub fn new(profile: HostProfile) -> Self {
        Self {
            profile,
            bookings: HashMap::new(),
            calendar: Calendar::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub booking_id: Ulid,
    pub transition: Transition,
    pub status: BookingStatus,
    pub reason: Option<String>,
}

/// WAL record format. One record per committed exclusive section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    HostUpserted {
        profile: HostProfile,
    },
    /// A new booking, or a full booking snapshot written by compaction.
    BookingRecorded {
        booking: Booking,
    },
    /// All status changes from one section on one host, committed together.
    StatusChanged {
        host_id: Ulid,
        at: DateTime<Utc>,
        changes: Vec<StatusChange>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Created,
    Approved,
    Rejected,
    Cancelled,
    Completed,
}

impl NoticeKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            NoticeKind::Created => "created",
            NoticeKind::Approved => "approved",
            NoticeKind::Rejected => "rejected",
            NoticeKind::Cancelled => "cancelled",
            NoticeKind::Completed => "completed",
        }
    }
}

impl From<Transition> for NoticeKind {
    fn from(t: Transition) -> Self {
        match t {
            Transition::Approve => NoticeKind::Approved,
            Transition::Reject => NoticeKind::Rejected,
            Transition::Cancel => NoticeKind::Cancelled,
            Transition::Complete => NoticeKind::Completed,
        }
    }
}

/// One notification per successful lifecycle step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingNotice {
    pub kind: NoticeKind,
    pub booking_id: Ulid,
    pub host_id: Ulid,
    pub guest_id: Ulid,
    pub status: BookingStatus,
    pub reason: Option<String>,
}

impl BookingNotice {
    pub fn new(kind: NoticeKind, booking: &Booking) -> Self {
        let reason = match booking.status {
            BookingStatus::Cancelled => booking.cancellation_reason.clone(),
            _ => None,
        };
        Self {
            kind,
            booking_id: booking.id,
            host_id: booking.host_id,
            guest_id: booking.guest_id,
            status: booking.status,
            reason,
        }
    }
}
