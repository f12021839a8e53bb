use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{BookingStatus, Stay};

/// One booking's claim on a host's dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub booking_id: Ulid,
    pub stay: Stay,
    pub status: BookingStatus,
}

/// Per-host interval index: entries of live (pending or confirmed) bookings,
/// sorted by `stay.check_in`.
///
/// Released entries are removed, so the index never grows with history.
/// `longest` bounds how far before a query an overlapping entry can start,
/// which lets `overlapping` binary-search both ends of the candidate window.
#[derive(Debug, Clone, Default)]
pub struct Calendar {
    entries: Vec<CalendarEntry>,
    /// Nights of the longest stay ever reserved. Never shrinks.
    longest: i64,
}

impl Calendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CalendarEntry] {
        &self.entries
    }

    pub fn get(&self, booking_id: Ulid) -> Option<&CalendarEntry> {
        self.entries.iter().find(|e| e.booking_id == booking_id)
    }

    /// Record `stay` as held by `booking_id` with `status`, replacing any
    /// previous entry for the same booking.
    pub fn reserve(&mut self, booking_id: Ulid, stay: Stay, status: BookingStatus) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.booking_id == booking_id)
            && existing.stay == stay
        {
            existing.status = status;
            return;
        }
        self.release(booking_id);
        self.longest = self.longest.max(stay.nights());
        let pos = self
            .entries
            .partition_point(|e| e.stay.check_in <= stay.check_in);
        self.entries.insert(
            pos,
            CalendarEntry {
                booking_id,
                stay,
                status,
            },
        );
    }

    /// Drop the entry for `booking_id`, if any.
    pub fn release(&mut self, booking_id: Ulid) -> Option<CalendarEntry> {
        let pos = self.entries.iter().position(|e| e.booking_id == booking_id)?;
        Some(self.entries.remove(pos))
    }

    /// Entries whose stay overlaps `query`.
    pub fn overlapping(&self, query: &Stay) -> impl Iterator<Item = &CalendarEntry> {
        // Everything at index >= right starts on or after query.check_out.
        let right = self
            .entries
            .partition_point(|e| e.stay.check_in < query.check_out);
        // Everything below left ends on or before query.check_in.
        let reach = Duration::days(self.longest);
        // A reach past the end of the calendar always touches the query.
        let left = self.entries[..right].partition_point(|e| {
            e.stay
                .check_in
                .checked_add_signed(reach)
                .is_some_and(|end| end <= query.check_in)
        });
        self.entries[left..right]
            .iter()
            .filter(move |e| e.stay.check_out > query.check_in)
    }

    /// Entries a sweep on `today` keeps: pending requests whose check-in has
    /// not passed and confirmed stays that have not ended.
    pub fn live_on(&self, today: NaiveDate) -> usize {
        self.entries
            .iter()
            .filter(|e| match e.status {
                BookingStatus::Pending => e.stay.check_in >= today,
                _ => e.stay.check_out > today,
            })
            .count()
    }

    /// Entries overlapping `query` whose status is one of `statuses`.
    pub fn overlaps(&self, query: &Stay, statuses: &[BookingStatus]) -> Vec<CalendarEntry> {
        self.overlapping(query)
            .filter(|e| statuses.contains(&e.status))
            .copied()
            .collect()
    }

    /// True if no confirmed entry overlaps `query`.
    pub fn is_free(&self, query: &Stay) -> bool {
        !self
            .overlapping(query)
            .any(|e| e.status == BookingStatus::Confirmed)
    }
}
