use std::collections::BTreeMap;

use ulid::Ulid;

use crate::calendar::CalendarEntry;
use crate::model::*;

use super::{Engine, EngineError, ValidationRule};

fn by_check_in(bookings: &mut [Booking]) {
    bookings.sort_by_key(|b| (b.stay.check_in, b.id));
}

impl Engine {
    /// Booking as readers see it: a confirmed stay that has ended reads as completed.
    pub async fn get_booking(&self, actor: Actor, booking_id: Ulid) -> Result<Booking, EngineError> {
        let host_id = self
            .host_for_booking(&booking_id)
            .ok_or(EngineError::booking_not_found(booking_id))?;
        let guard = self.read_host(host_id).await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::booking_not_found(booking_id))?;
        if !actor.is_system() && !actor.owns(&guard.profile) && !actor.is_guest_of(booking) {
            return Err(EngineError::Forbidden("not a party to this booking"));
        }
        Ok(booking.observed(self.clock.today()))
    }

    pub async fn list_bookings_for_host(
        &self,
        actor: Actor,
        host_id: Ulid,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, EngineError> {
        let guard = self.read_host(host_id).await?;
        if !actor.is_system() && !actor.owns(&guard.profile) {
            return Err(EngineError::Forbidden("only the host can list its bookings"));
        }
        let today = self.clock.today();
        let mut out: Vec<Booking> = guard
            .bookings
            .values()
            .map(|b| b.observed(today))
            .filter(|b| status.is_none_or(|s| b.status == s))
            .collect();
        by_check_in(&mut out);
        Ok(out)
    }

    pub async fn list_bookings_for_guest(
        &self,
        actor: Actor,
        guest_id: Ulid,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, EngineError> {
        let own = actor.role == Role::Guest && actor.user_id == guest_id;
        if !actor.is_system() && !own {
            return Err(EngineError::Forbidden("only the guest can list their bookings"));
        }

        // Group by host so each host is read-locked once.
        let mut per_host: BTreeMap<Ulid, Vec<Ulid>> = BTreeMap::new();
        if let Some(ids) = self.indexes.guest_bookings.get(&guest_id) {
            for id in ids.iter() {
                if let Some(host_id) = self.host_for_booking(id) {
                    per_host.entry(host_id).or_default().push(*id);
                }
            }
        }

        let today = self.clock.today();
        let mut out = Vec::new();
        for (host_id, ids) in per_host {
            let guard = self.read_host(host_id).await?;
            out.extend(
                ids.iter()
                    .filter_map(|id| guard.bookings.get(id))
                    .map(|b| b.observed(today))
                    .filter(|b| status.is_none_or(|s| b.status == s)),
            );
        }
        by_check_in(&mut out);
        Ok(out)
    }

    /// True when the host is active and no confirmed booking holds any night of `stay`.
    pub async fn is_range_available(&self, host_id: Ulid, stay: Stay) -> Result<bool, EngineError> {
        if stay.is_inverted() {
            return Err(ValidationRule::InvertedRange.into());
        }
        let guard = self.read_host(host_id).await?;
        Ok(guard.profile.active && guard.calendar.is_free(&stay))
    }

    /// Calendar entries of the host overlapping `stay` whose status is in `statuses`.
    pub async fn overlaps(
        &self,
        host_id: Ulid,
        stay: Stay,
        statuses: &[BookingStatus],
    ) -> Result<Vec<CalendarEntry>, EngineError> {
        let guard = self.read_host(host_id).await?;
        Ok(guard.calendar.overlaps(&stay, statuses))
    }
}
