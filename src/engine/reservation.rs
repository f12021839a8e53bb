use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::BOOKINGS_CREATED_TOTAL;
use crate::pricing;

use super::{Engine, EngineError, ValidationRule};

/// A guest's request to stay at a host.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub host_id: Ulid,
    pub stay: Stay,
    pub guest_count: u32,
    pub message: Option<String>,
}

/// Date rules that need no host state.
pub(super) fn validate_stay(stay: &Stay, today: NaiveDate) -> Result<(), ValidationRule> {
    if stay.is_inverted() {
        return Err(ValidationRule::InvertedRange);
    }
    if stay.check_in < today {
        return Err(ValidationRule::PastDate);
    }
    if stay.check_in.signed_duration_since(today).num_days() > MAX_ADVANCE_DAYS {
        return Err(ValidationRule::BeyondHorizon);
    }
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(ValidationRule::StayTooLong);
    }
    Ok(())
}

impl Engine {
    /// Admit a booking request as `Pending`.
    ///
    /// Pending bookings may overlap each other freely; only a confirmed
    /// booking on any requested night blocks admission. The overlap check
    /// and the insert happen inside the host's section, so two requests can
    /// never both pass against the same calendar snapshot.
    pub async fn create_booking(
        &self,
        actor: Actor,
        request: BookingRequest,
    ) -> Result<Booking, EngineError> {
        if actor.role != Role::Guest {
            return Err(EngineError::Forbidden("only guests can request bookings"));
        }
        let BookingRequest {
            host_id,
            stay,
            guest_count,
            message,
        } = request;
        let today = self.clock.today();
        validate_stay(&stay, today)?;
        if guest_count == 0 {
            return Err(ValidationRule::NoGuests.into());
        }
        if message
            .as_ref()
            .is_some_and(|m| m.chars().count() > MAX_MESSAGE_LEN)
        {
            return Err(ValidationRule::MessageTooLong.into());
        }

        let gate = self.enter_gate().await?;
        let guard = self.lock_host(host_id).await?;

        let host = &guard.profile;
        if !host.active {
            return Err(ValidationRule::InactiveHost.into());
        }
        if host.owner_id == actor.user_id {
            return Err(ValidationRule::OwnListing.into());
        }
        if guest_count > host.max_guests {
            return Err(ValidationRule::CapacityExceeded {
                max: host.max_guests,
            }
            .into());
        }
        let nightly_rate = host.nightly_rate;
        // Entries the next sweep will drop do not count against the cap.
        if guard.calendar.len() >= MAX_CALENDAR_ENTRIES
            && guard.calendar.live_on(today) >= MAX_CALENDAR_ENTRIES
        {
            return Err(ValidationRule::CalendarFull.into());
        }
        if let Some(blocking) = guard
            .calendar
            .overlaps(&stay, &[BookingStatus::Confirmed])
            .first()
        {
            info!(%host_id, requested = %stay, blocked = %blocking.stay, "request overlaps a confirmed stay");
            return Err(EngineError::Conflict {
                blocked: blocking.stay,
            });
        }
        let quote = pricing::quote(&stay, nightly_rate).map_err(ValidationRule::from)?;
        let competing = guard
            .calendar
            .overlaps(&stay, &[BookingStatus::Pending])
            .len();

        let now = self.clock.now();
        let booking = Booking {
            id: Ulid::new(),
            host_id,
            guest_id: actor.user_id,
            stay,
            guest_count,
            status: BookingStatus::Pending,
            message,
            nightly_rate,
            total_price: quote.total,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };
        let guard = self
            .persist_and_apply(
                guard,
                Event::BookingRecorded {
                    booking: booking.clone(),
                },
            )
            .await?;
        drop(guard);
        drop(gate);

        metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
        info!(
            booking_id = %booking.id,
            %host_id,
            guest_id = %booking.guest_id,
            stay = %booking.stay,
            nights = quote.nights,
            total = booking.total_price,
            competing,
            "booking requested"
        );
        self.dispatch(&[BookingNotice::new(NoticeKind::Created, &booking)]);
        Ok(booking)
    }
}
