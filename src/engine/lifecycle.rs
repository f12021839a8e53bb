use chrono::NaiveDate;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::MAX_REASON_LEN;
use crate::model::*;
use crate::observability::{CASCADE_CANCELLATIONS_TOTAL, TRANSITIONS_TOTAL};

use super::{Engine, EngineError, ValidationRule};

/// Reason recorded on pending bookings displaced by an approval.
pub const CASCADE_REASON: &str = "dates no longer available";

/// Reason recorded on pending requests the sweep drops after check-in passed.
pub const EXPIRED_REASON: &str = "request expired before check-in";

fn check_reason(reason: &Option<String>) -> Result<(), ValidationRule> {
    match reason {
        Some(r) if r.chars().count() > MAX_REASON_LEN => Err(ValidationRule::ReasonTooLong),
        _ => Ok(()),
    }
}

fn authorize(
    actor: &Actor,
    host: &HostProfile,
    booking: &Booking,
    transition: Transition,
) -> Result<(), EngineError> {
    match transition {
        Transition::Approve | Transition::Reject if !actor.owns(host) => Err(
            EngineError::Forbidden("only the host can approve or reject"),
        ),
        Transition::Cancel if !actor.owns(host) && !actor.is_guest_of(booking) => Err(
            EngineError::Forbidden("only the guest or the host can cancel"),
        ),
        Transition::Complete if !actor.is_system() => {
            Err(EngineError::Forbidden("completion is system-only"))
        }
        _ => Ok(()),
    }
}

fn steps(changes: &[StatusChange]) -> Vec<(Ulid, Transition)> {
    changes.iter().map(|c| (c.booking_id, c.transition)).collect()
}

fn notices_for(hs: &HostState, applied: &[(Ulid, Transition)]) -> Vec<BookingNotice> {
    applied
        .iter()
        .filter_map(|(id, transition)| {
            hs.bookings
                .get(id)
                .map(|b| BookingNotice::new((*transition).into(), b))
        })
        .collect()
}

impl Engine {
    /// Confirm a pending booking. Every other pending booking that shares a
    /// night is cancelled in the same section and the same WAL record.
    pub async fn approve(&self, actor: Actor, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(actor, booking_id, Transition::Approve, None)
            .await
    }

    pub async fn reject(
        &self,
        actor: Actor,
        booking_id: Ulid,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        self.transition(actor, booking_id, Transition::Reject, reason)
            .await
    }

    /// Cancel a pending or confirmed booking. Cancelling an already
    /// cancelled booking returns it unchanged.
    pub async fn cancel(
        &self,
        actor: Actor,
        booking_id: Ulid,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        self.transition(actor, booking_id, Transition::Cancel, reason)
            .await
    }

    /// Persist completion of a confirmed booking whose check-out has passed.
    pub async fn complete(&self, actor: Actor, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(actor, booking_id, Transition::Complete, None)
            .await
    }

    async fn transition(
        &self,
        actor: Actor,
        booking_id: Ulid,
        transition: Transition,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        check_reason(&reason)?;

        let gate = self.enter_gate().await?;
        let (host_id, guard) = self.lock_booking_host(booking_id).await?;
        let today = self.clock.today();

        let booking = guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::booking_not_found(booking_id))?;
        authorize(&actor, &guard.profile, &booking, transition)?;

        // Completion acts on what is stored; everything else on what readers see.
        let current = match transition {
            Transition::Complete => booking.status,
            _ => booking.observed_status(today),
        };
        if transition == Transition::Cancel && current == BookingStatus::Cancelled {
            debug!(%booking_id, "cancel of a cancelled booking");
            return Ok(booking);
        }
        let next = current
            .after(transition)
            .ok_or(EngineError::InvalidTransition {
                from: current,
                transition,
            })?;
        if transition == Transition::Complete && !booking.is_due_for_completion(today) {
            return Err(EngineError::InvalidTransition {
                from: current,
                transition,
            });
        }

        if transition == Transition::Approve && booking.stay.check_in < today {
            return Err(ValidationRule::PastDate.into());
        }

        let mut changes = vec![StatusChange {
            booking_id,
            transition,
            status: next,
            reason,
        }];
        if transition == Transition::Approve {
            let others = |e: &crate::calendar::CalendarEntry| e.booking_id != booking_id;
            if let Some(clash) = guard
                .calendar
                .overlaps(&booking.stay, &[BookingStatus::Confirmed])
                .into_iter()
                .find(others)
            {
                return Err(EngineError::Conflict {
                    blocked: clash.stay,
                });
            }
            let mut displaced: Vec<Ulid> = guard
                .calendar
                .overlaps(&booking.stay, &[BookingStatus::Pending])
                .into_iter()
                .filter(others)
                .map(|e| e.booking_id)
                .collect();
            displaced.sort();
            changes.extend(displaced.into_iter().map(|id| StatusChange {
                booking_id: id,
                transition: Transition::Reject,
                status: BookingStatus::Cancelled,
                reason: Some(CASCADE_REASON.into()),
            }));
        }

        let cascaded = changes.len() - 1;
        let applied = steps(&changes);
        let event = Event::StatusChanged {
            host_id,
            at: self.clock.now(),
            changes,
        };
        let guard = self.persist_and_apply(guard, event).await?;
        let notices = notices_for(&guard, &applied);
        let updated = guard
            .bookings
            .get(&booking_id)
            .map(|b| b.observed(today))
            .ok_or(EngineError::booking_not_found(booking_id))?;
        drop(guard);
        drop(gate);

        metrics::counter!(TRANSITIONS_TOTAL, "transition" => transition.as_str()).increment(1);
        if cascaded > 0 {
            metrics::counter!(CASCADE_CANCELLATIONS_TOTAL).increment(cascaded as u64);
        }
        info!(
            %booking_id,
            %host_id,
            %transition,
            from = %current,
            to = %next,
            cascaded,
            "booking transitioned"
        );
        self.dispatch(&notices);
        Ok(updated)
    }

    /// Persist completion for every confirmed booking whose check-out has
    /// passed, and cancel pending requests whose check-in has passed. Hosts
    /// that stay busy past the lock timeout are left for the next sweep.
    /// Returns how many bookings were completed.
    pub async fn complete_due_bookings(&self) -> Result<usize, EngineError> {
        let today = self.clock.today();
        let host_ids: Vec<Ulid> = self.hosts.iter().map(|e| *e.key()).collect();
        let mut completed = 0;
        for host_id in host_ids {
            match self.complete_due_for_host(host_id, today).await {
                Ok(n) => completed += n,
                Err(EngineError::Busy) => debug!(%host_id, "sweep skipped busy host"),
                Err(EngineError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(completed)
    }

    async fn complete_due_for_host(
        &self,
        host_id: Ulid,
        today: NaiveDate,
    ) -> Result<usize, EngineError> {
        let gate = self.enter_gate().await?;
        let guard = self.lock_host(host_id).await?;
        let mut stale: Vec<(Ulid, BookingStatus)> = guard
            .calendar
            .entries()
            .iter()
            .filter(|e| match e.status {
                BookingStatus::Confirmed => e.stay.check_out <= today,
                BookingStatus::Pending => e.stay.check_in < today,
                _ => false,
            })
            .map(|e| (e.booking_id, e.status))
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }
        stale.sort_by_key(|(id, _)| *id);

        let changes: Vec<StatusChange> = stale
            .into_iter()
            .map(|(booking_id, status)| match status {
                BookingStatus::Confirmed => StatusChange {
                    booking_id,
                    transition: Transition::Complete,
                    status: BookingStatus::Completed,
                    reason: None,
                },
                _ => StatusChange {
                    booking_id,
                    transition: Transition::Reject,
                    status: BookingStatus::Cancelled,
                    reason: Some(EXPIRED_REASON.into()),
                },
            })
            .collect();
        let completed = changes
            .iter()
            .filter(|c| c.transition == Transition::Complete)
            .count();
        let expired = changes.len() - completed;
        let applied = steps(&changes);
        let event = Event::StatusChanged {
            host_id,
            at: self.clock.now(),
            changes,
        };
        let guard = self.persist_and_apply(guard, event).await?;
        let notices = notices_for(&guard, &applied);
        drop(guard);
        drop(gate);

        metrics::counter!(TRANSITIONS_TOTAL, "transition" => Transition::Complete.as_str())
            .increment(completed as u64);
        metrics::counter!(TRANSITIONS_TOTAL, "transition" => Transition::Reject.as_str())
            .increment(expired as u64);
        info!(%host_id, completed, expired, "swept past stays");
        self.dispatch(&notices);
        Ok(completed)
    }
}
