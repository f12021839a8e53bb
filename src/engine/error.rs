use ulid::Ulid;

use crate::limits::*;
use crate::model::{BookingStatus, Stay, Transition};
use crate::pricing::PricingError;

/// Input rule a request broke. `code()` is stable for client localization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationRule {
    #[error("check-in date is in the past")]
    PastDate,
    #[error("check-out must be after check-in")]
    InvertedRange,
    #[error("guest count exceeds the host maximum of {max}")]
    CapacityExceeded { max: u32 },
    #[error("at least one guest is required")]
    NoGuests,
    #[error("host is not accepting bookings")]
    InactiveHost,
    #[error("hosts cannot book their own listing")]
    OwnListing,
    #[error("check-in more than {} days ahead", MAX_ADVANCE_DAYS)]
    BeyondHorizon,
    #[error("stay longer than {} nights", MAX_STAY_NIGHTS)]
    StayTooLong,
    #[error("message longer than {} characters", MAX_MESSAGE_LEN)]
    MessageTooLong,
    #[error("reason longer than {} characters", MAX_REASON_LEN)]
    ReasonTooLong,
    #[error("host calendar is full")]
    CalendarFull,
    #[error("total price overflows")]
    PriceOverflow,
    #[error("nightly rate must be positive")]
    InvalidRate,
    #[error("maximum guest count must be at least one")]
    InvalidMaxGuests,
    #[error("too many hosts")]
    TooManyHosts,
}

impl ValidationRule {
    pub const fn code(&self) -> &'static str {
        match self {
            ValidationRule::PastDate => "past_date",
            ValidationRule::InvertedRange => "inverted_range",
            ValidationRule::CapacityExceeded { .. } => "capacity_exceeded",
            ValidationRule::NoGuests => "no_guests",
            ValidationRule::InactiveHost => "inactive_host",
            ValidationRule::OwnListing => "own_listing",
            ValidationRule::BeyondHorizon => "beyond_horizon",
            ValidationRule::StayTooLong => "stay_too_long",
            ValidationRule::MessageTooLong => "message_too_long",
            ValidationRule::ReasonTooLong => "reason_too_long",
            ValidationRule::CalendarFull => "calendar_full",
            ValidationRule::PriceOverflow => "price_overflow",
            ValidationRule::InvalidRate => "invalid_rate",
            ValidationRule::InvalidMaxGuests => "invalid_max_guests",
            ValidationRule::TooManyHosts => "too_many_hosts",
        }
    }
}

impl From<PricingError> for ValidationRule {
    fn from(e: PricingError) -> Self {
        match e {
            PricingError::NoNights => ValidationRule::InvertedRange,
            PricingError::Overflow => ValidationRule::PriceOverflow,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationRule),
    #[error("dates already booked: {blocked}")]
    Conflict { blocked: Stay },
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Ulid },
    #[error("cannot {transition} a {from} booking")]
    InvalidTransition {
        from: BookingStatus,
        transition: Transition,
    },
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("host is busy, retry later")]
    Busy,
    /// Storage failure. The detail is for logs only and never rendered.
    #[error("service temporarily unavailable")]
    Unavailable(String),
}

impl EngineError {
    pub fn host_not_found(id: Ulid) -> Self {
        EngineError::NotFound { entity: "host", id }
    }

    pub fn booking_not_found(id: Ulid) -> Self {
        EngineError::NotFound { entity: "booking", id }
    }

    /// Stable category for the presentation layer.
    pub const fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::Conflict { .. } => "availability_conflict",
            EngineError::NotFound { .. } => "not_found",
            EngineError::InvalidTransition { .. } => "invalid_state_transition",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::Busy => "busy",
            EngineError::Unavailable(_) => "unavailable",
        }
    }

    /// Only lock timeouts are worth retrying; a retry re-runs every check.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Busy)
    }
}
