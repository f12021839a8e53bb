use crate::model::{Amount, Stay};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub nights: u32,
    pub total: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PricingError {
    /// Check-out is not after check-in.
    NoNights,
    Overflow,
}

/// Price a stay at a fixed nightly rate: `total = nights × rate`.
pub fn quote(stay: &Stay, nightly_rate: Amount) -> Result<Quote, PricingError> {
    let nights = stay.nights();
    if nights < 1 {
        return Err(PricingError::NoNights);
    }
    let nights = u32::try_from(nights).map_err(|_| PricingError::Overflow)?;
    let total = nightly_rate
        .checked_mul(u64::from(nights))
        .ok_or(PricingError::Overflow)?;
    Ok(Quote { nights, total })
}
