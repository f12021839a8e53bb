//! Hard caps on engine inputs. Requests beyond these are rejected, not truncated.

pub const MAX_HOSTS: usize = 100_000;
/// Live (pending + confirmed) calendar entries per host.
pub const MAX_CALENDAR_ENTRIES: usize = 10_000;
pub const MAX_STAY_NIGHTS: i64 = 365;
/// Furthest check-in accepted, in days from today.
pub const MAX_ADVANCE_DAYS: i64 = 730;
pub const MAX_MESSAGE_LEN: usize = 2_000;
pub const MAX_REASON_LEN: usize = 500;
