use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Request, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use futures::Stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::BookingRequest;
use crate::model::*;
use crate::notify::NotifyHub;

use super::{ApiError, AppState};

// ── Extractors with JSON error bodies ────────────────────

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct IdPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct QueryParams<T>(pub T);

/// JSON body that may be left out. Only an empty body reads as `None`;
/// anything else must parse.
pub struct OptionalJson<T>(pub Option<T>);

#[async_trait]
impl<T, S> FromRequest<S> for OptionalJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        if bytes.is_empty() {
            return Ok(Self(None));
        }
        let Json(value) = Json::<T>::from_bytes(&bytes)?;
        Ok(Self(Some(value)))
    }
}

// ── Wire types ───────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct BookingView {
    pub id: Ulid,
    pub host_id: Ulid,
    pub guest_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub nights: i64,
    pub guest_count: u32,
    pub status: BookingStatus,
    pub nightly_rate: Amount,
    pub total_price: Amount,
    pub message: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Booking> for BookingView {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id,
            host_id: b.host_id,
            guest_id: b.guest_id,
            check_in: b.stay.check_in,
            check_out: b.stay.check_out,
            nights: b.stay.nights(),
            guest_count: b.guest_count,
            status: b.status,
            nightly_rate: b.nightly_rate,
            total_price: b.total_price,
            message: b.message,
            cancellation_reason: b.cancellation_reason,
            created_at: b.created_at,
            updated_at: b.updated_at,
        }
    }
}

fn views(bookings: Vec<Booking>) -> Vec<BookingView> {
    bookings.into_iter().map(BookingView::from).collect()
}

#[derive(Debug, Deserialize)]
pub struct HostBody {
    pub owner_id: Ulid,
    pub nightly_rate: Amount,
    pub max_guests: u32,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingBody {
    pub host_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guest_count: u32,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReasonBody {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityView {
    pub host_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub available: bool,
}

#[derive(Debug, Deserialize)]
pub struct StatusParams {
    #[serde(default)]
    pub status: Option<String>,
}

impl StatusParams {
    fn parse(&self) -> Result<Option<BookingStatus>, ApiError> {
        self.status
            .as_deref()
            .map(|s| s.parse().map_err(|_| ApiError::bad_request(format!("unknown status: {s}"))))
            .transpose()
    }
}

// ── Hosts ────────────────────────────────────────────────

pub async fn upsert_host(
    State(state): State<AppState>,
    actor: Actor,
    IdPath(host_id): IdPath<Ulid>,
    JsonBody(body): JsonBody<HostBody>,
) -> Result<Json<HostProfile>, ApiError> {
    let profile = HostProfile {
        id: host_id,
        owner_id: body.owner_id,
        nightly_rate: body.nightly_rate,
        max_guests: body.max_guests,
        active: body.active,
    };
    Ok(Json(state.engine.upsert_host(actor, profile).await?))
}

pub async fn get_host(
    State(state): State<AppState>,
    IdPath(host_id): IdPath<Ulid>,
) -> Result<Json<HostProfile>, ApiError> {
    Ok(Json(state.engine.get_host(host_id).await?))
}

pub async fn availability(
    State(state): State<AppState>,
    IdPath(host_id): IdPath<Ulid>,
    QueryParams(range): QueryParams<RangeParams>,
) -> Result<Json<AvailabilityView>, ApiError> {
    let stay = Stay::new(range.check_in, range.check_out);
    let available = state.engine.is_range_available(host_id, stay).await?;
    Ok(Json(AvailabilityView {
        host_id,
        check_in: range.check_in,
        check_out: range.check_out,
        available,
    }))
}

pub async fn host_bookings(
    State(state): State<AppState>,
    actor: Actor,
    IdPath(host_id): IdPath<Ulid>,
    QueryParams(params): QueryParams<StatusParams>,
) -> Result<Json<Vec<BookingView>>, ApiError> {
    let bookings = state
        .engine
        .list_bookings_for_host(actor, host_id, params.parse()?)
        .await?;
    Ok(Json(views(bookings)))
}

pub async fn guest_bookings(
    State(state): State<AppState>,
    actor: Actor,
    IdPath(guest_id): IdPath<Ulid>,
    QueryParams(params): QueryParams<StatusParams>,
) -> Result<Json<Vec<BookingView>>, ApiError> {
    let bookings = state
        .engine
        .list_bookings_for_guest(actor, guest_id, params.parse()?)
        .await?;
    Ok(Json(views(bookings)))
}

/// Drops the host's notice channel once the last stream using it ends.
struct PruneOnDrop {
    hub: Arc<NotifyHub>,
    host_id: Ulid,
}

impl Drop for PruneOnDrop {
    fn drop(&mut self) {
        self.hub.prune(&self.host_id);
    }
}

/// Server-sent stream of the host's booking notices. One SSE event per
/// notice, named by its kind.
pub async fn host_events(
    State(state): State<AppState>,
    actor: Actor,
    IdPath(host_id): IdPath<Ulid>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let profile = state.engine.get_host(host_id).await?;
    if !actor.is_system() && !actor.owns(&profile) {
        return Err(crate::engine::EngineError::Forbidden("only the host can follow its notices").into());
    }

    let hub = state.engine.notify.clone();
    let rx = hub.subscribe(host_id);
    debug!(%host_id, "notice stream opened");
    // Tuple order matters: the receiver drops before the prune runs.
    let seed = (rx, PruneOnDrop { hub, host_id });
    let stream = futures::stream::unfold(seed, |(mut rx, guard)| async move {
        loop {
            match rx.recv().await {
                Ok(notice) => {
                    let event = SseEvent::default()
                        .event(notice.kind.as_str())
                        .json_data(&notice)
                        .unwrap_or_else(|_| SseEvent::default().comment("unencodable notice"));
                    return Some((Ok(event), (rx, guard)));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(host_id = %guard.host_id, skipped, "notice stream lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ── Bookings ─────────────────────────────────────────────

pub async fn create_booking(
    State(state): State<AppState>,
    actor: Actor,
    JsonBody(body): JsonBody<CreateBookingBody>,
) -> Result<(StatusCode, Json<BookingView>), ApiError> {
    let request = BookingRequest {
        host_id: body.host_id,
        stay: Stay::new(body.check_in, body.check_out),
        guest_count: body.guest_count,
        message: body.message,
    };
    let booking = state.engine.create_booking(actor, request).await?;
    Ok((StatusCode::CREATED, Json(booking.into())))
}

pub async fn get_booking(
    State(state): State<AppState>,
    actor: Actor,
    IdPath(booking_id): IdPath<Ulid>,
) -> Result<Json<BookingView>, ApiError> {
    Ok(Json(state.engine.get_booking(actor, booking_id).await?.into()))
}

pub async fn approve(
    State(state): State<AppState>,
    actor: Actor,
    IdPath(booking_id): IdPath<Ulid>,
) -> Result<Json<BookingView>, ApiError> {
    Ok(Json(state.engine.approve(actor, booking_id).await?.into()))
}

pub async fn reject(
    State(state): State<AppState>,
    actor: Actor,
    IdPath(booking_id): IdPath<Ulid>,
    OptionalJson(body): OptionalJson<ReasonBody>,
) -> Result<Json<BookingView>, ApiError> {
    let reason = body.and_then(|b| b.reason);
    Ok(Json(state.engine.reject(actor, booking_id, reason).await?.into()))
}

pub async fn cancel(
    State(state): State<AppState>,
    actor: Actor,
    IdPath(booking_id): IdPath<Ulid>,
    OptionalJson(body): OptionalJson<ReasonBody>,
) -> Result<Json<BookingView>, ApiError> {
    let reason = body.and_then(|b| b.reason);
    Ok(Json(state.engine.cancel(actor, booking_id, reason).await?.into()))
}

pub async fn delete_booking(
    State(state): State<AppState>,
    actor: Actor,
    IdPath(booking_id): IdPath<Ulid>,
) -> Result<Json<BookingView>, ApiError> {
    Ok(Json(state.engine.cancel(actor, booking_id, None).await?.into()))
}

pub async fn health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
