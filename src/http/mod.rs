//! JSON-over-HTTP surface of the engine.
//!
//! Callers are identified by the `x-user-id` and `x-user-role` headers set
//! by an upstream gateway; see [`actor`].

pub mod actor;
mod error;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::Router;

use crate::engine::Engine;
use crate::observability::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/hosts/:id", put(handlers::upsert_host).get(handlers::get_host))
        .route("/hosts/:id/availability", get(handlers::availability))
        .route("/hosts/:id/bookings", get(handlers::host_bookings))
        .route("/hosts/:id/events", get(handlers::host_events))
        .route("/guests/:id/bookings", get(handlers::guest_bookings))
        .route("/bookings", post(handlers::create_booking))
        .route(
            "/bookings/:id",
            get(handlers::get_booking).delete(handlers::delete_booking),
        )
        .route("/bookings/:id/approve", post(handlers::approve))
        .route("/bookings/:id/reject", post(handlers::reject))
        .route("/bookings/:id/cancel", post(handlers::cancel))
        .route("/health", get(handlers::health))
        .route_layer(middleware::from_fn(track_metrics))
        .with_state(AppState { engine })
}

/// Count and time requests per matched route template.
async fn track_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());
    let started = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();
    metrics::counter!(HTTP_REQUESTS_TOTAL, "route" => route.clone(), "status" => status)
        .increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response
}
