//! JSON-over-HTTP boundary.
//!
//! | failure kind | status |
//! |--------------|--------|
//! | malformed    | 400    |
//! | validation   | 422    |
//! | domain       | 422    |
//! | infra        | 500    |

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::engine::{BookingStore, Engine, InMemoryStore};
use crate::error::{BookingError, ErrorKind};
use crate::limits::MAX_CLIENT_ID_LEN;
use crate::model::{Booking, BookingDraft, WorkshopId};
use crate::observability::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};
use crate::time;

pub struct AppState<S: BookingStore = InMemoryStore> {
    pub engine: Arc<Engine<S>>,
    pub handler_timeout: Duration,
    /// Cancelled on shutdown; aborts units of work still in flight.
    pub shutdown: CancellationToken,
}

pub fn router<S: BookingStore>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route(
            "/api/v1/bookings/{workshop_id}",
            get(list_bookings::<S>).post(create_booking::<S>),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub client_id: String,
    pub begin_at: String,
    pub end_at: String,
    pub client_timezone: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookingResponse {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    pub workshop_id: WorkshopId,
    pub client_id: String,
    pub begin_at: String,
    pub end_at: String,
    pub client_timezone: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListBookingsResponse {
    pub bookings: Vec<BookingResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl BookingResponse {
    fn from_booking(b: &Booking, with_id: bool) -> Self {
        Self {
            id: with_id.then(|| b.id.to_string()),
            workshop_id: b.workshop_id,
            client_id: b.client_id.clone(),
            begin_at: b.begin.format(time::WALL_CLOCK_FORMAT).to_string(),
            end_at: b.end.format(time::WALL_CLOCK_FORMAT).to_string(),
            client_timezone: b.client_timezone.name().to_string(),
        }
    }
}

/// Error half of every handler.
pub struct ApiError(BookingError);

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Malformed => StatusCode::BAD_REQUEST,
            ErrorKind::Validation | ErrorKind::Domain => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Infra => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Infra details stay in the log.
        let error = match self.0.kind() {
            ErrorKind::Infra => "internal error".to_string(),
            ErrorKind::Validation | ErrorKind::Domain => format!("validation failed: {}", self.0),
            ErrorKind::Malformed => self.0.to_string(),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

fn parse_workshop_id(raw: &str) -> Result<WorkshopId, BookingError> {
    raw.parse()
        .map_err(|_| BookingError::Malformed(format!("failed to parse workshop_id: {raw:?}")))
}

fn parse_request(
    workshop_id: WorkshopId,
    req: CreateBookingRequest,
) -> Result<BookingDraft, BookingError> {
    if req.client_id.len() > MAX_CLIENT_ID_LEN {
        return Err(BookingError::Malformed("client_id too long".into()));
    }
    BookingDraft::parse(
        workshop_id,
        req.client_id,
        &req.begin_at,
        &req.end_at,
        &req.client_timezone,
    )
    .map_err(BookingError::InvalidTime)
}

async fn create_booking<S: BookingStore>(
    State(app): State<Arc<AppState<S>>>,
    Path(raw_id): Path<String>,
    body: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let result = async {
        let workshop_id = parse_workshop_id(&raw_id)?;
        let Json(req) =
            body.map_err(|e| BookingError::Malformed(format!("failed to bind request: {e}")))?;
        let draft = parse_request(workshop_id, req)?;

        // Dropping the unit of work on timeout rolls it back.
        let booking = tokio::time::timeout(app.handler_timeout, app.engine.admit(draft, &app.shutdown))
            .await
            .map_err(|_| timed_out("create_booking", workshop_id, app.handler_timeout))??;
        Ok::<_, BookingError>(Json(BookingResponse::from_booking(&booking, true)))
    }
    .await;
    respond("create_booking", started, result)
}

async fn list_bookings<S: BookingStore>(
    State(app): State<Arc<AppState<S>>>,
    Path(raw_id): Path<String>,
) -> Response {
    let started = Instant::now();
    let result = async {
        let workshop_id = parse_workshop_id(&raw_id)?;
        let bookings = tokio::time::timeout(app.handler_timeout, app.engine.list_bookings(workshop_id))
            .await
            .map_err(|_| timed_out("list_bookings", workshop_id, app.handler_timeout))??;
        Ok::<_, BookingError>(Json(ListBookingsResponse {
            bookings: bookings
                .iter()
                .map(|b| BookingResponse::from_booking(b, false))
                .collect(),
        }))
    }
    .await;
    respond("list_bookings", started, result)
}

fn timed_out(route: &str, workshop_id: WorkshopId, after: Duration) -> BookingError {
    tracing::error!("{route} on workshop {workshop_id} timed out after {after:?}");
    BookingError::Cancelled
}

fn respond<T: IntoResponse>(
    route: &'static str,
    started: Instant,
    result: Result<T, BookingError>,
) -> Response {
    let response = match result {
        Ok(body) => body.into_response(),
        Err(e) => ApiError(e).into_response(),
    };
    let status = response.status().as_u16().to_string();
    metrics::counter!(HTTP_REQUESTS_TOTAL, "route" => route, "status" => status).increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response
}
