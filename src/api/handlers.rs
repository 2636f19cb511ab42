use crate::api::AppContext;
use crate::api::responses::{
    CongestionResponse, ErrorCode, ErrorResponse, ForecastResponse, HealthResponseBody,
    HealthStatus, LastRecommendationResponse, OpenStatusResponse, RecommendationEventBody,
    RecommendedCafe, SeatCounts, ViewClosedResponse, ViewOpenedResponse,
};
use crate::congestion::SeatSnapshot;
use crate::congestion::forecast::{HistorySample, hourly_forecast, recommended_visit_hours};
use crate::error::AppError;
use crate::polling::PollingOrchestrator;
use crate::state::RecommendationEvent;
use crate::upstream::{CafeService, DetectionService};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::time::{Duration, SystemTime};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, warn};

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";
const RECOMMENDATION_EVENT_NAME: &str = "recommendation";
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug)]
enum TimestampError {
    Format(time::error::Format),
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampError::Format(err) => write!(f, "timestamp format error: {err}"),
        }
    }
}

pub enum ApiResponse<T> {
    Success {
        status: StatusCode,
        body: T,
    },
    Error {
        status: StatusCode,
        body: ErrorResponse,
    },
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self {
            ApiResponse::Success { status, body } => (status, Json(body)).into_response(),
            ApiResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    pub day: Option<String>,
}

pub async fn open_view<S, D>(
    State(ctx): State<AppContext<S, D>>,
    Path(cafe_id): Path<String>,
) -> ApiResponse<ViewOpenedResponse>
where
    S: CafeService,
    D: DetectionService,
{
    match ctx.orchestrator.activate_by_id(&cafe_id).await {
        Ok(_receiver) => build_view_opened_response(&ctx.orchestrator, &cafe_id, SystemTime::now()),
        Err(err) => error_response(&err),
    }
}

pub async fn close_view<S, D>(
    State(ctx): State<AppContext<S, D>>,
    Path(cafe_id): Path<String>,
) -> ApiResponse<ViewClosedResponse>
where
    S: CafeService,
    D: DetectionService,
{
    match ctx.orchestrator.deactivate(&cafe_id).await {
        Ok(closed) => with_timestamp(SystemTime::now(), |timestamp| ViewClosedResponse {
            cafe_id,
            closed,
            timestamp,
        }),
        Err(err) => error_response(&err),
    }
}

pub async fn get_congestion<S, D>(
    State(ctx): State<AppContext<S, D>>,
    Path(cafe_id): Path<String>,
) -> ApiResponse<CongestionResponse>
where
    S: CafeService,
    D: DetectionService,
{
    build_congestion_response(&ctx.orchestrator, &cafe_id, SystemTime::now())
}

pub async fn get_open_status<S, D>(
    State(ctx): State<AppContext<S, D>>,
    Path(cafe_id): Path<String>,
) -> ApiResponse<OpenStatusResponse>
where
    S: CafeService,
    D: DetectionService,
{
    build_open_status_response(&ctx.orchestrator, &cafe_id, SystemTime::now())
}

pub async fn get_last_recommendation<S, D>(
    State(ctx): State<AppContext<S, D>>,
    Path(cafe_id): Path<String>,
) -> ApiResponse<LastRecommendationResponse>
where
    S: CafeService,
    D: DetectionService,
{
    build_last_recommendation_response(&ctx.orchestrator, &cafe_id, SystemTime::now())
}

/// Streams recommendation events of an active view as Server-Sent Events.
pub async fn recommendation_stream<S, D>(
    State(ctx): State<AppContext<S, D>>,
    Path(cafe_id): Path<String>,
) -> Response
where
    S: CafeService,
    D: DetectionService,
{
    let receiver = match ctx.orchestrator.subscribe_recommendations(&cafe_id) {
        Ok(receiver) => receiver,
        Err(err) => return error_response::<()>(&err).into_response(),
    };
    debug!(cafe_id = %cafe_id, "Recommendation stream opened");

    let stream = BroadcastStream::new(receiver).filter_map(|result| async move {
        let event = match result {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "Recommendation stream lagged");
                return None;
            }
        };
        let body = match event_body(&event) {
            Ok(body) => body,
            Err(err) => {
                warn!(cafe_id = %event.cafe_id, error = %err, "Dropping unformattable event");
                return None;
            }
        };
        match Event::default().event(RECOMMENDATION_EVENT_NAME).json_data(body) {
            Ok(sse_event) => Some(Ok::<Event, Infallible>(sse_event)),
            Err(err) => {
                warn!(cafe_id = %event.cafe_id, error = %err, "Failed to serialize event");
                None
            }
        }
    });

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(KEEP_ALIVE_INTERVAL)
                .text("keep-alive"),
        )
        .into_response()
}

pub async fn get_forecast<S, D>(
    State(ctx): State<AppContext<S, D>>,
    Path(cafe_id): Path<String>,
    Query(query): Query<ForecastQuery>,
) -> ApiResponse<ForecastResponse>
where
    S: CafeService,
    D: DetectionService,
{
    build_forecast_response(
        &ctx.history,
        &cafe_id,
        query.day.as_deref(),
        ctx.orchestrator.local_now(),
        SystemTime::now(),
    )
}

pub async fn get_health<S, D>(State(ctx): State<AppContext<S, D>>) -> ApiResponse<HealthResponseBody>
where
    S: CafeService,
    D: DetectionService,
{
    build_health_response(&ctx.orchestrator, SystemTime::now())
}

fn build_view_opened_response<S, D>(
    orchestrator: &PollingOrchestrator<S, D>,
    cafe_id: &str,
    now: SystemTime,
) -> ApiResponse<ViewOpenedResponse>
where
    S: CafeService,
    D: DetectionService,
{
    let state = match orchestrator.view(cafe_id) {
        Ok(state) => state,
        Err(err) => return error_response(&err),
    };
    let target = state.target();
    with_timestamp(now, |timestamp| ViewOpenedResponse {
        cafe_id: target.cafe_id.clone(),
        name: target.name.clone(),
        address: target.address.clone(),
        live_video: orchestrator
            .settings()
            .live_video_cafe_ids
            .contains(&target.cafe_id),
        tier: state.tier(),
        timestamp,
    })
}

fn build_congestion_response<S, D>(
    orchestrator: &PollingOrchestrator<S, D>,
    cafe_id: &str,
    now: SystemTime,
) -> ApiResponse<CongestionResponse>
where
    S: CafeService,
    D: DetectionService,
{
    let state = match orchestrator.view(cafe_id) {
        Ok(state) => state,
        Err(err) => return error_response(&err),
    };

    let counts = state
        .seats()
        .as_ref()
        .map(seat_counts)
        .transpose()
        .and_then(|seats| {
            let detected = state.detected_seats().as_ref().map(seat_counts).transpose()?;
            Ok((seats, detected))
        });
    let (seats, detected_seats) = match counts {
        Ok(counts) => counts,
        Err(err) => return internal_error(&err.to_string()),
    };

    with_timestamp(now, |timestamp| CongestionResponse {
        cafe_id: cafe_id.to_string(),
        tier: state.tier(),
        seats,
        viewer_count: state.viewer_count(),
        detected_seats,
        detection_notice: state.detection_notice().map(|notice| notice.message),
        timestamp,
    })
}

fn build_open_status_response<S, D>(
    orchestrator: &PollingOrchestrator<S, D>,
    cafe_id: &str,
    now: SystemTime,
) -> ApiResponse<OpenStatusResponse>
where
    S: CafeService,
    D: DetectionService,
{
    match orchestrator.current_open_status(cafe_id) {
        Ok(report) => with_timestamp(now, |timestamp| OpenStatusResponse {
            cafe_id: cafe_id.to_string(),
            status: report.status,
            window_label: report.window_label,
            timestamp,
        }),
        Err(err) => error_response(&err),
    }
}

fn build_last_recommendation_response<S, D>(
    orchestrator: &PollingOrchestrator<S, D>,
    cafe_id: &str,
    now: SystemTime,
) -> ApiResponse<LastRecommendationResponse>
where
    S: CafeService,
    D: DetectionService,
{
    let last = match orchestrator.last_recommendation(cafe_id) {
        Ok(last) => last,
        Err(err) => return error_response(&err),
    };
    let event = match last.as_ref().map(event_body).transpose() {
        Ok(event) => event,
        Err(err) => return internal_error(&err.to_string()),
    };
    with_timestamp(now, |timestamp| LastRecommendationResponse {
        cafe_id: cafe_id.to_string(),
        event,
        timestamp,
    })
}

fn build_forecast_response(
    history: &[HistorySample],
    cafe_id: &str,
    day: Option<&str>,
    local_now: OffsetDateTime,
    now: SystemTime,
) -> ApiResponse<ForecastResponse> {
    let today = local_now.weekday().to_string();
    let day = day
        .map(str::trim)
        .filter(|day| !day.is_empty())
        .unwrap_or(&today)
        .to_string();
    // other days have no past or current hour
    let current_hour = if day.eq_ignore_ascii_case(&today) {
        local_now.hour()
    } else {
        0
    };

    let hours = hourly_forecast(history, cafe_id, &day, current_hour);
    let recommended_hours = recommended_visit_hours(&hours);
    with_timestamp(now, |timestamp| ForecastResponse {
        cafe_id: cafe_id.to_string(),
        day,
        hours,
        recommended_hours,
        timestamp,
    })
}

fn build_health_response<S, D>(
    orchestrator: &PollingOrchestrator<S, D>,
    now: SystemTime,
) -> ApiResponse<HealthResponseBody>
where
    S: CafeService,
    D: DetectionService,
{
    match orchestrator.active_views() {
        Ok(views) => with_timestamp(now, |timestamp| HealthResponseBody {
            status: HealthStatus::Ok,
            active_views: views.len(),
            timestamp,
        }),
        Err(err) => error_response(&err),
    }
}

fn event_body(event: &RecommendationEvent) -> Result<RecommendationEventBody, TimestampError> {
    Ok(RecommendationEventBody {
        cafe_id: event.cafe_id.clone(),
        viewer_count: event.viewer_count,
        recommendation: event.recommendation.as_ref().map(|pick| RecommendedCafe {
            cafe_id: pick.candidate.cafe_id.clone(),
            name: pick.candidate.name.clone(),
            address: pick.candidate.address.clone(),
            latitude: pick.candidate.location.lat,
            longitude: pick.candidate.location.lon,
            distance_km: pick.distance_km,
            vacant_ratio: pick.vacant_ratio,
            viewer_count: pick.viewer_count,
            seat_total: pick.seat_total,
            seat_vacant: pick.seat_vacant,
            score: pick.score,
        }),
        emitted_at: format_timestamp(event.emitted_at)?,
    })
}

fn seat_counts(snapshot: &SeatSnapshot) -> Result<SeatCounts, TimestampError> {
    Ok(SeatCounts {
        occupied: snapshot.occupied(),
        total: snapshot.total(),
        captured_at: format_timestamp(snapshot.captured_at)?,
    })
}

fn with_timestamp<T>(now: SystemTime, body: impl FnOnce(String) -> T) -> ApiResponse<T> {
    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Success {
            status: StatusCode::OK,
            body: body(timestamp),
        },
        Err(_err) => internal_error("timestamp formatting failure"),
    }
}

fn error_response<T>(err: &AppError) -> ApiResponse<T> {
    let (status, error_code) = match err {
        AppError::NotActive(_) => (StatusCode::NOT_FOUND, ErrorCode::ViewNotActive),
        AppError::CafeNotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::CafeNotFound),
        AppError::Directory(_)
        | AppError::Fetch { .. }
        | AppError::CandidateFetch { .. }
        | AppError::DetectionServiceUnavailable(_) => {
            warn!(error = %err, "Upstream failure while handling request");
            (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::UpstreamUnavailable)
        }
        AppError::StateLock | AppError::MalformedSchedule(_) => {
            return internal_error(&err.to_string());
        }
    };
    ApiResponse::Error {
        status,
        body: ErrorResponse {
            error_code,
            error_message: err.to_string(),
            timestamp: current_timestamp(),
        },
    }
}

fn internal_error<T>(message: &str) -> ApiResponse<T> {
    error!(message = message, "Internal error while handling request");
    ApiResponse::Error {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ErrorResponse {
            error_code: ErrorCode::InternalError,
            error_message: INTERNAL_ERROR_MESSAGE.to_string(),
            timestamp: current_timestamp(),
        },
    }
}

fn current_timestamp() -> String {
    format_timestamp(SystemTime::now()).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format error timestamp");
        OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
    })
}

fn format_timestamp(timestamp: SystemTime) -> Result<String, TimestampError> {
    let datetime = OffsetDateTime::from(timestamp);
    datetime.format(&Rfc3339).map_err(TimestampError::Format)
}
