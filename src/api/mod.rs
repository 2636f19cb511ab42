use crate::congestion::forecast::HistorySample;
use crate::polling::PollingOrchestrator;
use crate::upstream::{CafeService, DetectionService};
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

pub mod handlers;
pub mod responses;

pub struct AppContext<S, D> {
    pub orchestrator: Arc<PollingOrchestrator<S, D>>,
    pub history: Arc<Vec<HistorySample>>,
}

impl<S, D> Clone for AppContext<S, D> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            history: Arc::clone(&self.history),
        }
    }
}

pub fn router<S, D>(ctx: AppContext<S, D>) -> Router
where
    S: CafeService,
    D: DetectionService,
{
    Router::new()
        .route("/api/health", get(handlers::get_health::<S, D>))
        .route(
            "/api/cafes/{cafe_id}/view",
            post(handlers::open_view::<S, D>).delete(handlers::close_view::<S, D>),
        )
        .route(
            "/api/cafes/{cafe_id}/congestion",
            get(handlers::get_congestion::<S, D>),
        )
        .route(
            "/api/cafes/{cafe_id}/open-status",
            get(handlers::get_open_status::<S, D>),
        )
        .route(
            "/api/cafes/{cafe_id}/recommendation",
            get(handlers::get_last_recommendation::<S, D>),
        )
        .route(
            "/api/cafes/{cafe_id}/recommendations",
            get(handlers::recommendation_stream::<S, D>),
        )
        .route(
            "/api/cafes/{cafe_id}/forecast",
            get(handlers::get_forecast::<S, D>),
        )
        .with_state(ctx)
}
