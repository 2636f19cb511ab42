//! External collaborators: the café directory and live-signal services,
//! and the frame-detection (inference) service.

use crate::congestion::{Seat, SeatSnapshot};
use crate::error::AppError;
use crate::recommend::{CandidateCafe, CandidateSignals, LiveSignals};
use std::future::Future;
use std::time::SystemTime;

pub mod http;
pub mod mock;

pub trait CafeService: Send + Sync + 'static {
    fn get_seats(&self, cafe_id: &str)
        -> impl Future<Output = Result<Vec<Seat>, AppError>> + Send;

    fn get_viewer_count(&self, cafe_id: &str)
        -> impl Future<Output = Result<u32, AppError>> + Send;

    /// Every known café; opening status is decided locally.
    fn get_all_cafes(&self) -> impl Future<Output = Result<Vec<CandidateCafe>, AppError>> + Send;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    /// Seat states re-estimated from the analysed frame, when the service reports them.
    pub seats: Option<Vec<Seat>>,
}

pub trait DetectionService: Send + Sync + 'static {
    /// Analyses the frame identified by `frame_token` (`MM-SS`).
    fn detect_frame(
        &self,
        cafe_id: &str,
        frame_token: &str,
    ) -> impl Future<Output = Result<DetectionResult, AppError>> + Send;

    fn stop_detection(&self, cafe_id: &str) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Adapts a [`CafeService`] into the live signals the scorer needs.
pub struct ServiceSignals<'a, S> {
    service: &'a S,
}

impl<'a, S: CafeService> ServiceSignals<'a, S> {
    pub fn new(service: &'a S) -> Self {
        Self { service }
    }
}

impl<S: CafeService> LiveSignals for ServiceSignals<'_, S> {
    async fn fetch_signals(&self, cafe_id: &str) -> Result<CandidateSignals, AppError> {
        let (viewers, seats) = futures::join!(
            self.service.get_viewer_count(cafe_id),
            self.service.get_seats(cafe_id)
        );
        let to_candidate_error = |err: AppError| AppError::CandidateFetch {
            cafe_id: cafe_id.to_string(),
            message: err.to_string(),
        };
        Ok(CandidateSignals {
            viewer_count: viewers.map_err(to_candidate_error)?,
            seats: SeatSnapshot::new(seats.map_err(to_candidate_error)?, SystemTime::now()),
        })
    }
}
