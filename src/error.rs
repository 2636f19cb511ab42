use crate::CafeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("malformed opening schedule: {0}")]
    MalformedSchedule(String),
    #[error("{signal} fetch failed for cafe {cafe_id}: {message}")]
    Fetch {
        signal: &'static str,
        cafe_id: CafeId,
        message: String,
    },
    #[error("candidate {cafe_id} signals unavailable: {message}")]
    CandidateFetch { cafe_id: CafeId, message: String },
    #[error("cafe directory unavailable: {0}")]
    Directory(String),
    #[error("detection service unavailable: {0}")]
    DetectionServiceUnavailable(String),
    #[error("no active view for cafe {0}")]
    NotActive(CafeId),
    #[error("cafe {0} not found")]
    CafeNotFound(CafeId),
    #[error("state lock poisoned")]
    StateLock,
}
