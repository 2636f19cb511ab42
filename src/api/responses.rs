use crate::congestion::CongestionTier;
use crate::congestion::forecast::HourlyCongestion;
use crate::schedule::OpenStatus;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ErrorResponse {
    pub error_code: ErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ViewNotActive,
    CafeNotFound,
    UpstreamUnavailable,
    InternalError,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ViewOpenedResponse {
    pub cafe_id: String,
    pub name: String,
    pub address: String,
    pub live_video: bool,
    pub tier: CongestionTier,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ViewClosedResponse {
    pub cafe_id: String,
    /// False when no view was open.
    pub closed: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CongestionResponse {
    pub cafe_id: String,
    pub tier: CongestionTier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seats: Option<SeatCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_seats: Option<SeatCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_notice: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SeatCounts {
    pub occupied: usize,
    pub total: usize,
    pub captured_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct OpenStatusResponse {
    pub cafe_id: String,
    pub status: OpenStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_label: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct RecommendationEventBody {
    pub cafe_id: String,
    pub viewer_count: u32,
    /// Absent when no alternative qualified.
    pub recommendation: Option<RecommendedCafe>,
    pub emitted_at: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct RecommendedCafe {
    pub cafe_id: String,
    pub name: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_km: f64,
    pub vacant_ratio: f64,
    pub viewer_count: u32,
    pub seat_total: usize,
    pub seat_vacant: usize,
    pub score: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct LastRecommendationResponse {
    pub cafe_id: String,
    pub event: Option<RecommendationEventBody>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ForecastResponse {
    pub cafe_id: String,
    pub day: String,
    pub hours: Vec<HourlyCongestion>,
    pub recommended_hours: Vec<u8>,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthResponseBody {
    pub status: HealthStatus,
    pub active_views: usize,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_response_uses_screaming_snake_case_code() {
        let response = ErrorResponse {
            error_code: ErrorCode::ViewNotActive,
            error_message: "no active view for cafe 20".to_string(),
            timestamp: "2026-10-16T12:32:00Z".to_string(),
        };

        let value = serde_json::to_value(response).expect("serialize error response");
        assert_eq!(
            value,
            json!({
                "error_code": "VIEW_NOT_ACTIVE",
                "error_message": "no active view for cafe 20",
                "timestamp": "2026-10-16T12:32:00Z"
            })
        );
    }

    #[test]
    fn congestion_response_omits_missing_signals() {
        let response = CongestionResponse {
            cafe_id: "20".to_string(),
            tier: CongestionTier::Unknown,
            seats: None,
            viewer_count: None,
            detected_seats: None,
            detection_notice: None,
            timestamp: "2026-10-16T12:30:00Z".to_string(),
        };

        let value = serde_json::to_value(response).expect("serialize congestion response");
        assert_eq!(
            value,
            json!({
                "cafe_id": "20",
                "tier": "UNKNOWN",
                "timestamp": "2026-10-16T12:30:00Z"
            })
        );
    }

    #[test]
    fn empty_recommendation_serializes_as_null() {
        let body = RecommendationEventBody {
            cafe_id: "20".to_string(),
            viewer_count: 3,
            recommendation: None,
            emitted_at: "2026-10-16T12:31:00Z".to_string(),
        };

        let value = serde_json::to_value(body).expect("serialize recommendation event");
        assert_eq!(
            value,
            json!({
                "cafe_id": "20",
                "viewer_count": 3,
                "recommendation": null,
                "emitted_at": "2026-10-16T12:31:00Z"
            })
        );
    }

    #[test]
    fn open_status_serializes_lowercase() {
        let response = OpenStatusResponse {
            cafe_id: "20".to_string(),
            status: OpenStatus::Open,
            window_label: Some("22:00 ~ 06:00".to_string()),
            timestamp: "2026-10-16T23:00:00Z".to_string(),
        };

        let value = serde_json::to_value(response).expect("serialize open status response");
        assert_eq!(value["status"], "open");
        assert_eq!(value["window_label"], "22:00 ~ 06:00");
    }
}
