use crate::congestion::Seat;
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::recommend::CandidateCafe;
use crate::schedule::schedule_or_unknown;
use crate::upstream::{CafeService, DetectionResult, DetectionService};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

const SEATS_PATH: &str = "/api/seats/cafe";
const VIEWER_COUNT_PATH: &str = "/api/cafe-view/count";
const ALL_CAFES_PATH: &str = "/api/cafe/all";
const DETECT_STAGE_ONE_PATH: &str = "/detect-frame-run1";
const DETECT_STAGE_TWO_PATH: &str = "/detect-frame-run2";
const STOP_DETECT_PATH: &str = "/stop-detect";

/// Café directory, seat and viewer services behind one API base URL.
#[derive(Debug, Clone)]
pub struct HttpCafeService {
    client: reqwest::Client,
    base_url: String,
    credential: Option<String>,
}

impl HttpCafeService {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        credential: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: trim_base(base_url.into()),
            credential,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, reqwest::Error> {
        let mut request = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(query);
        if let Some(credential) = &self.credential {
            request = request.bearer_auth(credential);
        }
        request.send().await?.error_for_status()?.json::<T>().await
    }
}

impl CafeService for HttpCafeService {
    async fn get_seats(&self, cafe_id: &str) -> Result<Vec<Seat>, AppError> {
        self.get_json(&format!("{SEATS_PATH}/{cafe_id}"), &[])
            .await
            .map_err(|err| fetch_error("seats", cafe_id, &err))
    }

    async fn get_viewer_count(&self, cafe_id: &str) -> Result<u32, AppError> {
        self.get_json(VIEWER_COUNT_PATH, &[("cafe_id", cafe_id)])
            .await
            .map_err(|err| fetch_error("viewer count", cafe_id, &err))
    }

    async fn get_all_cafes(&self) -> Result<Vec<CandidateCafe>, AppError> {
        let records: Vec<CafeRecord> = self
            .get_json(ALL_CAFES_PATH, &[])
            .await
            .map_err(|err| AppError::Directory(err.to_string()))?;
        let total = records.len();
        let cafes: Vec<CandidateCafe> = records
            .into_iter()
            .filter_map(CafeRecord::into_candidate)
            .collect();
        debug!(total, usable = cafes.len(), "Cafe directory fetched");
        Ok(cafes)
    }
}

#[derive(Debug, Clone)]
pub struct HttpDetectionService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDetectionService {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: trim_base(base_url.into()),
        }
    }

    async fn run_stage(
        &self,
        path: &str,
        cafe_id: &str,
        frame_token: &str,
    ) -> Result<DetectionPayload, reqwest::Error> {
        self.client
            .get(format!("{}{path}", self.base_url))
            .query(&[("time", frame_token), ("store_id", cafe_id)])
            .send()
            .await?
            .error_for_status()?
            .json::<DetectionPayload>()
            .await
    }
}

impl DetectionService for HttpDetectionService {
    async fn detect_frame(
        &self,
        cafe_id: &str,
        frame_token: &str,
    ) -> Result<DetectionResult, AppError> {
        let unavailable =
            |err: reqwest::Error| AppError::DetectionServiceUnavailable(err.to_string());
        // table layout first, then people and objects on top of it
        self.run_stage(DETECT_STAGE_ONE_PATH, cafe_id, frame_token)
            .await
            .map_err(unavailable)?;
        let payload = self
            .run_stage(DETECT_STAGE_TWO_PATH, cafe_id, frame_token)
            .await
            .map_err(unavailable)?;
        Ok(DetectionResult {
            seats: payload.seats,
        })
    }

    async fn stop_detection(&self, cafe_id: &str) -> Result<(), AppError> {
        self.client
            .post(format!("{}{STOP_DETECT_PATH}", self.base_url))
            .json(&serde_json::json!({ "cafeId": cafe_id }))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map(|_| ())
            .map_err(|err| AppError::DetectionServiceUnavailable(err.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct DetectionPayload {
    #[serde(default)]
    seats: Option<Vec<Seat>>,
}

/// Café record as served by the directory.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CafeRecord {
    cafe_id: Scalar,
    name: String,
    #[serde(default)]
    address: String,
    latitude: Scalar,
    longitude: Scalar,
    #[serde(default)]
    opening_hours: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl Scalar {
    fn as_text(&self) -> String {
        match self {
            Scalar::Text(text) => text.trim().to_string(),
            Scalar::Integer(value) => value.to_string(),
            Scalar::Float(value) => value.to_string(),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Scalar::Text(text) => text.trim().parse::<f64>().ok()?,
            Scalar::Integer(value) => *value as f64,
            Scalar::Float(value) => *value,
        };
        value.is_finite().then_some(value)
    }
}

impl CafeRecord {
    fn into_candidate(self) -> Option<CandidateCafe> {
        let cafe_id = self.cafe_id.as_text();
        let (Some(lat), Some(lon)) = (self.latitude.as_f64(), self.longitude.as_f64()) else {
            warn!(cafe_id = %cafe_id, "Dropping cafe with unusable coordinates");
            return None;
        };
        Some(CandidateCafe {
            opening_schedule: schedule_or_unknown(self.opening_hours.as_deref()),
            cafe_id,
            name: self.name,
            address: self.address,
            location: GeoPoint::new(lat, lon),
        })
    }
}

fn fetch_error(signal: &'static str, cafe_id: &str, err: &reqwest::Error) -> AppError {
    AppError::Fetch {
        signal,
        cafe_id: cafe_id.to_string(),
        message: err.to_string(),
    }
}

fn trim_base(base_url: String) -> String {
    base_url.trim_end_matches('/').to_string()
}
