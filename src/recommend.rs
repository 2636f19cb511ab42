//! Alternative-café recommendation.
//!
//! Candidates that are open now are scored from distance to the crowded
//! café, their live vacant ratio and their live viewer count; the best
//! scoring candidate nobody is currently looking at is recommended.

use crate::CafeId;
use crate::congestion::SeatSnapshot;
use crate::error::AppError;
use crate::geo::{GeoPoint, haversine_km};
use crate::schedule::{OpeningSchedule, evaluate};
use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use time::OffsetDateTime;
use tracing::{debug, warn};

pub const VIEWER_THRESHOLD: u32 = 1;
pub const VACANT_WEIGHT: f64 = 0.5;
pub const DISTANCE_WEIGHT: f64 = 0.5;
pub const VIEWER_WEIGHT: f64 = 0.2;
/// Keeps the distance score finite for co-located cafés.
pub const DISTANCE_BIAS_KM: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateCafe {
    pub cafe_id: CafeId,
    pub name: String,
    pub address: String,
    pub location: GeoPoint,
    #[serde(skip)]
    pub opening_schedule: Option<OpeningSchedule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSignals {
    pub viewer_count: u32,
    pub seats: SeatSnapshot,
}

/// Source of live signals for a candidate café.
pub trait LiveSignals: Send + Sync {
    fn fetch_signals(
        &self,
        cafe_id: &str,
    ) -> impl Future<Output = Result<CandidateSignals, AppError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub candidate: CandidateCafe,
    pub distance_km: f64,
    pub vacant_ratio: f64,
    pub viewer_count: u32,
    pub seat_total: usize,
    pub seat_vacant: usize,
    pub score: f64,
}

pub fn score(distance_km: f64, vacant_ratio: f64, viewer_count: u32) -> f64 {
    let distance_score = 1.0 / (distance_km + DISTANCE_BIAS_KM);
    VACANT_WEIGHT * vacant_ratio
        + DISTANCE_WEIGHT * distance_score
        + VIEWER_WEIGHT * f64::from(viewer_count)
}

/// Sorts by descending score. Equal scores keep their input order.
pub fn rank(mut scored: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

pub fn select(ranked: &[ScoredCandidate], viewer_threshold: u32) -> Option<&ScoredCandidate> {
    ranked
        .iter()
        .find(|candidate| candidate.viewer_count < viewer_threshold)
}

/// Open candidates other than the target, paired with their distance to it.
pub fn eligible_candidates<'a>(
    target: &CandidateCafe,
    candidates: &'a [CandidateCafe],
    now: OffsetDateTime,
) -> Vec<(&'a CandidateCafe, f64)> {
    candidates
        .iter()
        .filter(|candidate| candidate.cafe_id != target.cafe_id)
        .filter(|candidate| evaluate(candidate.opening_schedule.as_ref(), now).is_open())
        .map(|candidate| (candidate, haversine_km(target.location, candidate.location)))
        .collect()
}

pub async fn recommend<L>(
    target: &CandidateCafe,
    candidates: &[CandidateCafe],
    signals: &L,
    now: OffsetDateTime,
    viewer_threshold: u32,
) -> Option<ScoredCandidate>
where
    L: LiveSignals,
{
    let eligible = eligible_candidates(target, candidates, now);
    debug!(
        target = %target.cafe_id,
        eligible = eligible.len(),
        total = candidates.len(),
        "Scoring recommendation candidates"
    );

    let fetched = join_all(
        eligible
            .iter()
            .map(|(candidate, _)| signals.fetch_signals(&candidate.cafe_id)),
    )
    .await;

    let mut scored = Vec::with_capacity(eligible.len());
    for ((candidate, distance_km), result) in eligible.into_iter().zip(fetched) {
        let live = match result {
            Ok(live) => live,
            Err(err) => {
                warn!(candidate = %candidate.cafe_id, error = %err, "Excluding candidate");
                continue;
            }
        };
        let vacant_ratio = live.seats.vacant_ratio();
        let candidate_score = score(distance_km, vacant_ratio, live.viewer_count);
        debug!(
            candidate = %candidate.cafe_id,
            distance_km,
            vacant_ratio,
            viewers = live.viewer_count,
            score = candidate_score,
            "Candidate scored"
        );
        scored.push(ScoredCandidate {
            candidate: candidate.clone(),
            distance_km,
            vacant_ratio,
            viewer_count: live.viewer_count,
            seat_total: live.seats.total(),
            seat_vacant: live.seats.vacant(),
            score: candidate_score,
        });
    }

    let ranked = rank(scored);
    select(&ranked, viewer_threshold).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::Seat;
    use crate::schedule::ScheduleWindow;
    use std::collections::HashMap;
    use std::time::UNIX_EPOCH;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-10-16 12:00 UTC);

    struct FixedSignals {
        signals: HashMap<String, CandidateSignals>,
    }

    impl FixedSignals {
        fn new(entries: &[(&str, u32, usize, usize)]) -> Self {
            let signals = entries
                .iter()
                .map(|(id, viewers, occupied, total)| {
                    let seats = (0..*total)
                        .map(|i| Seat {
                            seat_id: i as i64,
                            occupied: i < *occupied,
                        })
                        .collect();
                    (
                        id.to_string(),
                        CandidateSignals {
                            viewer_count: *viewers,
                            seats: SeatSnapshot::new(seats, UNIX_EPOCH),
                        },
                    )
                })
                .collect();
            Self { signals }
        }
    }

    impl LiveSignals for FixedSignals {
        async fn fetch_signals(&self, cafe_id: &str) -> Result<CandidateSignals, AppError> {
            self.signals
                .get(cafe_id)
                .cloned()
                .ok_or_else(|| AppError::CandidateFetch {
                    cafe_id: cafe_id.to_string(),
                    message: "no signals".to_string(),
                })
        }
    }

    fn all_day() -> Option<OpeningSchedule> {
        Some(OpeningSchedule::new([ScheduleWindow {
            weekday: 0,
            open_minute: 0,
            close_minute: None,
        }]))
    }

    fn closed_now() -> Option<OpeningSchedule> {
        Some(OpeningSchedule::new([ScheduleWindow {
            weekday: 0,
            open_minute: 20 * 60,
            close_minute: Some(22 * 60),
        }]))
    }

    fn cafe(id: &str, lat: f64, lon: f64, schedule: Option<OpeningSchedule>) -> CandidateCafe {
        CandidateCafe {
            cafe_id: id.to_string(),
            name: format!("cafe {id}"),
            address: format!("{id} street"),
            location: GeoPoint::new(lat, lon),
            opening_schedule: schedule,
        }
    }

    const KM_PER_DEGREE_LAT: f64 = 6371.0 * std::f64::consts::PI / 180.0;

    fn km_north(km: f64) -> f64 {
        km / KM_PER_DEGREE_LAT
    }

    #[test]
    fn score_matches_reference_weights() {
        let a = score(0.5, 0.9, 0);
        let b = score(2.0, 0.2, 0);

        assert!((a - (0.45 + 0.5 / 0.51)).abs() < 1e-9);
        assert!((a - 1.43).abs() < 0.01);
        assert!((b - 0.35).abs() < 0.01);
    }

    #[tokio::test]
    async fn closer_emptier_candidate_wins() {
        let target = cafe("20", 37.5, 127.0, all_day());
        let candidates = vec![
            cafe("b", 37.5 + km_north(2.0), 127.0, all_day()),
            cafe("a", 37.5 + km_north(0.5), 127.0, all_day()),
        ];
        let signals = FixedSignals::new(&[("a", 0, 1, 10), ("b", 0, 8, 10)]);

        let picked = recommend(&target, &candidates, &signals, NOW, VIEWER_THRESHOLD).await;

        let picked = picked.expect("recommendation");
        assert_eq!(picked.candidate.cafe_id, "a");
        assert!((picked.distance_km - 0.5).abs() < 1e-6);
        assert!((picked.score - 1.43).abs() < 0.01);
        assert_eq!(picked.seat_vacant, 9);
    }

    #[tokio::test]
    async fn never_recommends_target_or_closed_cafes() {
        let target = cafe("20", 37.5, 127.0, all_day());
        let candidates = vec![
            cafe("20", 37.5, 127.0, all_day()),
            cafe("closed", 37.5, 127.0, closed_now()),
            cafe("unknown", 37.5, 127.0, None),
            cafe("far", 38.5, 127.0, all_day()),
        ];
        let signals = FixedSignals::new(&[
            ("20", 0, 0, 10),
            ("closed", 0, 0, 10),
            ("unknown", 0, 0, 10),
            ("far", 0, 9, 10),
        ]);

        let picked = recommend(&target, &candidates, &signals, NOW, VIEWER_THRESHOLD).await;

        assert_eq!(picked.map(|p| p.candidate.cafe_id), Some("far".to_string()));
    }

    #[tokio::test]
    async fn watched_candidates_yield_no_recommendation() {
        let target = cafe("20", 37.5, 127.0, all_day());
        let candidates = vec![
            cafe("a", 37.501, 127.0, all_day()),
            cafe("b", 37.502, 127.0, all_day()),
        ];
        let signals = FixedSignals::new(&[("a", 1, 0, 10), ("b", 3, 0, 10)]);

        let picked = recommend(&target, &candidates, &signals, NOW, VIEWER_THRESHOLD).await;

        assert!(picked.is_none());
    }

    #[tokio::test]
    async fn failed_candidate_is_excluded_not_fatal() {
        let target = cafe("20", 37.5, 127.0, all_day());
        let candidates = vec![
            cafe("missing", 37.5001, 127.0, all_day()),
            cafe("ok", 37.6, 127.0, all_day()),
        ];
        let signals = FixedSignals::new(&[("ok", 0, 5, 10)]);

        let picked = recommend(&target, &candidates, &signals, NOW, VIEWER_THRESHOLD).await;

        assert_eq!(picked.map(|p| p.candidate.cafe_id), Some("ok".to_string()));
    }

    #[test]
    fn select_walks_ranking_past_watched_cafes() {
        let scored = |id: &str, viewers: u32, value: f64| ScoredCandidate {
            candidate: cafe(id, 0.0, 0.0, None),
            distance_km: 1.0,
            vacant_ratio: 0.5,
            viewer_count: viewers,
            seat_total: 10,
            seat_vacant: 5,
            score: value,
        };
        let ranked = rank(vec![
            scored("low", 0, 0.4),
            scored("top", 2, 3.0),
            scored("mid", 0, 1.2),
        ]);

        assert_eq!(ranked[0].candidate.cafe_id, "top");
        let picked = select(&ranked, VIEWER_THRESHOLD).map(|p| p.candidate.cafe_id.as_str());
        assert_eq!(picked, Some("mid"));
    }

    #[test]
    fn equal_scores_keep_candidate_order() {
        let scored = |id: &str| ScoredCandidate {
            candidate: cafe(id, 0.0, 0.0, None),
            distance_km: 1.0,
            vacant_ratio: 0.5,
            viewer_count: 0,
            seat_total: 10,
            seat_vacant: 5,
            score: 1.0,
        };

        let ranked = rank(vec![scored("first"), scored("second"), scored("third")]);

        let order: Vec<&str> = ranked.iter().map(|s| s.candidate.cafe_id.as_str()).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }
}
