//! Signal handlers run by the per-view timers.

use crate::congestion::{SeatSnapshot, classify_snapshot};
use crate::polling::Engine;
use crate::polling::frame::{format_frame_token, playback_position};
use crate::recommend::recommend;
use crate::state::{InFlightGuard, PollCycleState, RecommendationEvent};
use crate::upstream::{CafeService, DetectionService, ServiceSignals};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Seats,
    Viewers,
    Frames,
}

/// Runs `tick` on fixed wall-clock boundaries until `cancel` fires.
///
/// A tick still running when the next boundary passes delays only this
/// signal; missed boundaries are skipped rather than replayed.
pub(crate) async fn run_periodic<F, Fut>(
    kind: SignalKind,
    cafe_id: String,
    start: Instant,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(cafe_id = %cafe_id, ?kind, period_ms = period.as_millis() as u64, "Timer armed");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tick() => {}
        }
    }

    debug!(cafe_id = %cafe_id, ?kind, "Timer cancelled");
}

/// Fetches a fresh seat snapshot. Returns whether state changed.
pub(crate) async fn refresh_seats<S, D>(
    engine: &Engine<S, D>,
    state: &PollCycleState,
    cancel: &CancellationToken,
) -> bool
where
    S: CafeService,
    D: DetectionService,
{
    match engine.service.get_seats(state.cafe_id()).await {
        Ok(seats) => {
            if cancel.is_cancelled() {
                return false;
            }
            let snapshot = SeatSnapshot::new(seats, SystemTime::now());
            let tier = classify_snapshot(&snapshot);
            let (occupied, total) = (snapshot.occupied(), snapshot.total());
            let previous = state.set_seats(snapshot, tier);
            if previous != tier {
                info!(
                    cafe_id = %state.cafe_id(),
                    from = ?previous,
                    to = ?tier,
                    occupied,
                    total,
                    "Congestion tier changed"
                );
            }
            true
        }
        Err(err) => {
            warn!(cafe_id = %state.cafe_id(), error = %err, "Seat refresh failed, keeping previous snapshot");
            false
        }
    }
}

/// Fetches the current viewer count. Returns whether state changed.
pub(crate) async fn refresh_viewers<S, D>(
    engine: &Engine<S, D>,
    state: &PollCycleState,
    cancel: &CancellationToken,
) -> bool
where
    S: CafeService,
    D: DetectionService,
{
    match engine.service.get_viewer_count(state.cafe_id()).await {
        Ok(viewers) => {
            if cancel.is_cancelled() {
                return false;
            }
            let previous = state.set_viewer_count(viewers);
            if previous != Some(viewers) {
                debug!(cafe_id = %state.cafe_id(), viewers, "Viewer count changed");
            }
            true
        }
        Err(err) => {
            warn!(cafe_id = %state.cafe_id(), error = %err, "Viewer refresh failed, keeping previous count");
            false
        }
    }
}

/// Re-evaluates the escalation condition and starts a recommendation pass
/// on its rising edge.
pub(crate) fn check_escalation<S, D>(
    engine: &Arc<Engine<S, D>>,
    state: &Arc<PollCycleState>,
    cancel: &CancellationToken,
) where
    S: CafeService,
    D: DetectionService,
{
    let escalation = match state.observe_escalation() {
        Ok(Some(escalation)) => escalation,
        Ok(None) => return,
        Err(err) => {
            warn!(cafe_id = %state.cafe_id(), error = %err, "Escalation state unavailable");
            return;
        }
    };

    let Some(guard) = state.try_begin_recommendation() else {
        debug!(cafe_id = %state.cafe_id(), "Recommendation already in flight");
        return;
    };

    info!(
        cafe_id = %state.cafe_id(),
        tier = ?escalation.tier,
        viewers = escalation.viewer_count,
        "Congestion escalated, looking for an alternative"
    );
    tokio::spawn(run_recommendation(
        Arc::clone(engine),
        Arc::clone(state),
        cancel.clone(),
        guard,
        escalation.viewer_count,
    ));
}

async fn run_recommendation<S, D>(
    engine: Arc<Engine<S, D>>,
    state: Arc<PollCycleState>,
    cancel: CancellationToken,
    _in_flight: InFlightGuard,
    viewer_count: u32,
) where
    S: CafeService,
    D: DetectionService,
{
    let recommendation = match engine.service.get_all_cafes().await {
        Ok(cafes) => {
            let signals = ServiceSignals::new(engine.service.as_ref());
            recommend(
                state.target(),
                &cafes,
                &signals,
                engine.local_now(),
                engine.settings.viewer_threshold,
            )
            .await
        }
        Err(err) => {
            warn!(cafe_id = %state.cafe_id(), error = %err, "Candidate list unavailable");
            None
        }
    };

    if cancel.is_cancelled() {
        debug!(cafe_id = %state.cafe_id(), "View closed, discarding recommendation");
        return;
    }

    match &recommendation {
        Some(pick) => info!(
            cafe_id = %state.cafe_id(),
            recommended = %pick.candidate.cafe_id,
            score = pick.score,
            distance_km = pick.distance_km,
            "Alternative cafe recommended"
        ),
        None => info!(cafe_id = %state.cafe_id(), "No alternative cafe to recommend"),
    }

    let receivers = state.publish_recommendation(RecommendationEvent {
        cafe_id: state.cafe_id().to_string(),
        viewer_count,
        recommendation,
        emitted_at: SystemTime::now(),
    });
    debug!(cafe_id = %state.cafe_id(), receivers, "Recommendation event published");
}

/// Starts a frame analysis unless the previous one is still running.
pub(crate) fn analyze_frame<S, D>(
    engine: &Arc<Engine<S, D>>,
    state: &Arc<PollCycleState>,
    cancel: &CancellationToken,
) where
    S: CafeService,
    D: DetectionService,
{
    let Some(guard) = state.try_begin_frame() else {
        debug!(cafe_id = %state.cafe_id(), "Frame analysis still running, skipping tick");
        return;
    };

    let position = playback_position(
        state.activated_at().elapsed(),
        engine.settings.video_length,
    );
    let token = format_frame_token(position);

    let engine = Arc::clone(engine);
    let state = Arc::clone(state);
    let cancel = cancel.clone();
    tokio::spawn(async move {
        let _in_flight = guard;
        if cancel.is_cancelled() {
            return;
        }
        let result = engine.detector.detect_frame(state.cafe_id(), &token).await;
        if cancel.is_cancelled() {
            debug!(cafe_id = %state.cafe_id(), token = %token, "View closed, discarding frame analysis");
            return;
        }
        match result {
            Ok(detection) => {
                debug!(cafe_id = %state.cafe_id(), token = %token, "Frame analysed");
                if state.clear_detection_notice() {
                    info!(cafe_id = %state.cafe_id(), "Detection service recovered, notice cleared");
                }
                if let Some(seats) = detection.seats {
                    state.set_detected_seats(SeatSnapshot::new(seats, SystemTime::now()));
                }
            }
            Err(err) => {
                warn!(cafe_id = %state.cafe_id(), token = %token, error = %err, "Frame analysis failed");
                if state.raise_detection_notice(err.to_string()) {
                    info!(cafe_id = %state.cafe_id(), "Detection service unavailable notice raised");
                }
            }
        }
    });
}
