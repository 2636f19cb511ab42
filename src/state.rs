use crate::CafeId;
use crate::congestion::{CongestionTier, SeatSnapshot, escalation_condition};
use crate::error::AppError;
use crate::recommend::{CandidateCafe, ScoredCandidate};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};
use tokio::sync::{broadcast, watch};

const RECOMMENDATION_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationEvent {
    pub cafe_id: CafeId,
    /// Viewers of the crowded café when the escalation fired.
    pub viewer_count: u32,
    pub recommendation: Option<ScoredCandidate>,
    pub emitted_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionNotice {
    pub message: String,
    pub raised_at: SystemTime,
}

/// Inputs that made the escalation condition become true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escalation {
    pub tier: CongestionTier,
    pub viewer_count: u32,
}

/// Tracks the escalation condition and reports only its rising edges.
#[derive(Debug, Default)]
pub struct EscalationEdge {
    active: bool,
}

impl EscalationEdge {
    pub fn observe(&mut self, condition: bool) -> bool {
        let fired = condition && !self.active;
        self.active = condition;
        fired
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// Holds an in-flight flag and clears it when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl InFlightGuard {
    pub fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// In-memory state of one active café view.
///
/// Each signal handler publishes only on its own channels: the seat
/// handler owns the snapshot and tier, the viewer handler owns the viewer
/// count, the frame handler owns the detection outputs.
#[derive(Debug)]
pub struct PollCycleState {
    target: CandidateCafe,
    activated_at: Instant,
    seats_tx: watch::Sender<Option<SeatSnapshot>>,
    tier_tx: watch::Sender<CongestionTier>,
    viewer_count_tx: watch::Sender<Option<u32>>,
    detected_seats_tx: watch::Sender<Option<SeatSnapshot>>,
    detection_notice_tx: watch::Sender<Option<DetectionNotice>>,
    last_recommendation_tx: watch::Sender<Option<RecommendationEvent>>,
    recommendations_tx: broadcast::Sender<RecommendationEvent>,
    escalation: Mutex<EscalationEdge>,
    recommendation_in_flight: Arc<AtomicBool>,
    frame_in_flight: Arc<AtomicBool>,
    detection_notice_raised: AtomicBool,
}

impl PollCycleState {
    pub fn new(target: CandidateCafe) -> Self {
        let (seats_tx, _seats_rx) = watch::channel(None);
        let (tier_tx, _tier_rx) = watch::channel(CongestionTier::Unknown);
        let (viewer_count_tx, _viewer_count_rx) = watch::channel(None);
        let (detected_seats_tx, _detected_seats_rx) = watch::channel(None);
        let (detection_notice_tx, _detection_notice_rx) = watch::channel(None);
        let (last_recommendation_tx, _last_recommendation_rx) = watch::channel(None);
        let (recommendations_tx, _recommendations_rx) =
            broadcast::channel(RECOMMENDATION_CHANNEL_CAPACITY);
        Self {
            target,
            activated_at: Instant::now(),
            seats_tx,
            tier_tx,
            viewer_count_tx,
            detected_seats_tx,
            detection_notice_tx,
            last_recommendation_tx,
            recommendations_tx,
            escalation: Mutex::new(EscalationEdge::default()),
            recommendation_in_flight: Arc::new(AtomicBool::new(false)),
            frame_in_flight: Arc::new(AtomicBool::new(false)),
            detection_notice_raised: AtomicBool::new(false),
        }
    }

    pub fn target(&self) -> &CandidateCafe {
        &self.target
    }

    pub fn cafe_id(&self) -> &str {
        &self.target.cafe_id
    }

    pub fn activated_at(&self) -> Instant {
        self.activated_at
    }

    pub fn seats(&self) -> Option<SeatSnapshot> {
        self.seats_tx.borrow().clone()
    }

    pub fn tier(&self) -> CongestionTier {
        *self.tier_tx.borrow()
    }

    pub fn subscribe_tier(&self) -> watch::Receiver<CongestionTier> {
        self.tier_tx.subscribe()
    }

    /// Replaces the seat snapshot and its tier, returning the previous tier.
    pub fn set_seats(&self, snapshot: SeatSnapshot, tier: CongestionTier) -> CongestionTier {
        self.seats_tx.send_replace(Some(snapshot));
        self.tier_tx.send_replace(tier)
    }

    pub fn viewer_count(&self) -> Option<u32> {
        *self.viewer_count_tx.borrow()
    }

    pub fn set_viewer_count(&self, viewer_count: u32) -> Option<u32> {
        self.viewer_count_tx.send_replace(Some(viewer_count))
    }

    pub fn detected_seats(&self) -> Option<SeatSnapshot> {
        self.detected_seats_tx.borrow().clone()
    }

    pub fn set_detected_seats(&self, snapshot: SeatSnapshot) {
        self.detected_seats_tx.send_replace(Some(snapshot));
    }

    pub fn detection_notice(&self) -> Option<DetectionNotice> {
        self.detection_notice_tx.borrow().clone()
    }

    pub fn subscribe_detection_notice(&self) -> watch::Receiver<Option<DetectionNotice>> {
        self.detection_notice_tx.subscribe()
    }

    /// Publishes the notice once per outage. Returns whether it was published.
    pub fn raise_detection_notice(&self, message: String) -> bool {
        if self.detection_notice_raised.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.detection_notice_tx.send_replace(Some(DetectionNotice {
            message,
            raised_at: SystemTime::now(),
        }));
        true
    }

    /// Withdraws the notice after a successful detection and re-arms it.
    /// Returns whether a notice was withdrawn.
    pub fn clear_detection_notice(&self) -> bool {
        if !self.detection_notice_raised.load(Ordering::Acquire) {
            return false;
        }
        self.detection_notice_tx.send_replace(None);
        self.detection_notice_raised.store(false, Ordering::Release);
        true
    }

    pub fn last_recommendation(&self) -> Option<RecommendationEvent> {
        self.last_recommendation_tx.borrow().clone()
    }

    pub fn subscribe_recommendations(&self) -> broadcast::Receiver<RecommendationEvent> {
        self.recommendations_tx.subscribe()
    }

    /// Returns the number of live subscribers that received the event.
    pub fn publish_recommendation(&self, event: RecommendationEvent) -> usize {
        self.last_recommendation_tx.send_replace(Some(event.clone()));
        self.recommendations_tx.send(event).unwrap_or(0)
    }

    /// Re-evaluates the escalation condition from the current tier and
    /// viewer count. Returns its inputs only when it has just become true.
    ///
    /// Both values are read under the edge lock so concurrent callers
    /// observe them in order.
    pub fn observe_escalation(&self) -> Result<Option<Escalation>, AppError> {
        let mut edge = self.escalation.lock().map_err(|_| AppError::StateLock)?;
        let tier = self.tier();
        let viewer_count = self.viewer_count().unwrap_or(0);
        let fired = edge.observe(escalation_condition(tier, viewer_count));
        Ok(fired.then_some(Escalation { tier, viewer_count }))
    }

    pub fn try_begin_recommendation(&self) -> Option<InFlightGuard> {
        InFlightGuard::try_acquire(&self.recommendation_in_flight)
    }

    pub fn recommendation_in_flight(&self) -> bool {
        self.recommendation_in_flight.load(Ordering::Acquire)
    }

    pub fn try_begin_frame(&self) -> Option<InFlightGuard> {
        InFlightGuard::try_acquire(&self.frame_in_flight)
    }

    pub fn frame_in_flight(&self) -> bool {
        self.frame_in_flight.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use crate::upstream::mock::seats;
    use std::time::UNIX_EPOCH;

    fn state() -> PollCycleState {
        PollCycleState::new(CandidateCafe {
            cafe_id: "20".to_string(),
            name: "Target".to_string(),
            address: "somewhere".to_string(),
            location: GeoPoint::new(37.5, 127.0),
            opening_schedule: None,
        })
    }

    #[test]
    fn escalation_edge_fires_on_rising_edge_only() {
        let mut edge = EscalationEdge::default();

        assert!(!edge.observe(false));
        assert!(edge.observe(true));
        assert!(!edge.observe(true));
        assert!(!edge.observe(false));
        assert!(edge.observe(true));
    }

    #[test]
    fn in_flight_guard_is_exclusive_and_released_on_drop() {
        let state = state();

        let guard = state.try_begin_frame();
        assert!(guard.is_some());
        assert!(state.frame_in_flight());
        assert!(state.try_begin_frame().is_none());

        drop(guard);
        assert!(!state.frame_in_flight());
        assert!(state.try_begin_frame().is_some());
    }

    #[test]
    fn set_seats_updates_snapshot_and_tier_watch() {
        let state = state();
        let receiver = state.subscribe_tier();

        let previous = state.set_seats(
            SeatSnapshot::new(seats(8, 10), UNIX_EPOCH),
            CongestionTier::Busy,
        );

        assert_eq!(previous, CongestionTier::Unknown);
        assert_eq!(state.tier(), CongestionTier::Busy);
        assert_eq!(*receiver.borrow(), CongestionTier::Busy);
        assert_eq!(state.seats().map(|s| s.total()), Some(10));
    }

    #[test]
    fn detection_notice_is_one_shot() {
        let state = state();

        assert!(state.raise_detection_notice("down".to_string()));
        assert!(!state.raise_detection_notice("still down".to_string()));
        assert_eq!(
            state.detection_notice().map(|n| n.message),
            Some("down".to_string())
        );
    }

    #[test]
    fn detection_notice_clears_and_rearms_after_recovery() {
        let state = state();
        let receiver = state.subscribe_detection_notice();

        assert!(!state.clear_detection_notice());
        assert!(state.raise_detection_notice("down".to_string()));

        assert!(state.clear_detection_notice());
        assert!(state.detection_notice().is_none());
        assert!(receiver.borrow().is_none());
        assert!(!state.clear_detection_notice());

        assert!(state.raise_detection_notice("down again".to_string()));
        assert_eq!(
            state.detection_notice().map(|n| n.message),
            Some("down again".to_string())
        );
    }

    #[test]
    fn escalation_reads_current_tier_and_viewers() -> Result<(), AppError> {
        let state = state();

        assert_eq!(state.observe_escalation()?, None);

        state.set_seats(
            SeatSnapshot::new(seats(9, 10), UNIX_EPOCH),
            CongestionTier::Busy,
        );
        assert_eq!(state.observe_escalation()?, None);

        state.set_viewer_count(2);
        assert_eq!(
            state.observe_escalation()?,
            Some(Escalation {
                tier: CongestionTier::Busy,
                viewer_count: 2,
            })
        );
        assert_eq!(state.observe_escalation()?, None);

        state.set_viewer_count(0);
        assert_eq!(state.observe_escalation()?, None);
        state.set_viewer_count(1);
        assert!(state.observe_escalation()?.is_some());
        Ok(())
    }

    #[test]
    fn published_recommendation_reaches_subscribers_and_is_kept() {
        let state = state();
        let mut receiver = state.subscribe_recommendations();
        let event = RecommendationEvent {
            cafe_id: "20".to_string(),
            viewer_count: 2,
            recommendation: None,
            emitted_at: UNIX_EPOCH,
        };

        assert_eq!(state.publish_recommendation(event.clone()), 1);

        assert_eq!(receiver.try_recv().ok(), Some(event.clone()));
        assert_eq!(state.last_recommendation(), Some(event));
    }
}
