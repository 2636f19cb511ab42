//! Per-café polling of seats, viewers and video frames.
//!
//! Each active café view owns its own [`PollCycleState`], a cancellation
//! token and one periodic task per signal. Views are fully independent;
//! closing one never touches another.

use crate::CafeId;
use crate::congestion::{CongestionTier, SeatSnapshot};
use crate::error::AppError;
use crate::recommend::{CandidateCafe, VIEWER_THRESHOLD};
use crate::schedule::{OpenStatusReport, evaluate};
use crate::state::{PollCycleState, RecommendationEvent};
use crate::upstream::{CafeService, DetectionService};
use std::collections::{HashMap, HashSet};
use std::future::ready;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod frame;
mod tasks;

pub use tasks::SignalKind;

use tasks::{analyze_frame, check_escalation, refresh_seats, refresh_viewers, run_periodic};

pub const DEFAULT_SEAT_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_VIEWER_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct PollingSettings {
    pub seat_interval: Duration,
    pub viewer_interval: Duration,
    pub frame_interval: Duration,
    /// Cafés with a live video feed; only these get a frame timer.
    pub live_video_cafe_ids: HashSet<CafeId>,
    /// Length of the looping video feed, if known.
    pub video_length: Option<Duration>,
    pub viewer_threshold: u32,
    /// Offset opening hours are expressed in.
    pub utc_offset: UtcOffset,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            seat_interval: DEFAULT_SEAT_INTERVAL,
            viewer_interval: DEFAULT_VIEWER_INTERVAL,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            live_video_cafe_ids: HashSet::new(),
            video_length: None,
            viewer_threshold: VIEWER_THRESHOLD,
            utc_offset: UtcOffset::UTC,
        }
    }
}

/// Collaborators and settings shared by every view's tasks.
pub(crate) struct Engine<S, D> {
    pub(crate) service: Arc<S>,
    pub(crate) detector: Arc<D>,
    pub(crate) settings: PollingSettings,
}

impl<S, D> Engine<S, D> {
    pub(crate) fn local_now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.settings.utc_offset)
    }
}

struct ActiveView {
    state: Arc<PollCycleState>,
    cancel: CancellationToken,
    tasks: HashMap<SignalKind, JoinHandle<()>>,
    /// Set while the view is being torn down; cancelled once its entry is gone.
    closing: Option<CancellationToken>,
}

impl ActiveView {
    fn is_open(&self) -> bool {
        self.closing.is_none()
    }
}

pub struct PollingOrchestrator<S, D> {
    engine: Arc<Engine<S, D>>,
    views: Mutex<HashMap<CafeId, ActiveView>>,
}

impl<S, D> PollingOrchestrator<S, D>
where
    S: CafeService,
    D: DetectionService,
{
    pub fn new(service: Arc<S>, detector: Arc<D>, settings: PollingSettings) -> Self {
        Self {
            engine: Arc::new(Engine {
                service,
                detector,
                settings,
            }),
            views: Mutex::new(HashMap::new()),
        }
    }

    pub fn service(&self) -> &Arc<S> {
        &self.engine.service
    }

    pub fn settings(&self) -> &PollingSettings {
        &self.engine.settings
    }

    /// Current wall-clock time in the configured local offset.
    pub fn local_now(&self) -> OffsetDateTime {
        self.engine.local_now()
    }

    /// Opens a view on `target` and starts polling it.
    ///
    /// The first seat and viewer fetch happen before this returns, so the
    /// returned subscription also sees an escalation raised by them. An
    /// already active view is left running and only gets a new subscriber.
    /// A view still closing is waited for, then opened afresh.
    pub async fn activate(
        &self,
        target: CandidateCafe,
    ) -> Result<broadcast::Receiver<RecommendationEvent>, AppError> {
        let cafe_id = target.cafe_id.clone();
        let (state, cancel) = loop {
            let released = {
                let mut views = self.lock_views()?;
                match views.get(&cafe_id) {
                    Some(view) => match &view.closing {
                        Some(released) => released.clone(),
                        None => {
                            debug!(cafe_id = %cafe_id, "View already active, adding subscriber");
                            return Ok(view.state.subscribe_recommendations());
                        }
                    },
                    None => {
                        let state = Arc::new(PollCycleState::new(target.clone()));
                        let cancel = CancellationToken::new();
                        views.insert(
                            cafe_id.clone(),
                            ActiveView {
                                state: Arc::clone(&state),
                                cancel: cancel.clone(),
                                tasks: HashMap::new(),
                                closing: None,
                            },
                        );
                        break (state, cancel);
                    }
                }
            };
            debug!(cafe_id = %cafe_id, "View still closing, waiting to reopen");
            released.cancelled().await;
        };
        let receiver = state.subscribe_recommendations();
        info!(cafe_id = %cafe_id, "View activated");

        let (seats_changed, viewers_changed) = tokio::join!(
            refresh_seats(&self.engine, &state, &cancel),
            refresh_viewers(&self.engine, &state, &cancel)
        );
        if seats_changed || viewers_changed {
            check_escalation(&self.engine, &state, &cancel);
        }

        if cancel.is_cancelled() {
            debug!(cafe_id = %cafe_id, "View closed during initial fetch");
            return Ok(receiver);
        }

        // Timers are armed under the lock so a concurrent close either sees
        // them or prevents them.
        let mut views = match self.lock_views() {
            Ok(views) => views,
            Err(err) => {
                cancel.cancel();
                return Err(err);
            }
        };
        match views.get_mut(&cafe_id) {
            Some(view) if Arc::ptr_eq(&view.state, &state) && view.is_open() => {
                view.tasks = self.spawn_timers(&state, &cancel);
                debug!(cafe_id = %cafe_id, timers = view.tasks.len(), "Timers armed");
            }
            _ => {
                debug!(cafe_id = %cafe_id, "View closed during activation, timers not armed");
                cancel.cancel();
            }
        }
        Ok(receiver)
    }

    /// Looks `cafe_id` up in the directory and activates it.
    pub async fn activate_by_id(
        &self,
        cafe_id: &str,
    ) -> Result<broadcast::Receiver<RecommendationEvent>, AppError> {
        if let Ok(receiver) = self.subscribe_recommendations(cafe_id) {
            return Ok(receiver);
        }
        let target = self
            .engine
            .service
            .get_all_cafes()
            .await?
            .into_iter()
            .find(|cafe| cafe.cafe_id == cafe_id)
            .ok_or_else(|| AppError::CafeNotFound(cafe_id.to_string()))?;
        self.activate(target).await
    }

    /// Closes the view on `cafe_id`. Returns whether a view was open.
    ///
    /// Timer loops are awaited so no fetch is issued afterwards. A
    /// recommendation or frame analysis still in flight completes on its own
    /// but its result is discarded.
    ///
    /// The café id stays reserved until the stop request has been sent, so
    /// a re-activation never races the old view's stop.
    pub async fn deactivate(&self, cafe_id: &str) -> Result<bool, AppError> {
        let (state, cancel, tasks, released) = {
            let mut views = self.lock_views()?;
            let Some(view) = views.get_mut(cafe_id).filter(|view| view.is_open()) else {
                debug!(cafe_id = %cafe_id, "No active view to close");
                return Ok(false);
            };
            let released = CancellationToken::new();
            view.closing = Some(released.clone());
            (
                Arc::clone(&view.state),
                view.cancel.clone(),
                mem::take(&mut view.tasks),
                released,
            )
        };
        let _release = released.drop_guard();

        cancel.cancel();
        for (kind, handle) in tasks {
            if let Err(err) = handle.await {
                warn!(cafe_id = %cafe_id, ?kind, error = %err, "Timer task ended abnormally");
            }
        }

        if let Err(err) = self.engine.detector.stop_detection(cafe_id).await {
            warn!(cafe_id = %cafe_id, error = %err, "Stop detection request failed");
        }

        {
            let mut views = self.lock_views()?;
            if views
                .get(cafe_id)
                .is_some_and(|view| Arc::ptr_eq(&view.state, &state))
            {
                views.remove(cafe_id);
            }
        }
        info!(cafe_id = %cafe_id, "View deactivated");
        Ok(true)
    }

    /// Closes every active view.
    pub async fn shutdown(&self) -> Result<(), AppError> {
        for cafe_id in self.active_views()? {
            self.deactivate(&cafe_id).await?;
        }
        Ok(())
    }

    pub fn active_views(&self) -> Result<Vec<CafeId>, AppError> {
        let mut ids: Vec<CafeId> = self
            .lock_views()?
            .iter()
            .filter(|(_, view)| view.is_open())
            .map(|(cafe_id, _)| cafe_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    pub fn view(&self, cafe_id: &str) -> Result<Arc<PollCycleState>, AppError> {
        self.lock_views()?
            .get(cafe_id)
            .filter(|view| view.is_open())
            .map(|view| Arc::clone(&view.state))
            .ok_or_else(|| AppError::NotActive(cafe_id.to_string()))
    }

    pub fn current_congestion(&self, cafe_id: &str) -> Result<CongestionTier, AppError> {
        Ok(self.view(cafe_id)?.tier())
    }

    pub fn current_open_status(&self, cafe_id: &str) -> Result<OpenStatusReport, AppError> {
        let state = self.view(cafe_id)?;
        Ok(evaluate(
            state.target().opening_schedule.as_ref(),
            self.local_now(),
        ))
    }

    pub fn current_viewer_count(&self, cafe_id: &str) -> Result<Option<u32>, AppError> {
        Ok(self.view(cafe_id)?.viewer_count())
    }

    pub fn current_seats(&self, cafe_id: &str) -> Result<Option<SeatSnapshot>, AppError> {
        Ok(self.view(cafe_id)?.seats())
    }

    pub fn subscribe_recommendations(
        &self,
        cafe_id: &str,
    ) -> Result<broadcast::Receiver<RecommendationEvent>, AppError> {
        Ok(self.view(cafe_id)?.subscribe_recommendations())
    }

    pub fn last_recommendation(
        &self,
        cafe_id: &str,
    ) -> Result<Option<RecommendationEvent>, AppError> {
        Ok(self.view(cafe_id)?.last_recommendation())
    }

    fn lock_views(&self) -> Result<MutexGuard<'_, HashMap<CafeId, ActiveView>>, AppError> {
        self.views.lock().map_err(|_| AppError::StateLock)
    }

    fn spawn_timers(
        &self,
        state: &Arc<PollCycleState>,
        cancel: &CancellationToken,
    ) -> HashMap<SignalKind, JoinHandle<()>> {
        let settings = &self.engine.settings;
        let now = Instant::now();
        let mut tasks = HashMap::new();

        let period = settings.seat_interval;
        let (engine, tick_state, tick_cancel) = self.tick_context(state, cancel);
        tasks.insert(
            SignalKind::Seats,
            tokio::spawn(run_periodic(
                SignalKind::Seats,
                state.cafe_id().to_string(),
                now + period,
                period,
                cancel.clone(),
                move || {
                    let engine = Arc::clone(&engine);
                    let state = Arc::clone(&tick_state);
                    let cancel = tick_cancel.clone();
                    async move {
                        if refresh_seats(&engine, &state, &cancel).await {
                            check_escalation(&engine, &state, &cancel);
                        }
                    }
                },
            )),
        );

        let period = settings.viewer_interval;
        let (engine, tick_state, tick_cancel) = self.tick_context(state, cancel);
        tasks.insert(
            SignalKind::Viewers,
            tokio::spawn(run_periodic(
                SignalKind::Viewers,
                state.cafe_id().to_string(),
                now + period,
                period,
                cancel.clone(),
                move || {
                    let engine = Arc::clone(&engine);
                    let state = Arc::clone(&tick_state);
                    let cancel = tick_cancel.clone();
                    async move {
                        if refresh_viewers(&engine, &state, &cancel).await {
                            check_escalation(&engine, &state, &cancel);
                        }
                    }
                },
            )),
        );

        // Frame analysis starts immediately; seats and viewers were just
        // fetched by activation.
        if settings.live_video_cafe_ids.contains(state.cafe_id()) {
            let period = settings.frame_interval;
            let (engine, tick_state, tick_cancel) = self.tick_context(state, cancel);
            tasks.insert(
                SignalKind::Frames,
                tokio::spawn(run_periodic(
                    SignalKind::Frames,
                    state.cafe_id().to_string(),
                    now,
                    period,
                    cancel.clone(),
                    move || {
                        analyze_frame(&engine, &tick_state, &tick_cancel);
                        ready(())
                    },
                )),
            );
        }

        tasks
    }

    fn tick_context(
        &self,
        state: &Arc<PollCycleState>,
        cancel: &CancellationToken,
    ) -> (Arc<Engine<S, D>>, Arc<PollCycleState>, CancellationToken) {
        (Arc::clone(&self.engine), Arc::clone(state), cancel.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_documented_periods() {
        let settings = PollingSettings::default();

        assert_eq!(settings.seat_interval, Duration::from_secs(3));
        assert_eq!(settings.viewer_interval, Duration::from_secs(3));
        assert_eq!(settings.frame_interval, Duration::from_secs(1));
        assert_eq!(settings.viewer_threshold, 1);
        assert!(settings.live_video_cafe_ids.is_empty());
    }
}
