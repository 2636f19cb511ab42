use crate::CafeId;
use crate::congestion::{Seat, SeatId};
use crate::error::AppError;
use crate::recommend::CandidateCafe;
use crate::upstream::{CafeService, DetectionResult, DetectionService};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// `occupied` of `total` seats, occupied ones first.
pub fn seats(occupied: usize, total: usize) -> Vec<Seat> {
    (0..total)
        .map(|index| Seat {
            seat_id: index as SeatId + 1,
            occupied: index < occupied,
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct MockCafeService {
    cafes: Mutex<Vec<CandidateCafe>>,
    seats: Mutex<HashMap<CafeId, Vec<Seat>>>,
    viewers: Mutex<HashMap<CafeId, u32>>,
    failing: Mutex<HashSet<CafeId>>,
    directory_down: AtomicBool,
    directory_latency: Mutex<Duration>,
    seat_calls: Mutex<HashMap<CafeId, usize>>,
    viewer_calls: Mutex<HashMap<CafeId, usize>>,
    directory_calls: AtomicUsize,
}

impl MockCafeService {
    pub fn new(cafes: Vec<CandidateCafe>) -> Self {
        Self {
            cafes: Mutex::new(cafes),
            ..Self::default()
        }
    }

    pub fn set_occupancy(&self, cafe_id: &str, occupied: usize, total: usize) {
        if let Ok(mut guard) = self.seats.lock() {
            guard.insert(cafe_id.to_string(), seats(occupied, total));
        }
    }

    pub fn set_viewers(&self, cafe_id: &str, viewers: u32) {
        if let Ok(mut guard) = self.viewers.lock() {
            guard.insert(cafe_id.to_string(), viewers);
        }
    }

    /// Makes seat and viewer fetches for `cafe_id` fail until cleared.
    pub fn set_failing(&self, cafe_id: &str, failing: bool) {
        if let Ok(mut guard) = self.failing.lock() {
            if failing {
                guard.insert(cafe_id.to_string());
            } else {
                guard.remove(cafe_id);
            }
        }
    }

    pub fn set_directory_down(&self, down: bool) {
        self.directory_down.store(down, Ordering::SeqCst);
    }

    /// Delays every directory fetch, leaving recommendation passes pending.
    pub fn set_directory_latency(&self, latency: Duration) {
        if let Ok(mut guard) = self.directory_latency.lock() {
            *guard = latency;
        }
    }

    pub fn seat_calls(&self, cafe_id: &str) -> usize {
        count_for(&self.seat_calls, cafe_id)
    }

    pub fn viewer_calls(&self, cafe_id: &str) -> usize {
        count_for(&self.viewer_calls, cafe_id)
    }

    pub fn directory_calls(&self) -> usize {
        self.directory_calls.load(Ordering::SeqCst)
    }

    fn check_failing(&self, signal: &'static str, cafe_id: &str) -> Result<(), AppError> {
        let failing = self
            .failing
            .lock()
            .map_err(|_| AppError::StateLock)?
            .contains(cafe_id);
        if failing {
            return Err(AppError::Fetch {
                signal,
                cafe_id: cafe_id.to_string(),
                message: "mock fetch failed".to_string(),
            });
        }
        Ok(())
    }
}

fn count_for(counter: &Mutex<HashMap<CafeId, usize>>, cafe_id: &str) -> usize {
    counter
        .lock()
        .map(|guard| guard.get(cafe_id).copied().unwrap_or(0))
        .unwrap_or(0)
}

fn bump(counter: &Mutex<HashMap<CafeId, usize>>, cafe_id: &str) {
    if let Ok(mut guard) = counter.lock() {
        *guard.entry(cafe_id.to_string()).or_insert(0) += 1;
    }
}

impl CafeService for MockCafeService {
    async fn get_seats(&self, cafe_id: &str) -> Result<Vec<Seat>, AppError> {
        bump(&self.seat_calls, cafe_id);
        self.check_failing("seats", cafe_id)?;
        let guard = self.seats.lock().map_err(|_| AppError::StateLock)?;
        Ok(guard.get(cafe_id).cloned().unwrap_or_default())
    }

    async fn get_viewer_count(&self, cafe_id: &str) -> Result<u32, AppError> {
        bump(&self.viewer_calls, cafe_id);
        self.check_failing("viewer count", cafe_id)?;
        let guard = self.viewers.lock().map_err(|_| AppError::StateLock)?;
        Ok(guard.get(cafe_id).copied().unwrap_or(0))
    }

    async fn get_all_cafes(&self) -> Result<Vec<CandidateCafe>, AppError> {
        self.directory_calls.fetch_add(1, Ordering::SeqCst);
        let latency = self
            .directory_latency
            .lock()
            .map(|guard| *guard)
            .unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.directory_down.load(Ordering::SeqCst) {
            return Err(AppError::Directory("mock directory down".to_string()));
        }
        let guard = self.cafes.lock().map_err(|_| AppError::StateLock)?;
        Ok(guard.clone())
    }
}

/// Detection requests in the order the mock saw them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionCall {
    Detect,
    StopStarted,
    StopFinished,
}

#[derive(Debug, Default)]
pub struct MockDetectionService {
    latency: Duration,
    seats: Option<Vec<Seat>>,
    failing: AtomicBool,
    stop_failing: AtomicBool,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    stop_calls: AtomicUsize,
    stop_latency: Mutex<Duration>,
    tokens: Mutex<Vec<String>>,
    log: Mutex<Vec<DetectionCall>>,
}

impl MockDetectionService {
    pub fn new(latency: Duration, seats: Option<Vec<Seat>>) -> Self {
        Self {
            latency,
            seats,
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_stop_failing(&self, failing: bool) {
        self.stop_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_stop_latency(&self, latency: Duration) {
        if let Ok(mut guard) = self.stop_latency.lock() {
            *guard = latency;
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of detections observed running at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn call_log(&self) -> Vec<DetectionCall> {
        self.log
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn record(&self, call: DetectionCall) {
        if let Ok(mut guard) = self.log.lock() {
            guard.push(call);
        }
    }
}

impl DetectionService for MockDetectionService {
    async fn detect_frame(
        &self,
        _cafe_id: &str,
        frame_token: &str,
    ) -> Result<DetectionResult, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.record(DetectionCall::Detect);
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(running, Ordering::SeqCst);
        if let Ok(mut guard) = self.tokens.lock() {
            guard.push(frame_token.to_string());
        }

        tokio::time::sleep(self.latency).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::DetectionServiceUnavailable(
                "mock detection failed".to_string(),
            ));
        }
        Ok(DetectionResult {
            seats: self.seats.clone(),
        })
    }

    async fn stop_detection(&self, _cafe_id: &str) -> Result<(), AppError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.record(DetectionCall::StopStarted);
        let latency = self
            .stop_latency
            .lock()
            .map(|guard| *guard)
            .unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.record(DetectionCall::StopFinished);
        if self.stop_failing.load(Ordering::SeqCst) {
            return Err(AppError::DetectionServiceUnavailable(
                "mock stop failed".to_string(),
            ));
        }
        Ok(())
    }
}
