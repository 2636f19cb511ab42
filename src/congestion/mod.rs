use serde::{Deserialize, Serialize};
use std::time::SystemTime;

pub mod forecast;

pub type SeatId = i64;

/// Occupied ratio at or below which a café counts as spare.
pub const SPARE_MAX_RATIO: f64 = 0.30;
/// Occupied ratio at or below which a café counts as average.
pub const AVERAGE_MAX_RATIO: f64 = 0.70;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    #[serde(alias = "seatId", alias = "seatID")]
    pub seat_id: SeatId,
    #[serde(alias = "isOccupied")]
    pub occupied: bool,
}

/// Seats of one café at one instant. Counts are always derived.
#[derive(Debug, Clone, PartialEq)]
pub struct SeatSnapshot {
    pub seats: Vec<Seat>,
    pub captured_at: SystemTime,
}

impl SeatSnapshot {
    pub fn new(seats: Vec<Seat>, captured_at: SystemTime) -> Self {
        Self { seats, captured_at }
    }

    pub fn total(&self) -> usize {
        self.seats.len()
    }

    pub fn occupied(&self) -> usize {
        self.seats.iter().filter(|seat| seat.occupied).count()
    }

    pub fn vacant(&self) -> usize {
        self.total() - self.occupied()
    }

    pub fn vacant_ratio(&self) -> f64 {
        self.vacant() as f64 / self.total().max(1) as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CongestionTier {
    Spare,
    Average,
    Busy,
    Unknown,
}

pub fn classify(occupied: usize, total: usize) -> CongestionTier {
    if total == 0 {
        return CongestionTier::Unknown;
    }
    let ratio = occupied as f64 / total as f64;
    if ratio <= SPARE_MAX_RATIO {
        CongestionTier::Spare
    } else if ratio <= AVERAGE_MAX_RATIO {
        CongestionTier::Average
    } else {
        CongestionTier::Busy
    }
}

pub fn classify_snapshot(snapshot: &SeatSnapshot) -> CongestionTier {
    classify(snapshot.occupied(), snapshot.total())
}

/// Classifies a whole occupied percentage (historical aggregates).
pub fn classify_percentage(percentage: u8) -> CongestionTier {
    if percentage > 70 {
        CongestionTier::Busy
    } else if percentage > 30 {
        CongestionTier::Average
    } else {
        CongestionTier::Spare
    }
}

pub fn congestion_weight(tier: CongestionTier) -> u32 {
    match tier {
        CongestionTier::Busy => 2,
        CongestionTier::Average => 1,
        CongestionTier::Spare | CongestionTier::Unknown => 0,
    }
}

/// True while a café is crowded enough, given who else is looking at it,
/// to suggest an alternative.
pub fn escalation_condition(tier: CongestionTier, viewer_count: u32) -> bool {
    congestion_weight(tier).saturating_mul(viewer_count) >= 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn snapshot(occupied: usize, total: usize) -> SeatSnapshot {
        let seats = (0..total)
            .map(|index| Seat {
                seat_id: index as SeatId + 1,
                occupied: index < occupied,
            })
            .collect();
        SeatSnapshot::new(seats, UNIX_EPOCH)
    }

    #[test]
    fn classify_reference_points() {
        assert_eq!(classify(0, 10), CongestionTier::Spare);
        assert_eq!(classify(5, 10), CongestionTier::Average);
        assert_eq!(classify(8, 10), CongestionTier::Busy);
    }

    #[test]
    fn zero_total_is_unknown() {
        for occupied in [0, 1, 50] {
            assert_eq!(classify(occupied, 0), CongestionTier::Unknown);
        }
    }

    #[test]
    fn boundaries_belong_to_lower_tier() {
        assert_eq!(classify(3, 10), CongestionTier::Spare);
        assert_eq!(classify(7, 10), CongestionTier::Average);
        assert_eq!(classify(31, 100), CongestionTier::Average);
        assert_eq!(classify(71, 100), CongestionTier::Busy);
    }

    #[test]
    fn snapshot_counts_are_derived() {
        let snap = snapshot(8, 10);

        assert_eq!(snap.total(), 10);
        assert_eq!(snap.occupied(), 8);
        assert_eq!(snap.vacant(), 2);
        assert!((snap.vacant_ratio() - 0.2).abs() < 1e-12);
        assert_eq!(classify_snapshot(&snap), CongestionTier::Busy);
    }

    #[test]
    fn empty_snapshot_has_zero_vacant_ratio() {
        let snap = snapshot(0, 0);

        assert_eq!(snap.vacant_ratio(), 0.0);
        assert_eq!(classify_snapshot(&snap), CongestionTier::Unknown);
    }

    #[test]
    fn escalation_depends_on_weight_and_viewers() {
        assert!(escalation_condition(CongestionTier::Busy, 1));
        assert!(escalation_condition(CongestionTier::Average, 1));
        assert!(!escalation_condition(CongestionTier::Spare, 10));
        assert!(!escalation_condition(CongestionTier::Unknown, 10));
        assert!(!escalation_condition(CongestionTier::Busy, 0));
    }

    #[test]
    fn percentage_classification_matches_ratio_thresholds() {
        assert_eq!(classify_percentage(30), CongestionTier::Spare);
        assert_eq!(classify_percentage(31), CongestionTier::Average);
        assert_eq!(classify_percentage(70), CongestionTier::Average);
        assert_eq!(classify_percentage(71), CongestionTier::Busy);
    }

    #[test]
    fn seat_accepts_upstream_field_names() -> Result<(), serde_json::Error> {
        let seat: Seat = serde_json::from_str(r#"{"seatId": 4, "occupied": true}"#)?;

        assert_eq!(
            seat,
            Seat {
                seat_id: 4,
                occupied: true
            }
        );
        Ok(())
    }
}
