//! Hourly congestion forecast from historical seat samples.
//!
//! History is a CSV export with the columns
//! `cafe_id,day_of_week,hour,seat_total,seat_vacant` and a header line.

use crate::congestion::{CongestionTier, classify_percentage};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

pub const FIRST_FORECAST_HOUR: u8 = 9;
pub const LAST_FORECAST_HOUR: u8 = 23;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySample {
    pub cafe_id: String,
    pub day_of_week: String,
    pub hour: u8,
    pub seat_total: u32,
    pub seat_vacant: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourlyCongestion {
    pub hour: u8,
    pub percentage: u8,
    pub status: CongestionTier,
    pub is_current: bool,
    pub is_past: bool,
}

/// Loads history from disk. Unreadable files and lines are logged and skipped.
pub fn load_history(path: impl AsRef<Path>) -> Vec<HistorySample> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let samples = parse_history(&contents);
            info!(path = %path.display(), samples = samples.len(), "Congestion history loaded");
            samples
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Congestion history unavailable");
            Vec::new()
        }
    }
}

pub fn parse_history(contents: &str) -> Vec<HistorySample> {
    contents
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let sample = parse_line(line);
            if sample.is_none() {
                warn!(line, "Skipping malformed history line");
            }
            sample
        })
        .collect()
}

fn parse_line(line: &str) -> Option<HistorySample> {
    let tokens: Vec<&str> = line.split(',').map(str::trim).collect();
    if tokens.len() < 5 {
        return None;
    }
    Some(HistorySample {
        cafe_id: tokens[0].to_string(),
        day_of_week: tokens[1].to_string(),
        hour: tokens[2].parse().ok()?,
        seat_total: tokens[3].parse().ok()?,
        seat_vacant: tokens[4].parse().ok()?,
    })
}

pub fn hourly_forecast(
    samples: &[HistorySample],
    cafe_id: &str,
    day: &str,
    current_hour: u8,
) -> Vec<HourlyCongestion> {
    (FIRST_FORECAST_HOUR..=LAST_FORECAST_HOUR)
        .filter_map(|hour| {
            let ratios: Vec<f64> = samples
                .iter()
                .filter(|s| {
                    s.hour == hour
                        && s.cafe_id == cafe_id
                        && s.day_of_week.eq_ignore_ascii_case(day)
                        && s.seat_total > 0
                })
                .map(|s| {
                    f64::from(s.seat_total.saturating_sub(s.seat_vacant)) / f64::from(s.seat_total)
                })
                .collect();
            if ratios.is_empty() {
                return None;
            }
            let average = ratios.iter().sum::<f64>() / ratios.len() as f64;
            let percentage = (average * 100.0).round().clamp(0.0, 100.0) as u8;
            Some(HourlyCongestion {
                hour,
                percentage,
                status: classify_percentage(percentage),
                is_current: hour == current_hour,
                is_past: hour < current_hour,
            })
        })
        .collect()
}

pub fn recommended_visit_hours(forecast: &[HourlyCongestion]) -> Vec<u8> {
    forecast
        .iter()
        .filter(|entry| entry.status == CongestionTier::Spare)
        .map(|entry| entry.hour)
        .collect()
}
