use crate::error::AppError;
use crate::schedule::{MINUTES_PER_DAY, OpeningSchedule, ScheduleWindow};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct OpeningHoursPayload {
    #[serde(default)]
    periods: Vec<PeriodPayload>,
}

#[derive(Debug, Deserialize)]
struct PeriodPayload {
    open: Option<PointPayload>,
    close: Option<PointPayload>,
}

#[derive(Debug, Deserialize)]
struct PointPayload {
    day: i64,
    #[serde(default)]
    hour: Option<i64>,
    #[serde(default)]
    minute: Option<i64>,
}

impl PointPayload {
    fn minute_of_day(&self) -> Result<u16, AppError> {
        let hour = self.hour.unwrap_or(0);
        let minute = self.minute.unwrap_or(0);
        if !(0..=23).contains(&hour) || !(0..=59).contains(&minute) {
            return Err(AppError::MalformedSchedule(format!(
                "time of day out of range: {hour}:{minute}"
            )));
        }
        let minutes = hour * 60 + minute;
        debug_assert!(minutes < i64::from(MINUTES_PER_DAY));
        Ok(minutes as u16)
    }

    fn weekday(&self) -> Result<u8, AppError> {
        if !(0..=6).contains(&self.day) {
            return Err(AppError::MalformedSchedule(format!(
                "weekday out of range: {}",
                self.day
            )));
        }
        Ok(self.day as u8)
    }
}

/// Decodes the upstream opening-hours payload (HTML-entity encoded JSON)
/// into a structured schedule.
pub fn parse_opening_hours(raw: &str) -> Result<OpeningSchedule, AppError> {
    let decoded = decode_html_entities(raw.trim());
    if decoded.is_empty() {
        return Ok(OpeningSchedule::default());
    }

    let payload: OpeningHoursPayload = serde_json::from_str(&decoded)
        .map_err(|err| AppError::MalformedSchedule(err.to_string()))?;

    let mut windows = Vec::with_capacity(payload.periods.len());
    for period in payload.periods {
        let Some(open) = period.open else {
            continue;
        };
        let close_minute = match period.close {
            Some(close) => Some(close.minute_of_day()?),
            None => None,
        };
        windows.push(ScheduleWindow {
            weekday: open.weekday()?,
            open_minute: open.minute_of_day()?,
            close_minute,
        });
    }

    Ok(OpeningSchedule::new(windows))
}

/// Ingests an optional payload, degrading malformed input to "no schedule".
pub fn schedule_or_unknown(raw: Option<&str>) -> Option<OpeningSchedule> {
    let raw = raw?;
    match parse_opening_hours(raw) {
        Ok(schedule) => Some(schedule),
        Err(err) => {
            warn!(error = %err, "Opening hours unreadable, treating as unknown");
            None
        }
    }
}

fn decode_html_entities(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find('&') {
        output.push_str(&rest[..start]);
        let tail = &rest[start..];
        match tail.find(';').and_then(|end| {
            decode_entity(&tail[1..end]).map(|decoded| (decoded, end))
        }) {
            Some((decoded, end)) => {
                output.push(decoded);
                rest = &tail[end + 1..];
            }
            None => {
                output.push('&');
                rest = &tail[1..];
            }
        }
    }
    output.push_str(rest);
    output
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "quot" => Some('"'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "nbsp" => Some(' '),
        _ => {
            let digits = name.strip_prefix('#')?;
            let code = match digits.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => digits.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_entity_encoded_payload() -> Result<(), AppError> {
        let raw = "{&quot;periods&quot;:[{&quot;open&quot;:{&quot;day&quot;:1,&quot;hour&quot;:9,&quot;minute&quot;:30},&quot;close&quot;:{&quot;day&quot;:1,&quot;hour&quot;:21}}]}";

        let schedule = parse_opening_hours(raw)?;

        assert_eq!(
            schedule.windows(),
            &[ScheduleWindow {
                weekday: 1,
                open_minute: 9 * 60 + 30,
                close_minute: Some(21 * 60),
            }]
        );
        Ok(())
    }

    #[test]
    fn numeric_entities_are_decoded() {
        assert_eq!(decode_html_entities("&#34;a&#x27;b&#39;"), "\"a'b'");
        assert_eq!(decode_html_entities("fish &chips"), "fish &chips");
    }

    #[test]
    fn open_without_close_is_kept() -> Result<(), AppError> {
        let schedule = parse_opening_hours(r#"{"periods":[{"open":{"day":0}}]}"#)?;

        assert_eq!(
            schedule.windows(),
            &[ScheduleWindow {
                weekday: 0,
                open_minute: 0,
                close_minute: None,
            }]
        );
        Ok(())
    }

    #[test]
    fn empty_object_is_empty_schedule() -> Result<(), AppError> {
        assert!(parse_opening_hours("{}")?.is_empty());
        assert!(parse_opening_hours("  ")?.is_empty());
        Ok(())
    }

    #[test]
    fn out_of_range_weekday_is_malformed() {
        let result = parse_opening_hours(r#"{"periods":[{"open":{"day":7,"hour":9}}]}"#);

        assert!(matches!(result, Err(AppError::MalformedSchedule(_))));
    }

    #[test]
    fn huge_hour_is_malformed_not_a_panic() {
        let result = parse_opening_hours(
            r#"{"periods":[{"open":{"day":1,"hour":9223372036854775807,"minute":0}}]}"#,
        );
        assert!(matches!(result, Err(AppError::MalformedSchedule(_))));

        let result = parse_opening_hours(
            r#"{"periods":[{"open":{"day":1,"hour":9,"minute":-9223372036854775808}}]}"#,
        );
        assert!(matches!(result, Err(AppError::MalformedSchedule(_))));

        assert!(
            schedule_or_unknown(Some(
                r#"{"periods":[{"close":{"day":2,"hour":24,"minute":0}}]}"#
            ))
            .is_none()
        );
    }

    #[test]
    fn invalid_json_degrades_to_unknown() {
        assert!(schedule_or_unknown(Some("not json")).is_none());
        assert!(schedule_or_unknown(None).is_none());
    }
}
