use std::time::Duration;

/// Playback position of the café's video stream, `elapsed` after the view
/// opened. Loops when the video length is known.
pub fn playback_position(elapsed: Duration, video_length: Option<Duration>) -> Duration {
    match video_length {
        Some(length) if !length.is_zero() => {
            let nanos = elapsed.as_nanos() % length.as_nanos();
            Duration::from_nanos(nanos as u64)
        }
        _ => elapsed,
    }
}

/// Formats a position as the `MM-SS` frame token the inference service
/// indexes frames by.
pub fn format_frame_token(position: Duration) -> String {
    let total_seconds = position.as_secs();
    let minutes = (total_seconds / 60) % 100;
    let seconds = total_seconds % 60;
    format!("{minutes:02}-{seconds:02}")
}
