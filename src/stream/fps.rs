// Frame rate selection for recording and the pump period

/// Lowest frame rate a recording is made at
pub const MIN_FPS: f64 = 1.0;
/// Highest frame rate a recording is made at
pub const MAX_FPS: f64 = 60.0;
/// Reported rate changes above this trigger a reinitialisation
pub const FPS_DRIFT_TOLERANCE: f64 = 0.1;

/// Recording frame rate for a stream.
///
/// The camera's preferred maximum is clamped into [`MIN_FPS`, `MAX_FPS`] and
/// never exceeds the rate the stream reports. A stream reporting nothing
/// usable gets the clamped preference.
pub fn recording_fps(reported_fps: f64, camera_max_fps: f64) -> f64 {
    let preferred = if camera_max_fps.is_finite() {
        camera_max_fps.clamp(MIN_FPS, MAX_FPS)
    } else {
        MAX_FPS
    };
    if reported_fps.is_finite() && reported_fps > 0.0 {
        preferred.min(reported_fps)
    } else {
        preferred
    }
}

/// Pump period in whole milliseconds, at least 1
pub fn update_period_ms(fps: f64) -> u64 {
    if !(fps.is_finite() && fps > 0.0) {
        return (1000.0 / MIN_FPS) as u64;
    }
    ((1000.0 / fps).round() as u64).max(1)
}

pub fn fps_drifted(previous: f64, current: f64) -> bool {
    (previous - current).abs() > FPS_DRIFT_TOLERANCE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periods_for_common_rates() {
        assert_eq!(update_period_ms(25.0), 40);
        assert_eq!(update_period_ms(15.0), 67);
        assert_eq!(update_period_ms(30.0), 33);
        assert_eq!(update_period_ms(0.0), 1000);
    }

    #[test]
    fn recording_rate_respects_camera_and_bounds() {
        assert_eq!(recording_fps(25.0, 25.0), 25.0);
        assert_eq!(recording_fps(15.0, 25.0), 15.0);
        assert_eq!(recording_fps(30.0, 120.0), 30.0);
        assert_eq!(recording_fps(90.0, 120.0), MAX_FPS);
        assert_eq!(recording_fps(30.0, 0.0), MIN_FPS);
        assert_eq!(recording_fps(0.0, 20.0), 20.0);
    }

    #[test]
    fn small_changes_are_not_drift() {
        assert!(!fps_drifted(25.0, 25.05));
        assert!(!fps_drifted(29.97, 30.0));
        assert!(fps_drifted(25.0, 15.0));
        assert!(fps_drifted(30.0, 29.8));
    }
}
