// Math helpers shared by the calculators

/// Smoothing factor of an exponential moving average over `samples` samples
pub fn ema_factor(samples: usize) -> f64 {
    2. / (samples.max(1) as f64 + 1.)
}

pub fn ema(prev: f64, value: f64, factor: f64) -> f64 {
    prev + factor * (value - prev)
}

/// Linear interpolation of `y` at `x` between (`x1`, `y1`) and (`x2`, `y2`)
pub fn linear_interp(x: f64, x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    if x2 == x1 {
        return y1;
    }
    y1 + (x - x1) * (y2 - y1) / (x2 - x1)
}

/// Distance of `target` from `origin` along a closed track, positive when `target` is ahead.
///
/// The result is wrapped to the half lap around `origin`.
pub fn circular_relative_distance(track_length: f64, origin: f64, target: f64) -> f64 {
    let diff = target - origin;
    if track_length <= 0. {
        return diff;
    }
    let half = track_length * 0.5;
    if diff > half {
        diff - track_length
    } else if diff < -half {
        diff + track_length
    } else {
        diff
    }
}

/// Rotate a world space offset (x, z) into a frame where `heading` points to +y
pub fn rotate_coordinate(heading: f64, x: f64, z: f64) -> (f64, f64) {
    let (sin, cos) = heading.sin_cos();
    (x * cos - z * sin, x * sin + z * cos)
}

/// Straight line distance between two world positions
pub fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(p, q)| (p - q) * (p - q))
        .sum::<f64>()
        .sqrt()
}

/// Compare lap progress of two vehicles: 1 if `target` is a lap or more ahead, -1 if a lap or
/// more behind, 0 otherwise.
pub fn lap_difference(
    target_progress: f64,
    origin_progress: f64,
    ahead_threshold: f64,
    behind_threshold: f64,
) -> i8 {
    let diff = target_progress - origin_progress;
    if diff > ahead_threshold {
        1
    } else if diff < -behind_threshold {
        -1
    } else {
        0
    }
}

/// Laps (including the remainder of the current one) a timed session can still support.
///
/// The session ends on the first line crossing after the clock runs out, so the count rounds
/// up to the next full lap boundary.
pub fn end_timer_laps_remain(lap_into: f64, pace: f64, time_left: f64) -> f64 {
    if pace <= 0. {
        return 0.;
    }
    let laps = (lap_into + time_left.max(0.) / pace).ceil();
    (laps - lap_into).max(0.)
}

/// Safe division returning 0 when the divisor is not positive
pub fn div_or_zero(value: f64, divisor: f64) -> f64 {
    if divisor > 0. { value / divisor } else { 0. }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_ema_factor() {
        assert_eq!(ema_factor(1), 1.);
        assert!((ema_factor(9) - 0.2).abs() < 1e-9);
        assert_eq!(ema_factor(0), 1.);
    }

    #[test]
    fn test_linear_interp() {
        assert!((linear_interp(150., 100., 10., 200., 22.) - 16.).abs() < 1e-9);
        assert_eq!(linear_interp(5., 5., 3., 5., 9.), 3.);
    }

    #[test]
    fn test_circular_relative_distance_wraps() {
        assert_eq!(circular_relative_distance(1000., 100., 200.), 100.);
        assert_eq!(circular_relative_distance(1000., 100., 900.), -200.);
        assert_eq!(circular_relative_distance(1000., 900., 100.), 200.);
    }

    #[test]
    fn test_rotate_coordinate() {
        let (x, y) = rotate_coordinate(0., 3., 4.);
        assert_eq!((x, y), (3., 4.));
        let (x, y) = rotate_coordinate(FRAC_PI_2, 1., 0.);
        assert!(x.abs() < 1e-9);
        assert!((y - 1.).abs() < 1e-9);
    }

    #[test]
    fn test_lap_difference() {
        assert_eq!(lap_difference(5.95, 5., 0.9, 0.9), 1);
        assert_eq!(lap_difference(4.05, 5., 0.9, 0.9), -1);
        assert_eq!(lap_difference(5.5, 5., 0.9, 0.9), 0);
    }

    #[test]
    fn test_end_timer_laps_remain() {
        // 0.3 into the lap, 3.4 laps worth of clock: the session ends after 4 line crossings
        let laps = end_timer_laps_remain(0.3, 100., 340.);
        assert!((laps - 3.7).abs() < 1e-9);
        assert_eq!(end_timer_laps_remain(0.5, 0., 100.), 0.);
    }
}
