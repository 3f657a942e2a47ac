//! Shared object trajectories
//!
//! Pure functions of object index and calibrated ledger time, so every
//! client draws the same arc at the same moment.

/// Resting line objects launch from (percent of field height)
pub const BASE_LINE: f64 = 110.0;

/// Floor objects fall to during regeneration
pub const FLOOR: f64 = 120.0;

const GRAVITY: f64 = 200.0;

/// Seconds since the batch started at calibrated ledger time `now_ms`
pub fn elapsed_secs(now_ms: i64, start_time: u64) -> f64 {
    now_ms as f64 / 1000.0 - start_time as f64
}

/// Offset `(dx, dy)` of object `index` along its launch arc.
///
/// `base_y` is the object's resting y in percent, `elapsed` the seconds
/// since the batch started.
pub fn launch_offset(index: usize, base_y: f64, elapsed: f64) -> (f64, f64) {
    let cycle = 3.0 + (index % 4) as f64 * 0.5;
    let delay = (index % 5) as f64 * 0.4;
    let peak = 75.0 + (index % 3) as f64 * 15.0;

    let local = elapsed - delay;
    if local < 0.0 {
        return (0.0, BASE_LINE - base_y);
    }

    let phase = (local % cycle) / cycle;
    // parabola from the base line up to the peak and back
    let height = 4.0 * peak * phase * (1.0 - phase);
    let y = BASE_LINE - height;
    let dx = (local * 0.6 + index as f64 * 2.0).sin() * 2.5;
    (dx, y - base_y)
}

/// Downward offset of object `index` during the regeneration drop
pub fn fall_offset(index: usize, base_y: f64, elapsed: f64) -> f64 {
    let delay = (index % 5) as f64 * 0.08;
    let t = (elapsed - delay).max(0.0);
    (0.5 * GRAVITY * t * t).min(FLOOR - base_y)
}
