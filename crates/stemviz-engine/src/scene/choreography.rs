//! Scripted timeline keyed to absolute playback time.
//!
//! Everything here is a pure function of the playback clock: no
//! accumulators, no per-tick state. Seeking anywhere in the track and
//! re-evaluating gives exactly the levels a continuous playthrough
//! would have reached. Each window is a named const pair so the
//! schedule reads as a setlist.

/// Pull-to-center window: particles abandon the outward drift and
/// collapse toward the origin.
pub const PULL_WINDOW: (f64, f64) = (210.0, 260.0);
/// Seconds over which the pull force ramps 0 -> 1 at window start.
pub const PULL_RAMP_SECS: f64 = 8.0;

/// Burst window: raised particle ceiling, trail spike, camera pushed out.
pub const BURST_WINDOW: (f64, f64) = (150.0, 162.0);
pub const BURST_PARTICLE_CEILING: usize = 7_000;
pub const BURST_TRAIL_SPIKE: f32 = 10.0;

/// The three mutually exclusive overlay windows.
pub const OVERLAY_EARLY_WINDOW: (f64, f64) = (0.0, 12.0);
pub const OVERLAY_VOCAL_WINDOW: (f64, f64) = (96.0, 128.0);
pub const OVERLAY_LATE_WINDOW: (f64, f64) = (288.0, 320.0);
const OVERLAY_LATE_RAMP_SECS: f64 = 6.0;

/// Core body 5x scale window, with symmetric ramps at both edges.
pub const CORE_SCALE_WINDOW: (f64, f64) = (180.0, 205.0);
pub const CORE_SCALE_PEAK: f32 = 5.0;
const CORE_SCALE_RAMP_SECS: f64 = 5.0;

/// Ethereal mode: slow camera smoothing, low-frequency drift.
pub const ETHEREAL_WINDOW: (f64, f64) = (230.0, 290.0);

/// Window in which the drive stem is treated as inactive regardless of
/// its live energy (orbit behaviour suppressed).
pub const STEM_DISABLE_WINDOW: (f64, f64) = (60.0, 75.0);

/// Timeline hue blend for particle color, ramping in and out.
pub const TIMELINE_HUE_WINDOW: (f64, f64) = (120.0, 260.0);
const TIMELINE_HUE_RAMP_IN_SECS: f64 = 30.0;
const TIMELINE_HUE_RAMP_OUT_SECS: f64 = 10.0;

/// Particle ceiling outside the burst window.
pub const BASE_PARTICLE_CEILING: usize = 5_000;

// Death-rate schedule: off, exponential ramp, off, then delegated to
// the drive stem's live energy.
pub const DEATH_RAMP_WINDOW: (f64, f64) = (45.0, 75.0);
pub const DEATH_DELEGATE_FROM: f64 = 90.0;
const DEATH_RAMP_BASE_RATE: f32 = 0.25;
const DEATH_RAMP_EXP_BASE: f32 = 1.12;
const DEATH_RAMP_CAP: f32 = 4.0;

/// How the particle pool should be killing particles right now.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeathRate {
    /// Fixed scripted rate (zero means nobody dies).
    Scripted(f32),
    /// Rate follows the drive stem's live energy.
    StemDelegated,
}

/// Which overlay window (if any) is active. At most one at a time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Overlay {
    None,
    /// Opening fade, opacity 1 -> 0 across the window.
    EarlyFade { opacity: f32 },
    /// Opacity comes from the live vocal energy; the level itself is 1.
    VocalDriven,
    /// Late scripted window with ramped edges.
    LateScripted { opacity: f32 },
}

/// All scripted levels for one instant of playback time.
#[derive(Clone, Copy, Debug)]
pub struct Levels {
    /// Pull-to-center strength in [0,1]; replaces the outward drift.
    pub pull_strength: f32,
    pub burst: bool,
    pub particle_ceiling: usize,
    pub trail_spike: f32,
    pub overlay: Overlay,
    /// Multiplier on the core body's scale, 1 outside the window.
    pub core_scale: f32,
    pub ethereal: bool,
    /// Drive stem forced inactive when true.
    pub drive_disabled: bool,
    /// Second hue blend level for particle color, [0,1].
    pub timeline_hue: f32,
    pub death_rate: DeathRate,
}

fn in_window(t: f64, window: (f64, f64)) -> bool {
    t >= window.0 && t < window.1
}

/// Evaluate every scripted level at playback time `t` (seconds).
pub fn at(t: f64) -> Levels {
    let t = t.max(0.0);

    let pull_strength = if in_window(t, PULL_WINDOW) {
        (((t - PULL_WINDOW.0) / PULL_RAMP_SECS).min(1.0)) as f32
    } else {
        0.0
    };

    let burst = in_window(t, BURST_WINDOW);

    let overlay = if in_window(t, OVERLAY_EARLY_WINDOW) {
        let span = OVERLAY_EARLY_WINDOW.1 - OVERLAY_EARLY_WINDOW.0;
        Overlay::EarlyFade {
            opacity: (1.0 - (t - OVERLAY_EARLY_WINDOW.0) / span) as f32,
        }
    } else if in_window(t, OVERLAY_VOCAL_WINDOW) {
        Overlay::VocalDriven
    } else if in_window(t, OVERLAY_LATE_WINDOW) {
        let rise = ((t - OVERLAY_LATE_WINDOW.0) / OVERLAY_LATE_RAMP_SECS).min(1.0);
        let fall = ((OVERLAY_LATE_WINDOW.1 - t) / OVERLAY_LATE_RAMP_SECS).min(1.0);
        Overlay::LateScripted {
            opacity: rise.min(fall) as f32,
        }
    } else {
        Overlay::None
    };

    let core_scale = if in_window(t, CORE_SCALE_WINDOW) {
        let rise = ((t - CORE_SCALE_WINDOW.0) / CORE_SCALE_RAMP_SECS).min(1.0) as f32;
        let fall = ((CORE_SCALE_WINDOW.1 - t) / CORE_SCALE_RAMP_SECS).min(1.0) as f32;
        1.0 + (CORE_SCALE_PEAK - 1.0) * rise.min(fall)
    } else {
        1.0
    };

    let timeline_hue = if in_window(t, TIMELINE_HUE_WINDOW) {
        let rise = ((t - TIMELINE_HUE_WINDOW.0) / TIMELINE_HUE_RAMP_IN_SECS).min(1.0);
        let fall = ((TIMELINE_HUE_WINDOW.1 - t) / TIMELINE_HUE_RAMP_OUT_SECS).min(1.0);
        rise.min(fall) as f32
    } else {
        0.0
    };

    let death_rate = if in_window(t, DEATH_RAMP_WINDOW) {
        let elapsed = (t - DEATH_RAMP_WINDOW.0) as f32;
        DeathRate::Scripted(
            (DEATH_RAMP_BASE_RATE * DEATH_RAMP_EXP_BASE.powf(elapsed)).min(DEATH_RAMP_CAP),
        )
    } else if t >= DEATH_DELEGATE_FROM {
        DeathRate::StemDelegated
    } else {
        DeathRate::Scripted(0.0)
    };

    Levels {
        pull_strength,
        burst,
        particle_ceiling: if burst {
            BURST_PARTICLE_CEILING
        } else {
            BASE_PARTICLE_CEILING
        },
        trail_spike: if burst { BURST_TRAIL_SPIKE } else { 1.0 },
        overlay,
        core_scale,
        ethereal: in_window(t, ETHEREAL_WINDOW),
        drive_disabled: in_window(t, STEM_DISABLE_WINDOW),
        timeline_hue,
        death_rate,
    }
}
