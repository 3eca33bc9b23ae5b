//! Loudness math for the level meter.
//!
//! Stateless helpers shared by the level monitor and the aircheck pump.

/// Floor of the meter scale. Anything at or below reads as "Silent".
pub const SILENCE_FLOOR_DB: f32 = -90.0;

pub struct LevelMeter;

impl LevelMeter {
    /// Root-mean-square of a window of samples.
    pub fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }

        let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum_sq / samples.len() as f64).sqrt() as f32
    }

    /// Convert a linear amplitude (1.0 = full scale) to dBFS, clamped to
    /// `[floor_db, 0.0]`.
    pub fn amplitude_to_db(amplitude: f32, floor_db: f32) -> f32 {
        if !amplitude.is_finite() || amplitude <= 0.0 {
            return floor_db;
        }
        (20.0 * amplitude.log10()).clamp(floor_db, 0.0)
    }

    /// dBFS level of a sample window.
    pub fn window_db(samples: &[f32], floor_db: f32) -> f32 {
        Self::amplitude_to_db(Self::rms(samples), floor_db)
    }

    /// Apply output gain in place, clamping to full scale.
    pub fn apply_gain(samples: &mut [f32], gain: f32) {
        if (gain - 1.0).abs() < f32::EPSILON {
            return;
        }
        for sample in samples.iter_mut() {
            *sample = (*sample * gain).clamp(-1.0, 1.0);
        }
    }
}
