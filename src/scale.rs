// Copyright © 2025 Jocelyn Turcotte <turcotte.j@gmail.com>
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};

/// Converts the natural log of a power value to decibels (10 / ln 10).
pub const POWER_DB_FACTOR: f32 = 10.0 / std::f32::consts::LN_10;

/// Magnitudes are clamped to this before taking the logarithm.
/// Zero, negative and NaN inputs all end up here.
pub const MAGNITUDE_FLOOR: f32 = 1e-12;

/// Smallest distance allowed between `PowerRange::min` and `PowerRange::max`, in dB.
pub const MIN_SPAN_DB: f32 = 1.0;

/// Converts a raw magnitude to decibels, flooring it first.
#[inline]
pub fn power_db(magnitude: f32) -> f32 {
    // f32::max ignores NaN, which also takes the floor.
    POWER_DB_FACTOR * magnitude.max(MAGNITUDE_FLOOR).ln()
}

/// Affine remap applied to the dB value of every sample of a row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleParameters {
    pub additive_offset: f32,
    pub multiplicative_scale: f32,
}

impl ScaleParameters {
    pub const IDENTITY: ScaleParameters = ScaleParameters {
        additive_offset: 0.0,
        multiplicative_scale: 1.0,
    };

    pub fn new(additive_offset: f32, multiplicative_scale: f32) -> Self {
        Self {
            additive_offset,
            multiplicative_scale,
        }
    }

    /// Display intensity of one magnitude sample. Not clamped, the colormap takes care of that.
    #[inline]
    pub fn scale(&self, magnitude: f32) -> f32 {
        (power_db(magnitude) + self.additive_offset) * self.multiplicative_scale
    }
}

impl Default for ScaleParameters {
    fn default() -> Self {
        PowerRange::default().scale_parameters()
    }
}

/// User-facing power controls, in dB.
///
/// `offset` is added to every sample, and `min..max` is the dB span that maps to
/// the full colormap range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerRange {
    pub offset: f32,
    pub min: f32,
    pub max: f32,
}

impl Default for PowerRange {
    fn default() -> Self {
        Self {
            offset: 30.0,
            min: 0.0,
            max: 100.0,
        }
    }
}

impl PowerRange {
    pub fn increment_offset(&mut self, delta: f32) {
        self.offset += delta;
    }

    pub fn increment_max(&mut self, delta: f32) {
        self.max += delta;
    }

    pub fn increment_min(&mut self, delta: f32) {
        self.min += delta;
    }

    pub fn span(&self) -> f32 {
        (self.max - self.min).abs().max(MIN_SPAN_DB)
    }

    pub fn scale_parameters(&self) -> ScaleParameters {
        ScaleParameters::new(self.offset, 1.0 / self.span())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_scale(m: f64, add: f64, mult: f64) -> f64 {
        (10.0 / std::f64::consts::LN_10 * m.ln() + add) * mult
    }

    fn assert_close(actual: f32, expected: f64) {
        let tolerance = 1e-5 * expected.abs().max(1.0);
        assert!(
            (actual as f64 - expected).abs() <= tolerance,
            "{actual} != {expected}"
        );
    }

    #[test]
    fn scale_matches_decibel_formula() {
        let params = ScaleParameters::new(30.0, 0.01);
        for m in [1e-9f32, 1e-6, 0.001, 0.5, 1.0, 2.0, 1234.5, 1e9, 3e30] {
            assert_close(params.scale(m), reference_scale(m as f64, 30.0, 0.01));
        }
    }

    #[test]
    fn identity_scale_is_plain_decibels() {
        assert_eq!(ScaleParameters::IDENTITY.scale(1.0), 0.0);
        assert_close(ScaleParameters::IDENTITY.scale(10.0), 10.0);
        assert_close(ScaleParameters::IDENTITY.scale(100.0), 20.0);
        assert_close(
            ScaleParameters::IDENTITY.scale(std::f32::consts::E),
            10.0 / std::f64::consts::LN_10,
        );
    }

    #[test]
    fn non_positive_magnitudes_are_floored() {
        let params = ScaleParameters::new(30.0, 0.01);
        let floor = params.scale(MAGNITUDE_FLOOR);
        for m in [0.0f32, -0.0, -1.0, -1e20, f32::NEG_INFINITY, f32::NAN] {
            let value = params.scale(m);
            assert!(value.is_finite(), "scale({m}) = {value}");
            assert_eq!(value, floor);
            // Stable across calls
            assert_eq!(value, params.scale(m));
        }
        assert_close(power_db(0.0), -120.0);
    }

    #[test]
    fn power_range_drives_scale_parameters() {
        let mut range = PowerRange::default();
        assert_eq!(
            range.scale_parameters(),
            ScaleParameters::new(30.0, 1.0 / 100.0)
        );

        range.increment_offset(-10.0);
        range.increment_max(-10.0);
        range.increment_min(10.0);
        assert_eq!(range.offset, 20.0);
        assert_eq!(range.scale_parameters().multiplicative_scale, 1.0 / 80.0);

        // Inverted ranges keep a positive span
        range.min = 50.0;
        range.max = 30.0;
        assert_eq!(range.span(), 20.0);
    }

    #[test]
    fn collapsed_power_range_keeps_scale_finite() {
        let range = PowerRange {
            offset: 0.0,
            min: 42.0,
            max: 42.0,
        };
        assert_eq!(range.span(), MIN_SPAN_DB);
        assert!(range.scale_parameters().multiplicative_scale.is_finite());
    }
}
