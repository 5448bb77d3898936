// Copyright © 2025 Jocelyn Turcotte <turcotte.j@gmail.com>
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};

/// Number of entries sampled from a palette. The GPU gets the same table.
pub const LUT_SIZE: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Palette {
    Turbo,
    Viridis,
    Inferno,
    Magma,
    Plasma,
    Cividis,
    Greys,
}

impl Palette {
    fn gradient(self) -> colorous::Gradient {
        match self {
            Palette::Turbo => colorous::TURBO,
            Palette::Viridis => colorous::VIRIDIS,
            Palette::Inferno => colorous::INFERNO,
            Palette::Magma => colorous::MAGMA,
            Palette::Plasma => colorous::PLASMA,
            Palette::Cividis => colorous::CIVIDIS,
            Palette::Greys => colorous::GREYS,
        }
    }
}

/// Scalar intensity to RGBA lookup.
///
/// Stateless once built: the same intensity always gives the same color,
/// and any `f32` (including NaN and infinities) is a valid input.
#[derive(Clone)]
pub struct Colormap {
    palette: Palette,
    lut: Box<[[u8; 4]; LUT_SIZE]>,
}

impl std::fmt::Debug for Colormap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Colormap")
            .field("palette", &self.palette)
            .finish_non_exhaustive()
    }
}

impl Colormap {
    pub fn new(palette: Palette) -> Self {
        let gradient = palette.gradient();
        let mut lut = Box::new([[0u8; 4]; LUT_SIZE]);
        for (i, entry) in lut.iter_mut().enumerate() {
            let c = gradient.eval_continuous(i as f64 / (LUT_SIZE - 1) as f64);
            *entry = [c.r, c.g, c.b, u8::MAX];
        }
        Self { palette, lut }
    }

    pub fn palette(&self) -> Palette {
        self.palette
    }

    /// Table index for an intensity: clamped to [0, 1], rounded half up.
    /// NaN ends up on the first entry.
    #[inline]
    pub fn lut_index(intensity: f32) -> usize {
        let t = intensity.clamp(0.0, 1.0);
        // NaN survives the clamp and casts to 0.
        ((t * (LUT_SIZE - 1) as f32 + 0.5).floor() as usize).min(LUT_SIZE - 1)
    }

    #[inline]
    pub fn map(&self, intensity: f32) -> [u8; 4] {
        self.lut[Self::lut_index(intensity)]
    }

    pub fn zero_color(&self) -> [u8; 4] {
        self.map(0.0)
    }

    pub fn lut(&self) -> &[[u8; 4]] {
        &self.lut[..]
    }

    /// Normalized table for upload into a shader storage buffer.
    pub fn lut_normalized(&self) -> Vec<[f32; 4]> {
        self.lut
            .iter()
            .map(|c| c.map(|channel| channel as f32 / 255.0))
            .collect()
    }
}

impl Default for Colormap {
    fn default() -> Self {
        Colormap::new(Palette::Turbo)
    }
}
