// Copyright © 2025 Jocelyn Turcotte <turcotte.j@gmail.com>
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::{Result, WaterfallError};
use crate::history::{HistoryBuffer, InsertionPointer, source_bin};
use crate::scale::ScaleParameters;

/// How the update pass addresses the row being inserted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStrategy {
    /// Only the texels of the row selected by the insertion pointer are recomputed. Old rows
    /// never move and their age is resolved when compositing.
    #[default]
    Pinpoint,
    /// Row 0 is always the newest, every other row copies the one above it from the previous
    /// frame. Costs a full history copy per frame.
    Shift,
}

/// Update kernel for one texel, pinpoint-row variant.
#[inline]
pub fn pinpoint_texel(
    previous: &HistoryBuffer,
    spectrum: &[f32],
    params: &ScaleParameters,
    write_row: usize,
    x: usize,
    y: usize,
) -> f32 {
    if y == write_row {
        params.scale(spectrum[source_bin(x, spectrum.len())])
    } else {
        previous.texel(x, y)
    }
}

/// Update kernel for one texel, shift-and-insert variant.
#[inline]
pub fn shift_texel(
    previous: &HistoryBuffer,
    spectrum: &[f32],
    params: &ScaleParameters,
    x: usize,
    y: usize,
) -> f32 {
    if y == 0 {
        params.scale(spectrum[source_bin(x, spectrum.len())])
    } else {
        previous.texel(x, y - 1)
    }
}

/// Two history surfaces swapped every frame and filled texel by texel, the same way the
/// update render pass fills its target. Reads only ever touch the previous frame's surface.
#[derive(Debug, Clone)]
pub struct PingPongHistory {
    strategy: UpdateStrategy,
    front: HistoryBuffer,
    back: HistoryBuffer,
}

impl PingPongHistory {
    pub fn new(rows: usize, bins: usize, strategy: UpdateStrategy) -> Result<Self> {
        Ok(Self {
            strategy,
            front: HistoryBuffer::new(rows, bins)?,
            back: HistoryBuffer::new(rows, bins)?,
        })
    }

    /// Surface holding the result of the last update.
    pub fn current(&self) -> &HistoryBuffer {
        &self.front
    }

    #[instrument(skip(self, spectrum))]
    pub fn update(
        &mut self,
        pointer: InsertionPointer,
        spectrum: &[f32],
        params: &ScaleParameters,
    ) -> Result<()> {
        let (rows, bins) = (self.front.rows(), self.front.bins());
        if spectrum.len() != bins {
            return Err(WaterfallError::RowLength {
                expected: bins,
                actual: spectrum.len(),
            });
        }

        let write_row = pointer.row(rows);
        for y in 0..rows {
            for x in 0..bins {
                let value = match self.strategy {
                    UpdateStrategy::Pinpoint => {
                        pinpoint_texel(&self.front, spectrum, params, write_row, x, y)
                    }
                    UpdateStrategy::Shift => shift_texel(&self.front, spectrum, params, x, y),
                };
                self.back.set_texel(x, y, value);
            }
        }
        std::mem::swap(&mut self.front, &mut self.back);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum_for_frame(frame: u64, bins: usize) -> Vec<f32> {
        (0..bins)
            .map(|bin| 1.0 + (frame as usize * bins + bin) as f32)
            .collect()
    }

    #[test]
    fn pinpoint_ping_pong_matches_the_ring() {
        let (rows, bins) = (5, 6);
        let params = ScaleParameters::new(3.0, 0.5);
        let mut ring = HistoryBuffer::new(rows, bins).unwrap();
        let mut ping_pong = PingPongHistory::new(rows, bins, UpdateStrategy::Pinpoint).unwrap();

        for frame in 0..13 {
            let pointer = InsertionPointer::new(frame);
            let spectrum = spectrum_for_frame(frame, bins);
            ring.write_row(pointer, &spectrum, &params).unwrap();
            ping_pong.update(pointer, &spectrum, &params).unwrap();
            assert_eq!(ping_pong.current(), &ring, "frame {frame}");
        }
    }

    #[test]
    fn shift_rows_are_ordered_by_age() {
        let (rows, bins) = (4, 6);
        let params = ScaleParameters::IDENTITY;
        let mut ring = HistoryBuffer::new(rows, bins).unwrap();
        let mut shifted = PingPongHistory::new(rows, bins, UpdateStrategy::Shift).unwrap();

        for frame in 0..10 {
            let pointer = InsertionPointer::new(frame);
            let spectrum = spectrum_for_frame(frame, bins);
            ring.write_row(pointer, &spectrum, &params).unwrap();
            shifted.update(pointer, &spectrum, &params).unwrap();

            for age in 0..rows {
                assert_eq!(
                    shifted.current().row(age),
                    ring.row_at_age(pointer, age).unwrap(),
                    "frame {frame} age {age}"
                );
            }
        }
    }

    #[test]
    fn shift_kernel_inserts_at_the_top() {
        let bins = 4;
        let mut previous = HistoryBuffer::new(3, bins).unwrap();
        previous.row_mut(0).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        let spectrum = [10.0, 1.0, 1.0, 1.0];
        let params = ScaleParameters::IDENTITY;

        assert_eq!(shift_texel(&previous, &spectrum, &params, 2, 0), 10.0);
        assert_eq!(shift_texel(&previous, &spectrum, &params, 0, 0), 0.0);
        assert_eq!(shift_texel(&previous, &spectrum, &params, 3, 1), 4.0);
        assert_eq!(shift_texel(&previous, &spectrum, &params, 3, 2), 0.0);
    }

    #[test]
    fn pinpoint_kernel_only_recomputes_the_write_row() {
        let bins = 4;
        let mut previous = HistoryBuffer::new(3, bins).unwrap();
        previous.set_texel(1, 2, 42.0);
        let spectrum = [1.0; 4];
        let params = ScaleParameters::new(5.0, 1.0);

        assert_eq!(pinpoint_texel(&previous, &spectrum, &params, 1, 1, 1), 5.0);
        assert_eq!(pinpoint_texel(&previous, &spectrum, &params, 1, 1, 2), 42.0);
        assert_eq!(pinpoint_texel(&previous, &spectrum, &params, 1, 1, 0), 0.0);
    }

    #[test]
    fn wrong_row_length_leaves_history_alone() {
        let mut ping_pong = PingPongHistory::new(2, 4, UpdateStrategy::Shift).unwrap();
        let before = ping_pong.current().clone();
        assert!(
            ping_pong
                .update(InsertionPointer::START, &[1.0; 3], &ScaleParameters::IDENTITY)
                .is_err()
        );
        assert_eq!(ping_pong.current(), &before);
    }
}
