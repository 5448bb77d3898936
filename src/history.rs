// Copyright © 2025 Jocelyn Turcotte <turcotte.j@gmail.com>
// SPDX-License-Identifier: MIT

use crate::error::{Result, WaterfallError};
use crate::scale::ScaleParameters;

/// Frame counter selecting the history row written on a given frame.
///
/// It is passed to the updater and the compositor for every frame rather than
/// kept inside the history, so both stay pure functions of their inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InsertionPointer(u64);

impl InsertionPointer {
    pub const START: InsertionPointer = InsertionPointer(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Physical row index in a ring of `rows` rows.
    #[inline]
    pub fn row(self, rows: usize) -> usize {
        (self.0 % rows as u64) as usize
    }
}

/// Bin read into `column` by the half-buffer rotation, which moves zero frequency to the center.
#[inline]
pub fn source_bin(column: usize, bins: usize) -> usize {
    (column + bins / 2) % bins
}

/// Rotates a spectrum by half its length and scales every sample into `out`.
pub fn scale_rotated_row(spectrum: &[f32], params: &ScaleParameters, out: &mut [f32]) -> Result<()> {
    if spectrum.len() != out.len() {
        return Err(WaterfallError::RowLength {
            expected: out.len(),
            actual: spectrum.len(),
        });
    }
    let half = spectrum.len() / 2;
    let rotated = spectrum[half..].iter().chain(&spectrum[..half]);
    for (dst, &magnitude) in out.iter_mut().zip(rotated) {
        *dst = params.scale(magnitude);
    }
    Ok(())
}

/// Ring of scaled rows, `rows` × `bins`, stored row-major like a single-channel texture.
///
/// Writing a row never moves the others. Row ages are only resolved when reading,
/// relative to the pointer of the newest row.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBuffer {
    rows: usize,
    bins: usize,
    data: Vec<f32>,
}

impl HistoryBuffer {
    pub fn new(rows: usize, bins: usize) -> Result<Self> {
        if rows == 0 || bins == 0 {
            return Err(WaterfallError::InvalidConfig(format!(
                "history of {rows} rows of {bins} bins has no texel"
            )));
        }
        Ok(Self {
            rows,
            bins,
            data: vec![0.0; rows * bins],
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.bins..(index + 1) * self.bins]
    }

    pub fn row_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.data[index * self.bins..(index + 1) * self.bins]
    }

    #[inline]
    pub fn texel(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.bins + x]
    }

    #[inline]
    pub fn set_texel(&mut self, x: usize, y: usize, value: f32) {
        self.data[y * self.bins + x] = value;
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Writes the rotated and scaled `spectrum` at the row selected by `pointer`.
    /// No other row is touched.
    pub fn write_row(
        &mut self,
        pointer: InsertionPointer,
        spectrum: &[f32],
        params: &ScaleParameters,
    ) -> Result<()> {
        let row = pointer.row(self.rows);
        scale_rotated_row(spectrum, params, self.row_mut(row))
    }

    /// Row written `age` frames before `newest`. Rows older than the ring capacity have been
    /// overwritten and are not returned.
    pub fn row_at_age(&self, newest: InsertionPointer, age: usize) -> Option<&[f32]> {
        if age >= self.rows {
            return None;
        }
        // Rows older than the first frame still hold their initial zeros.
        let index = (newest.row(self.rows) + self.rows - age) % self.rows;
        Some(self.row(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn marker_row(bins: usize, marker: f32) -> Vec<f32> {
        vec![marker; bins]
    }

    /// Column where `bin` ends up after the rotation.
    fn column_of_bin(bin: usize, bins: usize) -> usize {
        (bin + bins - bins / 2) % bins
    }

    #[test]
    fn rotation_places_bins_around_the_center() {
        let bins = 16;
        // Unique strictly positive marker per bin
        let spectrum: Vec<f32> = (0..bins).map(|i| (i + 1) as f32).collect();
        let mut out = vec![0.0; bins];
        scale_rotated_row(&spectrum, &ScaleParameters::IDENTITY, &mut out).unwrap();

        for bin in [0, bins / 2 - 1, bins / 2, bins - 1] {
            let column = (bin + bins - bins / 2) % bins;
            assert_eq!(column_of_bin(bin, bins), column);
            assert_eq!(out[column], ScaleParameters::IDENTITY.scale(spectrum[bin]));
        }
        assert_eq!(column_of_bin(0, bins), bins / 2);
        assert_eq!(column_of_bin(bins / 2, bins), 0);
    }

    #[test]
    fn source_bin_inverts_column_of_bin() {
        for bins in [2, 3, 8, 2048] {
            for bin in 0..bins {
                assert_eq!(source_bin(column_of_bin(bin, bins), bins), bin);
            }
        }
    }

    #[test]
    fn empty_history_is_refused() {
        assert!(matches!(
            HistoryBuffer::new(0, 8),
            Err(WaterfallError::InvalidConfig(_))
        ));
        assert!(matches!(
            HistoryBuffer::new(4, 0),
            Err(WaterfallError::InvalidConfig(_))
        ));
    }

    #[test]
    fn mismatched_row_length_is_rejected() {
        let mut history = HistoryBuffer::new(4, 8).unwrap();
        let err = history
            .write_row(InsertionPointer::START, &[1.0; 7], &ScaleParameters::IDENTITY)
            .unwrap_err();
        assert!(matches!(
            err,
            WaterfallError::RowLength {
                expected: 8,
                actual: 7
            }
        ));
    }

    #[test]
    fn writing_a_row_leaves_the_others_untouched() {
        let (rows, bins) = (6, 8);
        let mut history = HistoryBuffer::new(rows, bins).unwrap();
        let params = ScaleParameters::IDENTITY;

        for frame in 0..rows {
            history
                .write_row(
                    InsertionPointer::new(frame as u64),
                    &marker_row(bins, 10f32.powi(frame as i32)),
                    &params,
                )
                .unwrap();
        }

        // Row f holds 10^f, i.e. 10 * f dB, independently of every other row.
        for frame in 0..rows {
            let expected = params.scale(10f32.powi(frame as i32));
            assert!(history.row(frame).iter().all(|&v| v == expected));
        }

        // Overwriting row 2 only changes row 2
        let before = history.clone();
        history
            .write_row(InsertionPointer::new(2 + rows as u64), &marker_row(bins, 0.5), &params)
            .unwrap();
        for row in (0..rows).filter(|&r| r != 2) {
            assert_eq!(history.row(row), before.row(row));
        }
        assert_ne!(history.row(2), before.row(2));
    }

    #[test]
    fn ages_wrap_around_the_ring() {
        let mut history = HistoryBuffer::new(3, 2).unwrap();
        let params = ScaleParameters::IDENTITY;
        for frame in 0..5u64 {
            history
                .write_row(
                    InsertionPointer::new(frame),
                    &marker_row(2, 10f32.powi(frame as i32)),
                    &params,
                )
                .unwrap();
        }
        let newest = InsertionPointer::new(4);
        assert_eq!(history.row_at_age(newest, 0).unwrap()[0], params.scale(1e4));
        assert_eq!(history.row_at_age(newest, 1).unwrap()[0], params.scale(1e3));
        assert_eq!(history.row_at_age(newest, 2).unwrap()[0], params.scale(1e2));
        assert!(history.row_at_age(newest, 3).is_none());
    }

    proptest! {
        #[test]
        fn row_is_readable_at_its_age_until_overwritten(
            rows in 1usize..12,
            first in 0u64..1000,
            written in 0usize..30,
        ) {
            let bins = 4;
            let params = ScaleParameters::IDENTITY;
            let mut history = HistoryBuffer::new(rows, bins).unwrap();
            let marker = |f: u64| 1.0 + (f % 97) as f32;

            let mut pointer = InsertionPointer::new(first);
            history.write_row(pointer, &marker_row(bins, marker(first)), &params).unwrap();
            let expected = params.scale(marker(first));
            prop_assert_eq!(history.row_at_age(pointer, 0).unwrap()[0], expected);

            for k in 1..=written {
                pointer = pointer.next();
                history.write_row(pointer, &marker_row(bins, 1e6), &params).unwrap();
                match history.row_at_age(pointer, k) {
                    Some(row) => {
                        prop_assert!(k < rows);
                        prop_assert!(row.iter().all(|&v| v == expected));
                    }
                    None => prop_assert!(k >= rows),
                }
            }
        }

        #[test]
        fn rotation_is_a_permutation(half in 1usize..64, bin_seed in any::<usize>()) {
            let bins = half * 2;
            let bin = bin_seed % bins;
            let column = column_of_bin(bin, bins);
            prop_assert_eq!(column, (bin + bins - bins / 2) % bins);
            prop_assert_eq!(source_bin(column, bins), bin);
        }
    }
}
