// Copyright © 2025 Jocelyn Turcotte <turcotte.j@gmail.com>
// SPDX-License-Identifier: MIT

use image::RgbaImage;
use tracing::instrument;

use crate::colormap::Colormap;
use crate::error::{Result, WaterfallError};
use crate::history::{HistoryBuffer, InsertionPointer};
use crate::strategy::UpdateStrategy;

/// Which of the two stitched surfaces backs a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeamBuffer {
    /// Surface holding the newest rows (buffer-0).
    Newer,
    /// Surface right before it in the ring (buffer-1).
    Older,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeamRead {
    pub buffer: SeamBuffer,
    pub row: u32,
}

/// Resolves the logical row `y` (0 is the newest, older rows are negative) through `offset`.
///
/// `y + offset >= 0` reads the newer surface at that row, anything below reads the older
/// surface, wrapped by the surface height like a repeating texture address.
#[inline]
pub fn resolve_seam(y: i32, offset: i32, rows: u32) -> SeamRead {
    let candidate = y + offset;
    let buffer = if candidate >= 0 {
        SeamBuffer::Newer
    } else {
        SeamBuffer::Older
    };
    SeamRead {
        buffer,
        row: candidate.rem_euclid(rows as i32) as u32,
    }
}

/// How the history ring is split into surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLayout {
    pub tiles: usize,
    pub tile_rows: usize,
}

impl TileLayout {
    pub fn new(tiles: usize, tile_rows: usize) -> Result<Self> {
        if tiles == 0 || tile_rows == 0 {
            return Err(WaterfallError::InvalidConfig(format!(
                "{tiles} tiles of {tile_rows} rows hold no history"
            )));
        }
        Ok(Self { tiles, tile_rows })
    }

    pub fn total_rows(&self) -> usize {
        self.tiles * self.tile_rows
    }

    /// Furthest the view can be scrolled back while still showing a full tile of history.
    pub fn max_scroll(&self) -> usize {
        (self.tiles - 1) * self.tile_rows
    }

    /// Tile and row within the tile that back a ring row.
    pub fn locate(&self, ring_row: usize) -> (usize, usize) {
        let ring_row = ring_row % self.total_rows();
        (ring_row / self.tile_rows, ring_row % self.tile_rows)
    }

    /// Surfaces and seam offset for a frame whose newest row is `newest`, scrolled back by `scroll` rows.
    pub fn composite_address(&self, newest: InsertionPointer, scroll: usize) -> CompositeAddress {
        let total = self.total_rows();
        let top = (newest.row(total) + total - scroll % total) % total;
        let (newer_tile, offset) = self.locate(top);
        CompositeAddress {
            newer_tile,
            older_tile: (newer_tile + self.tiles - 1) % self.tiles,
            offset: offset as u32,
        }
    }
}

/// Per-frame addressing uniform for the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeAddress {
    pub newer_tile: usize,
    pub older_tile: usize,
    pub offset: u32,
}

/// View position within the history, in rows back from the newest one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scrollback {
    position: usize,
}

impl Scrollback {
    pub fn position(&self) -> usize {
        self.position
    }

    /// Whether new rows appear at the top as they arrive.
    pub fn is_live(&self) -> bool {
        self.position == 0
    }

    /// Positive `delta` scrolls back in time.
    pub fn scroll(&mut self, delta: i64, max: usize) {
        self.position = (self.position as i64)
            .saturating_add(delta)
            .clamp(0, max as i64) as usize;
    }

    /// Keeps a scrolled-back view on the same rows when a new row is written.
    pub fn row_written(&mut self, max: usize) {
        if !self.is_live() && self.position < max {
            self.position += 1;
        }
    }
}

/// Column and age displayed at output pixel (`px`, `py`). Integer math shared with the shader.
#[inline]
pub fn pixel_source(
    px: u32,
    py: u32,
    resolution: (u32, u32),
    bins: u32,
    rows: u32,
) -> (u32, u32) {
    let column = ((px as u64 * bins as u64) / resolution.0 as u64).min(bins as u64 - 1) as u32;
    let age = ((py as u64 * rows as u64) / resolution.1 as u64).min(rows as u64 - 1) as u32;
    (column, age)
}

/// Everything the compositor needs to know about the current frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameParams {
    pub resolution: (u32, u32),
    pub newest: InsertionPointer,
    pub scroll: usize,
}

/// CPU equivalent of the colormap pass: one independent evaluation per output pixel.
#[derive(Debug, Clone, Default)]
pub struct Compositor {
    colormap: Colormap,
}

impl Compositor {
    pub fn new(colormap: Colormap) -> Self {
        Self { colormap }
    }

    pub fn colormap(&self) -> &Colormap {
        &self.colormap
    }

    pub fn set_colormap(&mut self, colormap: Colormap) {
        self.colormap = colormap;
    }

    /// Stored intensity displayed at output pixel (`px`, `py`).
    ///
    /// With [`UpdateStrategy::Pinpoint`] `history` is the whole ring and is read through the
    /// tile layout and the seam. With [`UpdateStrategy::Shift`] row N of `history` already holds
    /// the row of age N.
    pub fn intensity_at(
        &self,
        history: &HistoryBuffer,
        strategy: UpdateStrategy,
        layout: TileLayout,
        frame: &FrameParams,
        px: u32,
        py: u32,
    ) -> f32 {
        let (column, age) = pixel_source(
            px,
            py,
            frame.resolution,
            history.bins() as u32,
            layout.tile_rows as u32,
        );
        match strategy {
            UpdateStrategy::Shift => history.texel(column as usize, age as usize),
            UpdateStrategy::Pinpoint => {
                let address = layout.composite_address(frame.newest, frame.scroll);
                let read = resolve_seam(-(age as i32), address.offset as i32, layout.tile_rows as u32);
                let tile = match read.buffer {
                    SeamBuffer::Newer => address.newer_tile,
                    SeamBuffer::Older => address.older_tile,
                };
                history.texel(column as usize, tile * layout.tile_rows + read.row as usize)
            }
        }
    }

    #[instrument(skip(self, history))]
    pub fn render(
        &self,
        history: &HistoryBuffer,
        strategy: UpdateStrategy,
        layout: TileLayout,
        frame: &FrameParams,
    ) -> RgbaImage {
        let (width, height) = frame.resolution;
        RgbaImage::from_fn(width, height, |px, py| {
            let value = self.intensity_at(history, strategy, layout, frame, px, py);
            image::Rgba(self.colormap.map(value))
        })
    }
}
