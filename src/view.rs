// Copyright © 2025 Jocelyn Turcotte <turcotte.j@gmail.com>
// SPDX-License-Identifier: MIT

use std::collections::HashSet;

use image::RgbaImage;

use crate::colormap::Palette;
use crate::compositor::{FrameParams, Scrollback, TileLayout};
use crate::config::{
    Configuration, DISPLAY_HEIGHT, DISPLAY_PALETTE, DISPLAY_WIDTH, POWER_MAX, POWER_MIN, POWER_OFFSET,
};
use crate::error::{Result, WaterfallError};
use crate::history::InsertionPointer;
use crate::scale::{PowerRange, ScaleParameters};
use crate::strategy::UpdateStrategy;

mod software;
mod waterfall;

pub use software::SoftwareWaterfall;
pub use waterfall::WaterfallView;

/// Trait of a waterfall renderer, one row of magnitudes in and one colored frame out per frame.
///
/// History dimensions and the update strategy are fixed at creation, everything else
/// can change between frames.
pub trait Waterfall {
    /// Get the current configuration with a list of changes since the last frame.
    /// `config_changes=None` means that the view is new (everything changed).
    fn apply_lazy_config_changes(
        &mut self,
        config: &Configuration,
        config_changes: Option<&HashSet<usize>>,
    ) {
        if config_changes.is_none_or(|c| {
            c.contains(&POWER_OFFSET)
                || c.contains(&POWER_MIN)
                || c.contains(&POWER_MAX)
        }) {
            self.set_power_range(config.power);
        }
        if config_changes.is_none_or(|c| c.contains(&DISPLAY_PALETTE)) {
            self.set_palette(config.display.palette);
        }
        if config_changes.is_none_or(|c| {
            c.contains(&DISPLAY_WIDTH) || c.contains(&DISPLAY_HEIGHT)
        }) {
            self.set_resolution(config.display.width, config.display.height);
        }
    }

    fn set_power_range(&mut self, power: PowerRange);

    fn set_palette(&mut self, palette: Palette);

    fn set_resolution(&mut self, width: u32, height: u32);

    /// Inserts this frame's row. `None` means that no row arrived and the history is kept as is.
    fn push_row(&mut self, row: Option<&[f32]>) -> Result<()>;

    /// Moves the view back in history by `delta` rows, or towards the newest row if negative.
    fn scroll(&mut self, delta: i64);

    fn scroll_position(&self) -> usize;

    /// Composites the current history into an image of the configured resolution.
    fn frame(&mut self) -> Result<RgbaImage>;
}

/// Frame bookkeeping shared by every renderer: insertion pointer, scrollback and scaling.
#[derive(Debug, Clone)]
pub(crate) struct WaterfallState {
    layout: TileLayout,
    strategy: UpdateStrategy,
    bins: usize,
    next: InsertionPointer,
    newest: Option<InsertionPointer>,
    scrollback: Scrollback,
    scale: ScaleParameters,
    resolution: (u32, u32),
}

impl WaterfallState {
    pub fn new(config: &Configuration) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            layout: TileLayout::new(
                config.history.tiles as usize,
                config.history.tile_rows as usize,
            )?,
            strategy: config.history.strategy,
            bins: config.history.bins as usize,
            next: InsertionPointer::START,
            newest: None,
            scrollback: Scrollback::default(),
            scale: config.power.scale_parameters(),
            resolution: (config.display.width, config.display.height),
        })
    }

    pub fn layout(&self) -> TileLayout {
        self.layout
    }

    pub fn strategy(&self) -> UpdateStrategy {
        self.strategy
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn scale(&self) -> &ScaleParameters {
        &self.scale
    }

    pub fn set_power_range(&mut self, power: PowerRange) {
        self.scale = power.scale_parameters();
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    pub fn set_resolution(&mut self, width: u32, height: u32) {
        self.resolution = (width.max(1), height.max(1));
    }

    pub fn max_scroll(&self) -> usize {
        match self.strategy {
            UpdateStrategy::Pinpoint => self.layout.max_scroll(),
            UpdateStrategy::Shift => 0,
        }
    }

    pub fn scroll(&mut self, delta: i64) {
        let max = self.max_scroll();
        self.scrollback.scroll(delta, max);
    }

    pub fn scroll_position(&self) -> usize {
        self.scrollback.position()
    }

    pub fn check_row(&self, row: &[f32]) -> Result<()> {
        if row.len() != self.bins {
            return Err(WaterfallError::RowLength {
                expected: self.bins,
                actual: row.len(),
            });
        }
        Ok(())
    }

    /// Pointer of the row about to be written. Only call once the row is known to be valid.
    pub fn advance(&mut self) -> InsertionPointer {
        let pointer = self.next;
        self.next = pointer.next();
        self.newest = Some(pointer);
        let max = self.max_scroll();
        self.scrollback.row_written(max);
        pointer
    }

    pub fn frame_params(&self) -> FrameParams {
        FrameParams {
            resolution: self.resolution,
            // Nothing written yet, every row still holds zeros.
            newest: self.newest.unwrap_or(InsertionPointer::START),
            scroll: self.scrollback.position(),
        }
    }
}
