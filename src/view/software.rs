// Copyright © 2025 Jocelyn Turcotte <turcotte.j@gmail.com>
// SPDX-License-Identifier: MIT

use image::RgbaImage;
use tracing::instrument;

use crate::colormap::{Colormap, Palette};
use crate::compositor::Compositor;
use crate::config::Configuration;
use crate::error::Result;
use crate::history::HistoryBuffer;
use crate::scale::PowerRange;
use crate::strategy::{PingPongHistory, UpdateStrategy};

use super::{Waterfall, WaterfallState};

#[derive(Debug)]
enum SoftwareHistory {
    /// The whole `tiles × tile_rows` ring, written in place.
    Ring(HistoryBuffer),
    /// A single surface kept in age order.
    Shifted(PingPongHistory),
}

/// Waterfall rendered entirely on the CPU. Produces the same pixels as [`super::WaterfallView`].
#[derive(Debug)]
pub struct SoftwareWaterfall {
    state: WaterfallState,
    history: SoftwareHistory,
    compositor: Compositor,
}

impl SoftwareWaterfall {
    #[instrument(skip(config))]
    pub fn new(config: &Configuration) -> Result<Self> {
        let state = WaterfallState::new(config)?;
        let layout = state.layout();
        let history = match state.strategy() {
            UpdateStrategy::Pinpoint => {
                SoftwareHistory::Ring(HistoryBuffer::new(layout.total_rows(), state.bins())?)
            }
            UpdateStrategy::Shift => SoftwareHistory::Shifted(PingPongHistory::new(
                layout.tile_rows,
                state.bins(),
                UpdateStrategy::Shift,
            )?),
        };
        Ok(Self {
            state,
            history,
            compositor: Compositor::new(Colormap::new(config.display.palette)),
        })
    }

    /// Stored intensities, row-major. With the pinpoint strategy this is the whole ring.
    pub fn history(&self) -> &HistoryBuffer {
        match &self.history {
            SoftwareHistory::Ring(ring) => ring,
            SoftwareHistory::Shifted(ping_pong) => ping_pong.current(),
        }
    }

    pub fn colormap(&self) -> &Colormap {
        self.compositor.colormap()
    }
}

impl Waterfall for SoftwareWaterfall {
    fn set_power_range(&mut self, power: PowerRange) {
        self.state.set_power_range(power);
    }

    fn set_palette(&mut self, palette: Palette) {
        if self.compositor.colormap().palette() != palette {
            self.compositor.set_colormap(Colormap::new(palette));
        }
    }

    fn set_resolution(&mut self, width: u32, height: u32) {
        self.state.set_resolution(width, height);
    }

    #[instrument(skip(self, row))]
    fn push_row(&mut self, row: Option<&[f32]>) -> Result<()> {
        let Some(row) = row else {
            return Ok(());
        };
        self.state.check_row(row)?;
        let pointer = self.state.advance();
        let scale = *self.state.scale();
        match &mut self.history {
            SoftwareHistory::Ring(ring) => ring.write_row(pointer, row, &scale),
            SoftwareHistory::Shifted(ping_pong) => ping_pong.update(pointer, row, &scale),
        }
    }

    fn scroll(&mut self, delta: i64) {
        self.state.scroll(delta);
    }

    fn scroll_position(&self) -> usize {
        self.state.scroll_position()
    }

    #[instrument(skip(self))]
    fn frame(&mut self) -> Result<RgbaImage> {
        Ok(self.compositor.render(
            self.history(),
            self.state.strategy(),
            self.state.layout(),
            &self.state.frame_params(),
        ))
    }
}
