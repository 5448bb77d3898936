// Copyright © 2025 Jocelyn Turcotte <turcotte.j@gmail.com>
// SPDX-License-Identifier: MIT

//! Scrolling spectrum waterfall.
//!
//! Rows of raw magnitudes are scaled to decibels, stored in a ring of history rows that
//! never move once written, and composited through a colormap into one image per frame.
//! The same pipeline runs on the GPU ([`WaterfallView`]) and on the CPU ([`SoftwareWaterfall`]).

pub mod colormap;
pub mod compositor;
pub mod config;
pub mod error;
pub mod history;
pub mod scale;
pub mod source;
pub mod strategy;
pub mod surface;
pub mod view;

pub use colormap::{Colormap, Palette};
pub use config::Configuration;
pub use error::{Result, WaterfallError};
pub use history::{HistoryBuffer, InsertionPointer};
pub use scale::{PowerRange, ScaleParameters};
pub use strategy::UpdateStrategy;
pub use surface::{HeadlessSurface, WgpuSurface};
pub use view::{SoftwareWaterfall, Waterfall, WaterfallView};
