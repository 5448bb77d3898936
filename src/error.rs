// Copyright © 2025 Jocelyn Turcotte <turcotte.j@gmail.com>
// SPDX-License-Identifier: MIT

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WaterfallError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Spectrum row has {actual} bins, expected {expected}")]
    RowLength { expected: usize, actual: usize },

    #[error("No suitable GPU adapter: {0}")]
    NoAdapter(#[from] wgpu::RequestAdapterError),

    #[error("Unable to create GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("GPU cannot render into {format:?} history textures, it allows {allowed:?}")]
    UnsupportedFormat {
        format: wgpu::TextureFormat,
        allowed: wgpu::TextureUsages,
    },

    #[error("GPU rejected the waterfall resources: {0}")]
    Gpu(String),

    #[error("Frame readback failed: {0}")]
    Readback(String),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, WaterfallError>;
