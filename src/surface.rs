// Copyright © 2025 Jocelyn Turcotte <turcotte.j@gmail.com>
// SPDX-License-Identifier: MIT

use image::RgbaImage;
use std::sync::Arc;
use std::sync::mpsc::{self, TryRecvError};
use tracing::{info, instrument};

use crate::error::{Result, WaterfallError};

/// Format of frames rendered offscreen. Matches the bytes of the colormap table.
pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Single channel history surfaces, written by the update pass and read by both passes.
pub const HISTORY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
pub const HISTORY_USAGES: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT
    .union(wgpu::TextureUsages::TEXTURE_BINDING);

/// Downlevel adapters, GLES ones in particular, can't always render into [`HISTORY_FORMAT`].
pub fn check_history_format(features: &wgpu::TextureFormatFeatures) -> Result<()> {
    if features.allowed_usages.contains(HISTORY_USAGES) {
        Ok(())
    } else {
        Err(WaterfallError::UnsupportedFormat {
            format: HISTORY_FORMAT,
            allowed: features.allowed_usages,
        })
    }
}

pub trait WgpuSurface {
    fn device(&self) -> &wgpu::Device;
    fn queue(&self) -> &Arc<wgpu::Queue>;
    fn swapchain_format(&self) -> Option<wgpu::TextureFormat>;
}

/// Device without any window, rendering into textures that are read back on the CPU.
pub struct HeadlessSurface {
    device: wgpu::Device,
    queue: Arc<wgpu::Queue>,
}

impl WgpuSurface for HeadlessSurface {
    fn device(&self) -> &wgpu::Device {
        &self.device
    }

    fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    fn swapchain_format(&self) -> Option<wgpu::TextureFormat> {
        Some(TARGET_FORMAT)
    }
}

impl HeadlessSurface {
    #[instrument]
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            ..Default::default()
        }))?;
        let adapter_info = adapter.get_info();
        info!(
            "Using adapter {} ({:?})",
            adapter_info.name, adapter_info.backend
        );
        check_history_format(&adapter.get_texture_format_features(HISTORY_FORMAT))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("waterfall"),
            required_limits: adapter.limits(),
            ..Default::default()
        }))?;

        Ok(Self {
            device,
            queue: Arc::new(queue),
        })
    }
}

/// Copies an RGBA8 texture into an image, waiting for the GPU to finish.
#[instrument(skip(device, queue, texture))]
pub fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
) -> Result<RgbaImage> {
    let (width, height) = (texture.width(), texture.height());
    let unpadded_bytes_per_row = width * 4;
    let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
        * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Buffer"),
        size: padded_bytes_per_row as u64 * height as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(Some(encoder.finish()));

    let slice = buffer.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    loop {
        device
            .poll(wgpu::PollType::Poll)
            .map_err(|e| WaterfallError::Readback(e.to_string()))?;
        match rx.try_recv() {
            Ok(result) => {
                result.map_err(|e| WaterfallError::Readback(e.to_string()))?;
                break;
            }
            Err(TryRecvError::Empty) => std::thread::yield_now(),
            Err(TryRecvError::Disconnected) => {
                return Err(WaterfallError::Readback(
                    "buffer mapping was dropped".into(),
                ));
            }
        }
    }

    let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
    {
        let data = slice.get_mapped_range();
        for row in data.chunks_exact(padded_bytes_per_row as usize) {
            pixels.extend_from_slice(&row[..unpadded_bytes_per_row as usize]);
        }
    }
    buffer.unmap();

    RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| WaterfallError::Readback("readback size mismatch".into()))
}
