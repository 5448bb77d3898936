// Copyright © 2025 Jocelyn Turcotte <turcotte.j@gmail.com>
// SPDX-License-Identifier: MIT

use image::RgbaImage;
use std::{borrow::Cow, sync::Arc};
use tracing::instrument;
use wgpu::util::DeviceExt;
use wgpu::{BufferUsages, CommandEncoder, TextureView};

use crate::colormap::{Colormap, LUT_SIZE, Palette};
use crate::config::Configuration;
use crate::error::{Result, WaterfallError};
use crate::scale::PowerRange;
use crate::strategy::UpdateStrategy;
use crate::surface::{HISTORY_FORMAT, HISTORY_USAGES, TARGET_FORMAT, read_texture};

use super::{Waterfall, WaterfallState};

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct UpdateParamsUniform {
    scale_add: f32,
    scale_mult: f32,
    bins: u32,
    write_row: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct CompositeParamsUniform {
    resolution: [f32; 2],
    offset: i32,
    rows: u32,
    bins: u32,
    direct: u32,
    _padding: [u32; 2],
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn buffer_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn fullscreen_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    shader: &wgpu::ShaderModule,
    fragment_entry_point: &str,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_fullscreen"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some(fragment_entry_point),
            compilation_options: Default::default(),
            targets: &[Some(format.into())],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

/// GPU waterfall. History lives in R32Float textures, one per tile plus a scratch one,
/// and every frame is composited through the colormap into the target.
pub struct WaterfallView {
    state: WaterfallState,
    device: wgpu::Device,
    wgpu_queue: Arc<wgpu::Queue>,
    target_format: wgpu::TextureFormat,
    palette: Palette,
    samples_buffer: wgpu::Buffer,
    update_params_buffer: wgpu::Buffer,
    composite_params_buffer: wgpu::Buffer,
    lut_buffer: wgpu::Buffer,
    history_views: Vec<TextureView>,
    /// Texture index backing each tile. The one index missing from this list is the scratch.
    tile_textures: Vec<usize>,
    scratch_texture: usize,
    /// Update bind groups, indexed by the texture they read from.
    update_bind_groups: Vec<wgpu::BindGroup>,
    update_render_pipeline: wgpu::RenderPipeline,
    composite_bind_group_layout: wgpu::BindGroupLayout,
    composite_render_pipeline: wgpu::RenderPipeline,
    offscreen_target: Option<wgpu::Texture>,
}

impl WaterfallView {
    #[instrument(skip(device, queue, config))]
    pub fn new(
        device: &wgpu::Device,
        queue: &Arc<wgpu::Queue>,
        target_format: wgpu::TextureFormat,
        config: &Configuration,
    ) -> Result<WaterfallView> {
        let state = WaterfallState::new(config)?;
        let layout = state.layout();
        let bins = state.bins() as u32;
        let tile_rows = layout.tile_rows as u32;

        let limit = device.limits().max_texture_dimension_2d;
        if bins > limit || tile_rows > limit {
            return Err(WaterfallError::InvalidConfig(format!(
                "history of {bins}x{tile_rows} texels exceeds the device texture limit of {limit}"
            )));
        }

        // Rejected resources, like a history format the adapter can't render to, become an Err.
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let update_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Update Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("update.wgsl"))),
        });
        let composite_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Composite Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("composite.wgsl"))),
        });

        let samples_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Samples Buffer"),
            size: (bins as usize * std::mem::size_of::<f32>()) as wgpu::BufferAddress,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let update_params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Update Params Buffer"),
            size: std::mem::size_of::<UpdateParamsUniform>() as wgpu::BufferAddress,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let composite_params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Composite Params Buffer"),
            size: std::mem::size_of::<CompositeParamsUniform>() as wgpu::BufferAddress,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let colormap = Colormap::new(config.display.palette);
        let lut_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Colormap Buffer"),
            contents: bytemuck::cast_slice(&colormap.lut_normalized()),
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
        });

        // Zero-initialized, an empty history reads as intensity 0.
        let history_views: Vec<TextureView> = (0..=layout.tiles)
            .map(|i| {
                device
                    .create_texture(&wgpu::TextureDescriptor {
                        label: Some(&format!("History Texture {i}")),
                        size: wgpu::Extent3d {
                            width: bins,
                            height: tile_rows,
                            depth_or_array_layers: 1,
                        },
                        mip_level_count: 1,
                        sample_count: 1,
                        dimension: wgpu::TextureDimension::D2,
                        format: HISTORY_FORMAT,
                        usage: HISTORY_USAGES,
                        view_formats: &[],
                    })
                    .create_view(&wgpu::TextureViewDescriptor::default())
            })
            .collect();

        let update_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                entries: &[
                    buffer_entry(0, wgpu::BufferBindingType::Uniform),
                    buffer_entry(1, wgpu::BufferBindingType::Storage { read_only: true }),
                    texture_entry(2),
                ],
                label: Some("Update Bind Group Layout"),
            });

        let update_bind_groups = history_views
            .iter()
            .map(|previous| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    layout: &update_bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: update_params_buffer.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: samples_buffer.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::TextureView(previous),
                        },
                    ],
                    label: Some("Update Bind Group"),
                })
            })
            .collect();

        let composite_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                entries: &[
                    buffer_entry(0, wgpu::BufferBindingType::Uniform),
                    buffer_entry(1, wgpu::BufferBindingType::Storage { read_only: true }),
                    texture_entry(2),
                    texture_entry(3),
                ],
                label: Some("Composite Bind Group Layout"),
            });

        let update_entry_point = match state.strategy() {
            UpdateStrategy::Pinpoint => "fs_pinpoint",
            UpdateStrategy::Shift => "fs_shift",
        };
        let update_render_pipeline = fullscreen_pipeline(
            device,
            "Update Pipeline",
            &update_bind_group_layout,
            &update_shader,
            update_entry_point,
            HISTORY_FORMAT,
        );
        let composite_render_pipeline = fullscreen_pipeline(
            device,
            "Composite Pipeline",
            &composite_bind_group_layout,
            &composite_shader,
            "fs_colormap",
            target_format,
        );

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(WaterfallError::Gpu(error.to_string()));
        }

        Ok(WaterfallView {
            tile_textures: (0..layout.tiles).collect(),
            scratch_texture: layout.tiles,
            state,
            device: device.clone(),
            wgpu_queue: queue.clone(),
            target_format,
            palette: config.display.palette,
            samples_buffer,
            update_params_buffer,
            composite_params_buffer,
            lut_buffer,
            history_views,
            update_bind_groups,
            update_render_pipeline,
            composite_bind_group_layout,
            composite_render_pipeline,
            offscreen_target: None,
        })
    }

    /// Uploads this frame's row and runs the update pass. `None` skips the update entirely.
    #[instrument(skip(self, row))]
    pub fn process_row(&mut self, row: Option<&[f32]>) -> Result<()> {
        let Some(row) = row else {
            return Ok(());
        };
        self.state.check_row(row)?;
        let pointer = self.state.advance();
        let layout = self.state.layout();
        let (tile, write_row) = layout.locate(pointer.row(layout.total_rows()));

        let scale = self.state.scale();
        let params = UpdateParamsUniform {
            scale_add: scale.additive_offset,
            scale_mult: scale.multiplicative_scale,
            bins: self.state.bins() as u32,
            write_row: write_row as u32,
        };
        self.wgpu_queue
            .write_buffer(&self.samples_buffer, 0, bytemuck::cast_slice(row));
        self.wgpu_queue
            .write_buffer(&self.update_params_buffer, 0, bytemuck::cast_slice(&[params]));

        let source = self.tile_textures[tile];
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Update Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Update Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.history_views[self.scratch_texture],
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(&self.update_render_pipeline);
            render_pass.set_bind_group(0, &self.update_bind_groups[source], &[]);
            render_pass.draw(0..3, 0..1);
        }
        self.wgpu_queue.submit(Some(encoder.finish()));

        // The freshly written texture now backs the tile, its previous content becomes scratch.
        self.tile_textures[tile] = self.scratch_texture;
        self.scratch_texture = source;
        Ok(())
    }

    /// Composites the history into `view`.
    #[instrument(skip(self, encoder, view))]
    pub fn render(
        &self,
        encoder: &mut CommandEncoder,
        view: &TextureView,
        clear_color: Option<wgpu::Color>,
    ) {
        let layout = self.state.layout();
        let frame = self.state.frame_params();
        let address = layout.composite_address(frame.newest, frame.scroll);
        let direct = self.state.strategy() == UpdateStrategy::Shift;

        let params = CompositeParamsUniform {
            resolution: [frame.resolution.0 as f32, frame.resolution.1 as f32],
            offset: address.offset as i32,
            rows: layout.tile_rows as u32,
            bins: self.state.bins() as u32,
            direct: direct as u32,
            _padding: [0; 2],
        };
        self.wgpu_queue.write_buffer(
            &self.composite_params_buffer,
            0,
            bytemuck::cast_slice(&[params]),
        );

        let (newer, older) = if direct {
            (self.tile_textures[0], self.tile_textures[0])
        } else {
            (
                self.tile_textures[address.newer_tile],
                self.tile_textures[address.older_tile],
            )
        };
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.composite_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.composite_params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.lut_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&self.history_views[newer]),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&self.history_views[older]),
                },
            ],
            label: Some("Composite Bind Group"),
        });

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Composite Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: clear_color
                        .map(wgpu::LoadOp::Clear)
                        .unwrap_or(wgpu::LoadOp::Load),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        render_pass.set_pipeline(&self.composite_render_pipeline);
        render_pass.set_bind_group(0, &bind_group, &[]);
        render_pass.draw(0..3, 0..1);
    }

    fn offscreen_target(&mut self) -> &wgpu::Texture {
        let (width, height) = self.state.resolution();
        let device = &self.device;
        let target = self.offscreen_target.take().filter(|t| t.width() == width && t.height() == height);
        self.offscreen_target.insert(target.unwrap_or_else(|| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Offscreen Target"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TARGET_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            })
        }))
    }
}

impl Waterfall for WaterfallView {
    fn set_power_range(&mut self, power: PowerRange) {
        // Picked up by the next row upload, rows already stored keep their scaling.
        self.state.set_power_range(power);
    }

    fn set_palette(&mut self, palette: Palette) {
        if palette != self.palette {
            let colormap = Colormap::new(palette);
            let lut = colormap.lut_normalized();
            debug_assert_eq!(lut.len(), LUT_SIZE);
            self.wgpu_queue
                .write_buffer(&self.lut_buffer, 0, bytemuck::cast_slice(&lut));
            self.palette = palette;
        }
    }

    fn set_resolution(&mut self, width: u32, height: u32) {
        self.state.set_resolution(width, height);
    }

    fn push_row(&mut self, row: Option<&[f32]>) -> Result<()> {
        self.process_row(row)
    }

    fn scroll(&mut self, delta: i64) {
        self.state.scroll(delta);
    }

    fn scroll_position(&self) -> usize {
        self.state.scroll_position()
    }

    #[instrument(skip(self))]
    fn frame(&mut self) -> Result<RgbaImage> {
        if self.target_format != TARGET_FORMAT {
            return Err(WaterfallError::Readback(format!(
                "frames can only be read back from {TARGET_FORMAT:?} views, this one renders {:?}",
                self.target_format
            )));
        }
        let target = self.offscreen_target().clone();
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        self.render(&mut encoder, &target_view, Some(wgpu::Color::BLACK));
        self.wgpu_queue.submit(Some(encoder.finish()));

        read_texture(&self.device, &self.wgpu_queue, &target)
    }
}
