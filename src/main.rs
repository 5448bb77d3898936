// Copyright © 2025 Jocelyn Turcotte <turcotte.j@gmail.com>
// SPDX-License-Identifier: MIT

use anyhow::{Context, bail};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};
use tracing_chrome::ChromeLayerBuilder;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, filter};

use waterfall::source::RowReader;
use waterfall::surface::TARGET_FORMAT;
use waterfall::{
    Configuration, HeadlessSurface, Palette, SoftwareWaterfall, UpdateStrategy, Waterfall,
    WaterfallView, WgpuSurface,
};

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    Gpu,
    Cpu,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Stream of little-endian f32 magnitudes, one row of `bins` values per frame. Defaults to stdin.
    #[arg(short = 'i', long = "input")]
    input: Option<PathBuf>,

    /// Write the last frame to this PNG file.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Stop after this many frames.
    #[arg(short = 'n', long = "frames")]
    frames: Option<u64>,

    #[arg(long = "backend", value_enum, default_value_t = Backend::Gpu)]
    backend: Backend,

    #[arg(long = "strategy", value_enum)]
    strategy: Option<UpdateStrategy>,

    #[arg(long = "palette", value_enum)]
    palette: Option<Palette>,

    /// Configuration file to use instead of the one in the user config directory.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Rows to scroll back into history before the last frame.
    #[arg(long = "scroll", default_value_t = 0)]
    scroll: i64,

    /// Run frames at this rate and skip the update when no complete row arrived in time.
    /// Without it every frame waits for its row.
    #[arg(long = "fps")]
    fps: Option<f64>,

    /// Record a frame timing trace that can be viewed at https://ui.perfetto.dev
    #[arg(long = "trace")]
    trace: bool,
}

fn load_configuration(args: &Args) -> anyhow::Result<Configuration> {
    let mut config = match &args.config {
        Some(path) => Configuration::load_from(path)
            .with_context(|| format!("Unable to load configuration {}", path.display()))?,
        None => Configuration::load().context("Unable to load the user configuration")?,
    };

    if let Some(strategy) = args.strategy {
        config.history.strategy = strategy;
        if strategy == UpdateStrategy::Shift && config.history.tiles != 1 {
            info!(
                "The shift strategy keeps a single tile, ignoring history.tiles = {}",
                config.history.tiles
            );
            config.history.tiles = 1;
        }
    }
    if let Some(palette) = args.palette {
        config.display.palette = palette;
    }
    config.validate()?;
    Ok(config)
}

#[instrument(skip(config))]
fn create_waterfall(backend: Backend, config: &Configuration) -> anyhow::Result<Box<dyn Waterfall>> {
    let mut waterfall: Box<dyn Waterfall> = match backend {
        Backend::Gpu => {
            const CPU_HINT: &str = "GPU initialization failed, --backend cpu renders without one";
            let surface = HeadlessSurface::new().context(CPU_HINT)?;
            let format = surface.swapchain_format().unwrap_or(TARGET_FORMAT);
            Box::new(
                WaterfallView::new(surface.device(), surface.queue(), format, config)
                    .context(CPU_HINT)?,
            )
        }
        Backend::Cpu => Box::new(SoftwareWaterfall::new(config)?),
    };
    waterfall.apply_lazy_config_changes(config, None);
    Ok(waterfall)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct FrameCount {
    frames: u64,
    rows: u64,
}

/// Feeds `reader` into `waterfall` one row per frame, until `limit` frames or the end of the stream.
///
/// Paced frames that find no complete row skip the update. Without pacing every frame waits for its row.
#[instrument(skip(waterfall, reader))]
fn run_frames(
    waterfall: &mut dyn Waterfall,
    reader: &mut RowReader,
    limit: Option<u64>,
    frame_interval: Option<Duration>,
) -> anyhow::Result<FrameCount> {
    let mut row = vec![0.0f32; reader.bins()];
    let mut count = FrameCount::default();
    let mut next_frame = Instant::now();

    while limit.is_none_or(|limit| count.frames < limit) {
        let has_row = match frame_interval {
            Some(interval) => {
                std::thread::sleep(next_frame.saturating_duration_since(Instant::now()));
                next_frame += interval;
                let has_row = reader.pop_row(&mut row)?;
                if !has_row && reader.is_finished() {
                    break;
                }
                has_row
            }
            None => {
                if !reader.wait_row(&mut row)? {
                    break;
                }
                true
            }
        };

        if has_row {
            waterfall.push_row(Some(&row))?;
            count.rows += 1;
        } else {
            debug!("No complete row for frame {}", count.frames);
            waterfall.push_row(None)?;
        }
        count.frames += 1;
    }
    Ok(count)
}

fn init_tracing(trace: bool) -> Option<tracing_chrome::FlushGuard> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    if trace {
        let (chrome_layer, guard) = ChromeLayerBuilder::new().include_args(true).build();
        tracing_subscriber::registry()
            .with(fmt_layer)
            .with(chrome_layer.with_filter(filter::filter_fn(|metadata| {
                metadata
                    .module_path()
                    .iter()
                    .all(|path| !path.starts_with("naga") && !path.starts_with("wgpu"))
            })))
            .init();
        Some(guard)
    } else {
        tracing_subscriber::registry().with(fmt_layer).init();
        None
    }
}

pub fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _tracing_guard = init_tracing(args.trace);

    if args.fps.is_some_and(|fps| !(fps > 0.0)) {
        bail!("--fps must be positive");
    }

    let config = load_configuration(&args)?;
    let bins = config.history.bins as usize;
    info!(
        "{} bins, {} rows per tile, {} tiles, {:?} strategy, {:?} backend",
        bins, config.history.tile_rows, config.history.tiles, config.history.strategy, args.backend
    );

    let mut waterfall = create_waterfall(args.backend, &config)?;
    let mut reader =
        RowReader::open(args.input.as_deref(), bins).context("Unable to open input")?;

    let frame_interval = args.fps.map(|fps| Duration::from_secs_f64(1.0 / fps));
    let count = run_frames(waterfall.as_mut(), &mut reader, args.frames, frame_interval)?;
    info!("Rendered {} frames from {} rows", count.frames, count.rows);

    if args.scroll != 0 {
        waterfall.scroll(args.scroll);
        info!("Scrolled back {} rows", waterfall.scroll_position());
    }

    if let Some(output) = &args.output {
        let last_frame = waterfall.frame()?;
        last_frame
            .save_with_format(output, image::ImageFormat::Png)
            .with_context(|| format!("Unable to write {}", output.display()))?;
        info!("Wrote {}", output.display());
    }
    Ok(())
}
