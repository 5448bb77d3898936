// Copyright © 2025 Jocelyn Turcotte <turcotte.j@gmail.com>
// SPDX-License-Identifier: MIT

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::{self, Write},
    mem::offset_of,
    path::{Path, PathBuf},
};

use crate::colormap::Palette;
use crate::error::{Result, WaterfallError};
use crate::scale::PowerRange;
use crate::strategy::UpdateStrategy;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Magnitudes per row.
    pub bins: u32,
    /// Rows per history surface, also the number of rows visible at once.
    pub tile_rows: u32,
    pub tiles: u32,
    pub strategy: UpdateStrategy,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub palette: Palette,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub history: HistoryConfig,
    pub power: PowerRange,
    pub display: DisplayConfig,
}

// Change tracking IDs for changes applied lazily before rendering. Use their byte offset within the configuration struct.
pub const POWER_OFFSET: usize = offset_of!(Configuration, power.offset);
pub const POWER_MIN: usize = offset_of!(Configuration, power.min);
pub const POWER_MAX: usize = offset_of!(Configuration, power.max);
pub const DISPLAY_WIDTH: usize = offset_of!(Configuration, display.width);
pub const DISPLAY_HEIGHT: usize = offset_of!(Configuration, display.height);
pub const DISPLAY_PALETTE: usize = offset_of!(Configuration, display.palette);

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            bins: 2048,
            tile_rows: 1024,
            tiles: 8,
            strategy: UpdateStrategy::Pinpoint,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            palette: Palette::Turbo,
        }
    }
}

fn get_config_path() -> Option<PathBuf> {
    let project_dirs = ProjectDirs::from("", "", "waterfall")?;
    Some(project_dirs.config_dir().join("config.toml"))
}

impl Configuration {
    pub fn save(&self) -> Result<()> {
        let config_path = get_config_path().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "Config directory not found")
        })?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        let toml_str = toml::to_string_pretty(self)?;
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(config_path)?;
        file.write_all(toml_str.as_bytes())?;
        Ok(())
    }

    /// Loads the user configuration, or the defaults if there is none yet.
    pub fn load() -> Result<Configuration> {
        match get_config_path() {
            Some(config_path) if config_path.exists() => Self::load_from(&config_path),
            _ => Ok(Configuration::default()),
        }
    }

    pub fn load_from(config_path: &Path) -> Result<Configuration> {
        let toml_str = fs::read_to_string(config_path)?;
        let config: Configuration = toml::from_str(&toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(WaterfallError::InvalidConfig(msg));
        let history = &self.history;
        if history.bins < 2 || history.bins % 2 != 0 {
            return invalid(format!(
                "history.bins must be even and at least 2, got {}",
                history.bins
            ));
        }
        if history.tile_rows == 0 || history.tiles == 0 {
            return invalid("history.tile_rows and history.tiles must be at least 1".into());
        }
        if history.strategy == UpdateStrategy::Shift && history.tiles != 1 {
            return invalid(format!(
                "the shift strategy keeps a single surface, history.tiles must be 1, got {}",
                history.tiles
            ));
        }
        if self.display.width == 0 || self.display.height == 0 {
            return invalid(format!(
                "display size must be non-zero, got {}x{}",
                self.display.width, self.display.height
            ));
        }
        Ok(())
    }

    pub fn total_rows(&self) -> usize {
        self.history.tiles as usize * self.history.tile_rows as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Configuration::default();
        config.validate().unwrap();
        assert_eq!(config.history.bins, 2048);
        assert_eq!(config.display.palette, Palette::Turbo);
        assert_eq!(config.total_rows(), 8 * 1024);
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        let mut odd_bins = Configuration::default();
        odd_bins.history.bins = 7;
        assert!(matches!(
            odd_bins.validate(),
            Err(WaterfallError::InvalidConfig(_))
        ));

        let mut tiled_shift = Configuration::default();
        tiled_shift.history.strategy = UpdateStrategy::Shift;
        assert!(tiled_shift.validate().is_err());
        tiled_shift.history.tiles = 1;
        tiled_shift.validate().unwrap();

        let mut no_rows = Configuration::default();
        no_rows.history.tile_rows = 0;
        assert!(no_rows.validate().is_err());

        let mut empty_display = Configuration::default();
        empty_display.display.height = 0;
        assert!(empty_display.validate().is_err());
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let config: Configuration = toml::from_str(
            r#"
            [power]
            offset = 12.0
            min = -20.0
            max = 60.0
            "#,
        )
        .unwrap();
        assert_eq!(config.power.offset, 12.0);
        assert_eq!(config.history, HistoryConfig::default());
        assert_eq!(config.display, DisplayConfig::default());
    }

    #[test]
    fn enums_use_lowercase_names() {
        let mut config = Configuration::default();
        config.history.strategy = UpdateStrategy::Shift;
        config.display.palette = Palette::Cividis;
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("strategy = \"shift\""));
        assert!(toml_str.contains("palette = \"cividis\""));
    }

    #[test]
    fn change_ids_are_distinct() {
        let mut ids = vec![
            POWER_OFFSET,
            POWER_MIN,
            POWER_MAX,
            DISPLAY_WIDTH,
            DISPLAY_HEIGHT,
            DISPLAY_PALETTE,
        ];
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 6);
    }
}
