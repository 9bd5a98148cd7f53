// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Application configuration management.
//!
//! Settings persist as TOML through `confy` under `pmr-monitor/config`.
//! Every field falls back to its default, so an older or hand-edited file
//! still loads. Stream rates and the channel plan are compiled in and are
//! not part of the file.

use crate::refresh::{REFRESH_PERIOD, WATERFALL_DEPTH};
use crate::sdr::{ScannerConfig, SourceKind};
use pmr_core::channel::{DEFAULT_SQUELCH_DB, DEFAULT_VOLUME, SQUELCH_RANGE, VOLUME_RANGE};
use pmr_core::probe::DEFAULT_RF_DISPLAY_SCALE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const APP_NAME: &str = "pmr-monitor";
const CONFIG_NAME: &str = "config";

/// Default tuner gain in dB
pub const DEFAULT_GAIN_DB: f64 = 35.0;
/// Gain range offered by the UI, in dB
pub const GAIN_RANGE: std::ops::RangeInclusive<f64> = 10.0..=49.0;

/// Which kind of wideband source to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceChoice {
    /// Synthetic transmitters over noise
    #[default]
    Demo,
    /// Recorded IQ file
    File,
    /// RTL-SDR dongle
    Rtlsdr,
}

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Source opened at startup
    pub source: SourceChoice,

    /// IQ capture used when `source` is `file`
    pub iq_file: Option<PathBuf>,

    /// RTL-SDR device index
    pub device_index: u32,

    /// RTL-SDR frequency correction in PPM
    pub ppm_correction: i32,

    /// Initial tuner gain in dB
    pub gain_db: f64,

    /// Initial volume of every channel (0.0 - 1.0)
    pub volume: f32,

    /// Initial squelch threshold of every channel in dB
    pub squelch_db: f32,

    /// Multiplier from raw RF power to the 0-100 level bar
    pub rf_display_scale: f32,

    /// Refresh loop period in milliseconds
    pub refresh_ms: u64,

    /// Waterfall history depth in rows
    pub waterfall_depth: usize,

    /// Open the audio device
    pub audio_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: SourceChoice::Demo,
            iq_file: None,
            device_index: 0,
            ppm_correction: 0,
            gain_db: DEFAULT_GAIN_DB,
            volume: DEFAULT_VOLUME,
            squelch_db: DEFAULT_SQUELCH_DB,
            rf_display_scale: DEFAULT_RF_DISPLAY_SCALE,
            refresh_ms: REFRESH_PERIOD.as_millis() as u64,
            waterfall_depth: WATERFALL_DEPTH,
            audio_enabled: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, creating it with defaults if missing
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, CONFIG_NAME)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<(), confy::ConfyError> {
        confy::store(APP_NAME, CONFIG_NAME, self)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_millis(self.refresh_ms.max(1))
    }

    /// Resolve the source selection into something the scanner can open.
    pub fn source_kind(&self) -> futuresdr::anyhow::Result<SourceKind> {
        Ok(match self.source {
            SourceChoice::Demo => SourceKind::Demo,
            SourceChoice::File => {
                let Some(path) = self.iq_file.clone() else {
                    futuresdr::anyhow::bail!("File source selected but no IQ file configured (use --file)");
                };
                SourceKind::File { path }
            }
            SourceChoice::Rtlsdr => SourceKind::RtlSdr {
                device_index: self.device_index,
                ppm_correction: self.ppm_correction,
            },
        })
    }

    /// Build the scanner configuration, clamping out-of-range values.
    pub fn scanner_config(&self) -> futuresdr::anyhow::Result<ScannerConfig> {
        Ok(ScannerConfig {
            source: self.source_kind()?,
            gain_db: self.gain_db.clamp(*GAIN_RANGE.start(), *GAIN_RANGE.end()),
            volume: self.volume.clamp(*VOLUME_RANGE.start(), *VOLUME_RANGE.end()),
            squelch_db: self.squelch_db.clamp(*SQUELCH_RANGE.start(), *SQUELCH_RANGE.end()),
            ..ScannerConfig::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.source, SourceChoice::Demo);
        assert_eq!(config.gain_db, 35.0);
        assert_eq!(config.refresh_period(), Duration::from_millis(100));
        assert_eq!(config.waterfall_depth, 140);
        assert!(config.audio_enabled);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let path = std::env::temp_dir().join(format!("pmr-monitor-config-{}.toml", std::process::id()));
        std::fs::write(&path, "source = \"rtlsdr\"\ndevice_index = 2\n").unwrap();
        let config: AppConfig = confy::load_path(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.source, SourceChoice::Rtlsdr);
        assert_eq!(config.device_index, 2);
        assert_eq!(config.volume, DEFAULT_VOLUME);
        assert_eq!(
            config.source_kind().unwrap(),
            SourceKind::RtlSdr {
                device_index: 2,
                ppm_correction: 0
            }
        );
    }

    #[test]
    fn test_file_source_requires_path() {
        let mut config = AppConfig {
            source: SourceChoice::File,
            ..AppConfig::default()
        };
        assert!(config.source_kind().is_err());

        config.iq_file = Some(PathBuf::from("capture.cf32"));
        assert_eq!(
            config.source_kind().unwrap(),
            SourceKind::File {
                path: PathBuf::from("capture.cf32")
            }
        );
    }

    #[test]
    fn test_scanner_config_clamps() {
        let config = AppConfig {
            gain_db: 80.0,
            volume: 3.0,
            squelch_db: -100.0,
            ..AppConfig::default()
        };
        let scanner = config.scanner_config().unwrap();
        assert_eq!(scanner.gain_db, 49.0);
        assert_eq!(scanner.volume, 1.0);
        assert_eq!(scanner.squelch_db, -70.0);
        assert_eq!(scanner.frequencies.len(), 16);
    }
}
