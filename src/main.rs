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

mod audio;
mod config;
mod refresh;
mod sdr;
mod ui;

use audio::{null_outputs, AudioMixer, AudioOutput};
use clap::Parser;
use config::{AppConfig, SourceChoice};
use eframe::egui;
use futuresdr::anyhow::{anyhow, Context, Result};
use refresh::{MonitorDisplay, RefreshLoop};
use sdr::Scanner;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// RF level above which a channel counts as active in headless logs
const HEADLESS_ACTIVE_LEVEL: u8 = 20;

#[derive(Parser, Debug)]
#[command(name = "pmr-monitor")]
#[command(about = "Sixteen-channel PMR446 monitor with waterfall")]
struct Args {
    /// Wideband source to open
    #[arg(long, value_enum)]
    source: Option<SourceChoice>,

    /// IQ capture (.cf32/.iq/.cfile or 16-bit stereo .wav); implies --source file
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,

    /// RTL-SDR device index
    #[arg(short = 'd', long)]
    device: Option<u32>,

    /// Initial tuner gain in dB
    #[arg(short = 'g', long)]
    gain: Option<f64>,

    /// Run without a window, logging channel activity
    #[arg(long)]
    headless: bool,

    /// Don't open the audio device
    #[arg(long)]
    no_audio: bool,
}

impl Args {
    /// Override the loaded configuration for this run only.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(path) = &self.file {
            config.iq_file = Some(path.clone());
            config.source = SourceChoice::File;
        }
        if let Some(source) = self.source {
            config.source = source;
        }
        if let Some(device) = self.device {
            config.device_index = device;
        }
        if let Some(gain) = self.gain {
            config.gain_db = gain;
        }
        if self.no_audio {
            config.audio_enabled = false;
        }
    }
}

/// Logs which channels are active whenever that set changes.
#[derive(Debug, Default)]
struct HeadlessDisplay {
    active: Vec<usize>,
    rows: u64,
}

impl MonitorDisplay for HeadlessDisplay {
    fn show_levels(&mut self, levels: &[u8]) {
        let active: Vec<usize> = levels
            .iter()
            .enumerate()
            .filter(|(_, &level)| level >= HEADLESS_ACTIVE_LEVEL)
            .map(|(i, _)| i + 1)
            .collect();
        if active != self.active {
            log::info!("Active channels: {active:?} (levels {levels:?})");
            self.active = active;
        }
    }

    fn show_waterfall(&mut self, waterfall: &pmr_core::WaterfallBuffer) {
        self.rows += 1;
        if self.rows % 100 == 0 {
            log::debug!("Waterfall: {} rows", waterfall.rows_pushed());
        }
    }
}

struct MonitorApp {
    window: ui::MonitorWindow,
    // Held for the stream's lifetime; cpal streams stay on the thread that built them.
    _audio: Option<AudioMixer>,
    /// Config as loaded, before command-line overrides
    saved: AppConfig,
}

impl Drop for MonitorApp {
    fn drop(&mut self) {
        self.saved.gain_db = self.window.gain_db();
        if let Err(e) = self.saved.save() {
            log::warn!("Failed to save config: {e}");
        }
    }
}

impl eframe::App for MonitorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.window.render(ctx);
    }
}

fn open_audio(config: &AppConfig, count: usize, rate: f64) -> (Option<AudioMixer>, Vec<Box<dyn AudioOutput>>, String) {
    if !config.audio_enabled {
        log::info!("Audio disabled");
        return (None, null_outputs(count), String::from("off"));
    }
    match AudioMixer::open(count, rate.round() as u32) {
        Ok((mixer, outputs)) => {
            let label = mixer.device_name().to_string();
            (Some(mixer), outputs, label)
        }
        Err(e) => {
            log::warn!("⚠️ No audio output ({e}), continuing silently");
            (None, null_outputs(count), String::from("unavailable"))
        }
    }
}

fn run_headless(mut scanner: Scanner, mut refresh: RefreshLoop) -> Result<()> {
    let rt = tokio::runtime::Runtime::new().context("Failed to create runtime")?;
    log::info!("Running headless, refreshing every {:?} (Ctrl-C to stop)", refresh.period());
    let cancel = CancellationToken::new();

    rt.block_on(async {
        let ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Interrupted");
            }
            ctrl_c.cancel();
        });

        let mut display = HeadlessDisplay::default();
        refresh.run(&scanner, &mut display, cancel).await;
    });

    log::info!("Headless run ended after {} refreshes", refresh.ticks());
    scanner.stop();
    scanner.join();
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}), using defaults");
        AppConfig::default()
    });
    if let Ok(path) = AppConfig::get_config_path() {
        log::info!("Config: {}", path.display());
    }
    let saved = config.clone();
    args.apply(&mut config);

    if config.source == SourceChoice::Rtlsdr {
        for device in sdr::list_devices() {
            log::info!("RTL-SDR #{}: {} (serial {})", device.index, device.name, device.serial);
        }
    }

    let scanner_config = config.scanner_config()?;
    let source_label = format!("{:?}", scanner_config.source);
    let (mixer, outputs, audio_label) = open_audio(
        &config,
        scanner_config.frequencies.len(),
        scanner_config.rates.audio_rate,
    );
    let fft_size = scanner_config.rates.fft_size;

    let scanner = Scanner::start(scanner_config, outputs)?;
    let refresh = RefreshLoop::new(fft_size, config.waterfall_depth.max(1))
        .with_period(config.refresh_period())
        .with_rf_scale(config.rf_display_scale);

    if args.headless {
        return run_headless(scanner, refresh);
    }

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1000.0, 720.0])
            .with_title("PMR Monitor"),
        ..Default::default()
    };

    eframe::run_native(
        "PMR Monitor",
        options,
        Box::new(move |_cc| {
            Ok(Box::new(MonitorApp {
                window: ui::MonitorWindow::new(scanner, refresh, source_label, audio_label),
                _audio: mixer,
                saved,
            }))
        }),
    )
    .map_err(|e| anyhow!("Window failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_flag_selects_file_source() {
        let args = Args::parse_from(["pmr-monitor", "--file", "capture.cf32", "--gain", "20"]);
        let mut config = AppConfig::default();
        args.apply(&mut config);

        assert_eq!(config.source, SourceChoice::File);
        assert_eq!(config.iq_file, Some(PathBuf::from("capture.cf32")));
        assert_eq!(config.gain_db, 20.0);
        assert!(config.audio_enabled);
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from(["pmr-monitor", "--source", "rtlsdr", "--device", "1", "--no-audio", "--headless"]);
        let mut config = AppConfig {
            gain_db: 40.0,
            ..AppConfig::default()
        };
        args.apply(&mut config);

        assert!(args.headless);
        assert_eq!(config.source, SourceChoice::Rtlsdr);
        assert_eq!(config.device_index, 1);
        assert_eq!(config.gain_db, 40.0);
        assert!(!config.audio_enabled);
    }

    #[test]
    fn test_headless_display_tracks_active_channels() {
        let mut display = HeadlessDisplay::default();
        display.show_levels(&[0, 50, 10, 90]);
        assert_eq!(display.active, vec![2, 4]);
        display.show_levels(&[0, 0, 0, 0]);
        assert!(display.active.is_empty());
    }
}
