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

//! Fixed-cadence poll of the receive graph for display.
//!
//! The refresh loop never touches the streaming graph directly. Each tick it
//! reads the channels' RF levels and the newest spectrum frame through
//! [`Telemetry`], folds the frame into its own waterfall, and hands the
//! results to a [`MonitorDisplay`]. The UI drives it with
//! [`RefreshLoop::tick_if_due`] from its frame loop; headless mode drives it
//! with [`RefreshLoop::run`] on a tokio interval.

use pmr_core::probe::{display_level, DEFAULT_RF_DISPLAY_SCALE};
use pmr_core::{SpectrumFrame, WaterfallBuffer};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Default tick period.
pub const REFRESH_PERIOD: Duration = Duration::from_millis(100);
/// Default waterfall history depth in rows.
pub const WATERFALL_DEPTH: usize = 140;

/// Snapshot access to a running receiver.
pub trait Telemetry {
    /// Raw RF level of every channel, in plan order.
    fn rf_levels(&self) -> Vec<f32>;
    /// Newest whole spectrum frame since the last call, if any.
    fn take_spectrum(&self) -> Option<SpectrumFrame>;
}

/// Where the refresh loop delivers its results.
pub trait MonitorDisplay {
    /// Display levels in 0..=100, one per channel.
    fn show_levels(&mut self, levels: &[u8]);
    /// Called after a new row has been pushed.
    fn show_waterfall(&mut self, waterfall: &WaterfallBuffer);
}

/// Polls [`Telemetry`] and feeds a [`MonitorDisplay`].
#[derive(Debug)]
pub struct RefreshLoop {
    period: Duration,
    rf_scale: f32,
    waterfall: WaterfallBuffer,
    levels: Vec<u8>,
    last_tick: Option<Instant>,
    ticks: u64,
    skipped_rows: u64,
}

impl RefreshLoop {
    pub fn new(fft_size: usize, depth: usize) -> Self {
        Self {
            period: REFRESH_PERIOD,
            rf_scale: DEFAULT_RF_DISPLAY_SCALE,
            waterfall: WaterfallBuffer::new(fft_size, depth),
            levels: Vec::new(),
            last_tick: None,
            ticks: 0,
            skipped_rows: 0,
        }
    }

    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    #[must_use]
    pub fn with_rf_scale(mut self, rf_scale: f32) -> Self {
        self.rf_scale = rf_scale;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn rf_scale(&self) -> f32 {
        self.rf_scale
    }

    pub fn set_rf_scale(&mut self, rf_scale: f32) {
        self.rf_scale = rf_scale;
    }

    pub fn waterfall(&self) -> &WaterfallBuffer {
        &self.waterfall
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run one refresh. Returns true if the waterfall gained a row.
    pub fn tick<T, D>(&mut self, telemetry: &T, display: &mut D) -> bool
    where
        T: Telemetry + ?Sized,
        D: MonitorDisplay + ?Sized,
    {
        self.ticks += 1;

        let scale = self.rf_scale;
        self.levels.clear();
        self.levels
            .extend(telemetry.rf_levels().into_iter().map(|raw| display_level(raw, scale)));
        display.show_levels(&self.levels);

        let Some(frame) = telemetry.take_spectrum() else {
            return false;
        };
        if let Err(e) = self.waterfall.push_row(&frame) {
            self.skipped_rows += 1;
            if self.skipped_rows == 1 {
                log::warn!("Dropping spectrum frame: {e}");
            }
            return false;
        }
        display.show_waterfall(&self.waterfall);

        if self.ticks % 600 == 0 {
            log::debug!(
                "Refresh: {} ticks, {} waterfall rows, {} frames rejected",
                self.ticks,
                self.waterfall.rows_pushed(),
                self.skipped_rows
            );
        }
        true
    }

    /// Tick if at least one period has passed since the last tick.
    ///
    /// Returns whether a tick ran.
    pub fn tick_if_due<T, D>(&mut self, now: Instant, telemetry: &T, display: &mut D) -> bool
    where
        T: Telemetry + ?Sized,
        D: MonitorDisplay + ?Sized,
    {
        if let Some(last) = self.last_tick {
            if now.saturating_duration_since(last) < self.period {
                return false;
            }
        }
        self.last_tick = Some(now);
        self.tick(telemetry, display);
        true
    }

    /// Time left until the next tick is due, for scheduling repaints.
    pub fn until_due(&self, now: Instant) -> Duration {
        self.last_tick.map_or(Duration::ZERO, |last| {
            self.period.saturating_sub(now.saturating_duration_since(last))
        })
    }

    /// Tick on a fixed interval until `cancel` fires.
    ///
    /// Ticks that fall behind are skipped rather than bunched up.
    pub async fn run<T, D>(&mut self, telemetry: &T, display: &mut D, cancel: CancellationToken)
    where
        T: Telemetry + ?Sized,
        D: MonitorDisplay + ?Sized,
    {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.last_tick = Some(Instant::now());
                    self.tick(telemetry, display);
                }
                () = cancel.cancelled() => {
                    log::info!("Refresh loop cancelled after {} ticks", self.ticks);
                    return;
                }
            }
        }
    }
}
