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

//! RF level probe.
//!
//! Tracks a channel's received power as a moving average of |x|² taken
//! before the squelch, and publishes the latest value to the channel's
//! control cell so the UI can read it without touching the stream.

use std::sync::Arc;

use crate::channel::ChannelControl;
use crate::Complex32;

/// Samples in the RF level moving average (about 2 ms at 240 kS/s).
pub const RF_AVERAGE_LENGTH: usize = 512;
/// Outputs between exact re-summations of the running total.
pub const RF_AVERAGE_RESUM: usize = 4000;
/// Default multiplier from averaged power to the 0..=100 display range.
pub const DEFAULT_RF_DISPLAY_SCALE: f32 = 3.0e6;
/// Upper bound of the display range.
pub const RF_DISPLAY_MAX: u8 = 100;

/// Running-sum moving average with periodic exact re-summation to stop
/// floating point drift.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    window: Vec<f32>,
    index: usize,
    sum: f32,
    scale: f32,
    since_resum: usize,
    resum_interval: usize,
}

impl MovingAverage {
    pub fn new(length: usize, scale: f32, resum_interval: usize) -> Self {
        assert!(length > 0, "moving average length must be positive");
        Self {
            window: vec![0.0; length],
            index: 0,
            sum: 0.0,
            scale,
            since_resum: 0,
            resum_interval: resum_interval.max(1),
        }
    }

    pub fn push(&mut self, x: f32) -> f32 {
        self.sum += x - self.window[self.index];
        self.window[self.index] = x;
        self.index = (self.index + 1) % self.window.len();

        self.since_resum += 1;
        if self.since_resum >= self.resum_interval {
            self.since_resum = 0;
            self.sum = self.window.iter().sum();
        }

        self.sum * self.scale
    }
}

/// Envelope follower feeding a channel's RF level cell.
#[derive(Debug)]
pub struct RfLevelProbe {
    average: MovingAverage,
    control: Arc<ChannelControl>,
}

impl RfLevelProbe {
    pub fn new(control: Arc<ChannelControl>) -> Self {
        Self {
            average: MovingAverage::new(
                RF_AVERAGE_LENGTH,
                1.0 / RF_AVERAGE_LENGTH as f32,
                RF_AVERAGE_RESUM,
            ),
            control,
        }
    }

    /// Consume a batch of filtered channel samples.
    ///
    /// Only the value after the last sample is published.
    pub fn process(&mut self, input: &[Complex32]) {
        let Some(level) = input
            .iter()
            .map(|x| self.average.push(x.norm_sqr()))
            .last()
        else {
            return;
        };
        self.control.publish_rf_level(level.max(0.0));
    }

    /// Latest published level.
    pub fn level(&self) -> f32 {
        self.control.rf_level()
    }
}

/// Scale a raw RF level into the 0..=100 display range.
///
/// Any input, including NaN and infinities, lands inside the range.
pub fn display_level(raw: f32, scale: f32) -> u8 {
    let scaled = raw * scale;
    if scaled.is_nan() {
        return 0;
    }
    scaled.clamp(0.0, f32::from(RF_DISPLAY_MAX)) as u8
}
