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

//! Synthetic wideband source for running without hardware or a capture.
//!
//! A few plan channels carry narrowband FM tones that key on and off on
//! independent schedules over a Gaussian noise floor, so squelch, RF levels,
//! audio and the waterfall all have something to show.

use super::source::{digital_gain, Pacer, WidebandSource};
use futuresdr::anyhow::Result;
use pmr_core::{ChannelPlan, Complex32};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::TAU;

/// Samples per read.
const BATCH: usize = 16_384;

/// Standard deviation of each noise component at the reference gain.
const NOISE_SIGMA: f64 = 0.003;

/// Peak deviation of the synthetic transmissions.
const DEMO_DEVIATION_HZ: f64 = 2_500.0;

/// A keyed FM tone on one channel.
#[derive(Debug, Clone)]
struct Transmitter {
    channel: usize,
    offset_hz: f64,
    tone_hz: f64,
    amplitude: f32,
    period_secs: f64,
    on_secs: f64,
    carrier_phase: f64,
    tone_phase: f64,
}

impl Transmitter {
    fn keyed(&self, t: f64) -> bool {
        t % self.period_secs < self.on_secs
    }
}

/// `(channel index, tone Hz, amplitude, key period s, key-down s)`
const DEMO_TRANSMITTERS: [(usize, f64, f32, f64, f64); 3] = [
    (0, 800.0, 0.006, 4.0, 2.5),
    (5, 1_200.0, 0.012, 7.0, 3.0),
    (11, 1_800.0, 0.025, 11.0, 6.0),
];

pub struct DemoSource {
    sample_rate: f64,
    transmitters: Vec<Transmitter>,
    noise: Normal<f64>,
    rng: StdRng,
    scale: f32,
    sample_index: u64,
    pacer: Option<Pacer>,
}

impl DemoSource {
    /// Demo signals on channels of `plan`, paced to real time.
    pub fn new(plan: &ChannelPlan) -> Result<Self> {
        Self::build(plan, StdRng::from_entropy(), true)
    }

    /// Unpaced, reproducible variant.
    #[cfg(test)]
    pub fn with_seed(plan: &ChannelPlan, seed: u64) -> Result<Self> {
        Self::build(plan, StdRng::seed_from_u64(seed), false)
    }

    fn build(plan: &ChannelPlan, rng: StdRng, paced: bool) -> Result<Self> {
        let transmitters = DEMO_TRANSMITTERS
            .iter()
            .filter_map(|&(channel, tone_hz, amplitude, period_secs, on_secs)| {
                plan.get(channel).map(|spec| Transmitter {
                    channel,
                    offset_hz: spec.offset,
                    tone_hz,
                    amplitude,
                    period_secs,
                    on_secs,
                    carrier_phase: 0.0,
                    tone_phase: 0.0,
                })
            })
            .collect();

        Ok(Self {
            sample_rate: 1.0,
            transmitters,
            noise: Normal::new(0.0, NOISE_SIGMA)?,
            rng,
            scale: 1.0,
            sample_index: 0,
            pacer: paced.then(|| Pacer::new(1.0)),
        })
    }

    /// Channels that carry a synthetic transmission.
    pub fn active_channels(&self) -> Vec<usize> {
        self.transmitters.iter().map(|tx| tx.channel).collect()
    }

    fn next_sample(&mut self) -> Complex32 {
        let t = self.sample_index as f64 / self.sample_rate;
        let mut acc = Complex32::new(
            self.noise.sample(&mut self.rng) as f32,
            self.noise.sample(&mut self.rng) as f32,
        );

        for tx in &mut self.transmitters {
            let deviation = DEMO_DEVIATION_HZ * tx.tone_phase.sin();
            tx.tone_phase = (tx.tone_phase + TAU * tx.tone_hz / self.sample_rate) % TAU;
            tx.carrier_phase =
                (tx.carrier_phase + TAU * (tx.offset_hz + deviation) / self.sample_rate) % TAU;

            if tx.keyed(t) {
                acc += Complex32::from_polar(tx.amplitude, tx.carrier_phase as f32);
            }
        }

        self.sample_index += 1;
        acc * self.scale
    }
}

impl WidebandSource for DemoSource {
    fn set_sample_rate(&mut self, rate: f64) -> Result<()> {
        self.sample_rate = rate;
        if let Some(pacer) = &mut self.pacer {
            pacer.set_rate(rate);
        }
        Ok(())
    }

    fn set_center_frequency(&mut self, _frequency: f64) -> Result<()> {
        Ok(())
    }

    fn set_gain(&mut self, gain_db: f64) -> Result<()> {
        self.scale = digital_gain(gain_db);
        Ok(())
    }

    fn read(&mut self, buf: &mut Vec<Complex32>) -> Result<()> {
        buf.clear();
        buf.extend((0..BATCH).map(|_| self.next_sample()));
        if let Some(pacer) = &mut self.pacer {
            pacer.pace(buf.len());
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "synthetic demo ({} keyed FM transmitters on channels {:?})",
            self.transmitters.len(),
            self.active_channels().iter().map(|c| c + 1).collect::<Vec<_>>()
        )
    }
}
