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

//! Frequency translation and channel selection.

use std::f64::consts::PI;

use crate::filter::{low_pass, FirFilter};
use crate::plan::{StreamRates, CHANNEL_CUTOFF_HZ, CHANNEL_TRANSITION_HZ};
use crate::stage::Stage;
use crate::Complex32;

/// Samples between rotator renormalisations.
const RENORMALIZE_INTERVAL: u32 = 512;

/// Numerically controlled oscillator mixing a stream by a fixed frequency.
#[derive(Debug, Clone)]
pub struct Rotator {
    phase: Complex32,
    increment: Complex32,
    counter: u32,
}

impl Rotator {
    /// Rotator shifting the spectrum by `shift_hz` at `sample_rate`.
    pub fn new(shift_hz: f64, sample_rate: f64) -> Self {
        let w = 2.0 * PI * shift_hz / sample_rate;
        Self {
            phase: Complex32::new(1.0, 0.0),
            increment: Complex32::new(w.cos() as f32, w.sin() as f32),
            counter: 0,
        }
    }

    pub fn rotate(&mut self, x: Complex32) -> Complex32 {
        let y = x * self.phase;
        self.phase *= self.increment;
        self.counter += 1;
        if self.counter == RENORMALIZE_INTERVAL {
            self.counter = 0;
            self.phase /= self.phase.norm();
        }
        y
    }
}

/// Shifts one channel to baseband, filters it and decimates to the quadrature rate.
///
/// Decimation happens in a short anti-alias stage at the wideband rate; the
/// sharp 5.8 kHz / 0.9 kHz channel-select filter then runs at the much lower
/// quadrature rate.
#[derive(Debug, Clone)]
pub struct FreqXlatingFilter {
    rotator: Rotator,
    anti_alias: FirFilter<Complex32>,
    channel: FirFilter<Complex32>,
}

impl FreqXlatingFilter {
    /// Filter for a channel at `offset` Hz from the tuned center.
    pub fn new(offset: f64, rates: &StreamRates) -> Self {
        let passband = CHANNEL_CUTOFF_HZ + CHANNEL_TRANSITION_HZ;
        let stopband = rates.quad_rate - passband;

        let anti_alias = low_pass(
            1.0,
            rates.sample_rate,
            (passband + stopband) / 2.0,
            stopband - passband,
        );
        let channel = low_pass(1.0, rates.quad_rate, CHANNEL_CUTOFF_HZ, CHANNEL_TRANSITION_HZ);

        log::debug!(
            "channel filter at {:+.0} Hz: {} anti-alias taps (decim {}), {} channel taps",
            offset,
            anti_alias.len(),
            rates.channel_decimation(),
            channel.len()
        );

        Self {
            rotator: Rotator::new(-offset, rates.sample_rate),
            anti_alias: FirFilter::new(anti_alias, rates.channel_decimation()),
            channel: FirFilter::new(channel, 1),
        }
    }
}

impl Stage for FreqXlatingFilter {
    type Input = Complex32;
    type Output = Complex32;

    fn process(&mut self, input: &[Complex32], output: &mut [Complex32]) -> (usize, usize) {
        let mut consumed = 0;
        let mut produced = 0;

        for &x in input {
            if self.anti_alias.will_emit() && produced == output.len() {
                break;
            }
            consumed += 1;
            if let Some(y) = self.anti_alias.feed(self.rotator.rotate(x)) {
                if let Some(z) = self.channel.feed(y) {
                    output[produced] = z;
                    produced += 1;
                }
            }
        }

        (consumed, produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f64, rate: f64, len: usize) -> Vec<Complex32> {
        (0..len)
            .map(|n| {
                let p = 2.0 * PI * freq * n as f64 / rate;
                Complex32::new(p.cos() as f32, p.sin() as f32)
            })
            .collect()
    }

    fn mean_power(samples: &[Complex32]) -> f32 {
        samples.iter().map(Complex32::norm_sqr).sum::<f32>() / samples.len() as f32
    }

    #[test]
    fn test_rotator_keeps_unit_magnitude() {
        let mut rotator = Rotator::new(12_345.0, 1_920_000.0);
        let mut last = Complex32::new(1.0, 0.0);
        for _ in 0..100_000 {
            last = rotator.rotate(Complex32::new(1.0, 0.0));
        }
        assert!((last.norm() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_channel_at_offset_passes() {
        let rates = StreamRates::default();
        let mut filter = FreqXlatingFilter::new(-93_750.0, &rates);
        let input = tone(-93_750.0 + 1_000.0, rates.sample_rate, 96_000);

        let out = filter.process_all(&input);
        assert_eq!(out.len(), 96_000 / 8);
        let p = mean_power(&out[2_000..]);
        assert!((p - 1.0).abs() < 0.05, "passband power {p}");
    }

    #[test]
    fn test_adjacent_channel_rejected() {
        let rates = StreamRates::default();
        let mut filter = FreqXlatingFilter::new(0.0, &rates);
        let input = tone(12_500.0, rates.sample_rate, 96_000);

        let out = filter.process_all(&input);
        let p = mean_power(&out[2_000..]);
        assert!(p < 1e-4, "adjacent channel leakage {p}");
    }
}
