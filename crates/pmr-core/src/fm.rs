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

//! Narrowband FM demodulation.

use std::f64::consts::PI;

use crate::filter::{low_pass, FirFilter};
use crate::plan::{StreamRates, DEEMPHASIS_TAU, DEMOD_AUDIO_CUTOFF_HZ, DEMOD_AUDIO_TRANSITION_HZ};
use crate::stage::Stage;
use crate::Complex32;

/// Peak deviation of narrowband FM voice channels in Hz.
pub const MAX_DEVIATION_HZ: f64 = 5_000.0;

/// Quadrature discriminator: phase difference between consecutive samples.
#[derive(Debug, Clone)]
pub struct QuadDemod {
    gain: f32,
    last: Complex32,
}

impl QuadDemod {
    pub fn new(gain: f32) -> Self {
        Self {
            gain,
            last: Complex32::new(0.0, 0.0),
        }
    }

    pub fn demod(&mut self, x: Complex32) -> f32 {
        let y = x * self.last.conj();
        self.last = x;
        self.gain * y.arg()
    }
}

/// Single-pole de-emphasis, bilinear transform with prewarping.
#[derive(Debug, Clone)]
pub struct Deemphasis {
    b0: f32,
    b1: f32,
    a1: f32,
    x1: f32,
    y1: f32,
}

impl Deemphasis {
    pub fn new(sample_rate: f64, tau: f64) -> Self {
        let w_ca = 1.0 / tau;
        let w_pp = (w_ca / (2.0 * sample_rate)).tan();
        let a1 = (w_pp - 1.0) / (w_pp + 1.0);
        let b = w_pp / (1.0 + w_pp);
        Self {
            b0: b as f32,
            b1: b as f32,
            a1: a1 as f32,
            x1: 0.0,
            y1: 0.0,
        }
    }

    pub fn filter(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.x1 - self.a1 * self.y1;
        self.x1 = x;
        self.y1 = y;
        y
    }
}

/// Narrowband FM receiver: discriminator, decimating audio filter, de-emphasis.
///
/// Input at the quadrature rate, output at the audio rate.
#[derive(Debug, Clone)]
pub struct NbfmDemod {
    discriminator: QuadDemod,
    audio: FirFilter<f32>,
    deemphasis: Deemphasis,
}

impl NbfmDemod {
    pub fn new(rates: &StreamRates) -> Self {
        let gain = rates.quad_rate / (2.0 * PI * MAX_DEVIATION_HZ);
        let taps = low_pass(0.5, rates.quad_rate, DEMOD_AUDIO_CUTOFF_HZ, DEMOD_AUDIO_TRANSITION_HZ);
        Self {
            discriminator: QuadDemod::new(gain as f32),
            audio: FirFilter::new(taps, rates.audio_decimation()),
            deemphasis: Deemphasis::new(rates.audio_rate, DEEMPHASIS_TAU),
        }
    }
}

impl Stage for NbfmDemod {
    type Input = Complex32;
    type Output = f32;

    fn process(&mut self, input: &[Complex32], output: &mut [f32]) -> (usize, usize) {
        let mut consumed = 0;
        let mut produced = 0;

        for &x in input {
            if self.audio.will_emit() && produced == output.len() {
                break;
            }
            consumed += 1;
            let baseband = self.discriminator.demod(x);
            if let Some(a) = self.audio.feed(baseband) {
                output[produced] = self.deemphasis.filter(a);
                produced += 1;
            }
        }

        (consumed, produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminator_tracks_constant_frequency() {
        let rate = 240_000.0;
        let gain = rate / (2.0 * PI * MAX_DEVIATION_HZ);
        let mut demod = QuadDemod::new(gain as f32);

        let mut last = 0.0;
        for n in 0..1000 {
            let p = 2.0 * PI * 2_500.0 * f64::from(n) / rate;
            last = demod.demod(Complex32::new(p.cos() as f32, p.sin() as f32));
        }
        // half of the peak deviation
        assert!((last - 0.5).abs() < 1e-3, "got {last}");
    }

    #[test]
    fn test_deemphasis_unity_dc_gain() {
        let mut deemph = Deemphasis::new(48_000.0, DEEMPHASIS_TAU);
        let mut y = 0.0;
        for _ in 0..10_000 {
            y = deemph.filter(1.0);
        }
        assert!((y - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_deemphasis_attenuates_treble() {
        let fs = 48_000.0;
        let mut deemph = Deemphasis::new(fs, DEEMPHASIS_TAU);
        let mut peak = 0.0f32;
        for n in 0..4_800 {
            let x = (2.0 * std::f32::consts::PI * 10_000.0 * n as f32 / fs as f32).sin();
            let y = deemph.filter(x);
            if n > 480 {
                peak = peak.max(y.abs());
            }
        }
        assert!(peak < 0.6, "10 kHz peak {peak}");
    }

    #[test]
    fn test_recovers_audio_tone() {
        let rates = StreamRates::default();
        let mut demod = NbfmDemod::new(&rates);

        // 1 kHz modulating tone at 2.5 kHz deviation
        let mut phase = 0.0f64;
        let input: Vec<Complex32> = (0..48_000)
            .map(|n| {
                let m = (2.0 * PI * 1_000.0 * f64::from(n) / rates.quad_rate).sin();
                phase += 2.0 * PI * 2_500.0 * m / rates.quad_rate;
                Complex32::new(phase.cos() as f32, phase.sin() as f32)
            })
            .collect();

        let audio = demod.process_all(&input);
        assert_eq!(audio.len(), 48_000 / 5);
        let peak = audio[1_000..].iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(peak > 0.1 && peak < 0.4, "audio peak {peak}");
    }
}
