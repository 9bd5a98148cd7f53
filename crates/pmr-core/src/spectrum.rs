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

//! Whole-band spectrum estimation.
//!
//! [`LogPowerFft`] turns the decimated wideband stream into log-power frames
//! at a fixed cadence. [`SpectrumAccumulator`] is the hand-off point between
//! the streaming graph and the refresh loop: the graph appends frames, the
//! refresh loop takes at most the newest one per poll.

use std::sync::{Arc, Mutex, PoisonError};

use rustfft::{Fft, FftPlanner};

use crate::filter::{blackman_harris, low_pass, FirStage};
use crate::plan::{StreamRates, SPECTRUM_CUTOFF_HZ, SPECTRUM_TRANSITION_HZ};
use crate::stage::Stage;
use crate::Complex32;

/// Power values in dB, one per FFT bin.
pub type SpectrumFrame = Vec<f32>;

/// Smallest power fed to the log conversion.
const POWER_FLOOR: f32 = 1e-20;

/// Whole frames retained by the accumulator between polls.
const MAX_PENDING_FRAMES: usize = 8;

/// Decimating low-pass between the wideband stream and the FFT.
pub fn spectrum_decimator(rates: &StreamRates) -> FirStage<Complex32> {
    FirStage::new(
        low_pass(1.0, rates.sample_rate, SPECTRUM_CUTOFF_HZ, SPECTRUM_TRANSITION_HZ),
        rates.spectrum_decimation,
    )
}

/// Windowed FFT power estimator with exponential frame averaging.
///
/// Keeps one `fft_size` vector out of every `decimation` so the output
/// cadence matches the configured frame rate, and emits bins in natural FFT
/// order (DC first).
pub struct LogPowerFft {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
    average: Vec<f32>,
    alpha: f32,
    seeded: bool,
    fill: usize,
    vector_index: usize,
    decimation: usize,
    offset_db: f32,
}

impl std::fmt::Debug for LogPowerFft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogPowerFft")
            .field("fft_size", &self.window.len())
            .field("alpha", &self.alpha)
            .field("decimation", &self.decimation)
            .finish_non_exhaustive()
    }
}

impl LogPowerFft {
    pub fn new(rates: &StreamRates) -> Self {
        let n = rates.fft_size;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n);
        let scratch_len = fft.get_inplace_scratch_len();
        let window = blackman_harris(n);

        let window_power: f32 = window.iter().map(|w| w * w).sum();
        let offset_db = -20.0 * (n as f32).log10()
            - 10.0 * (window_power / n as f32).log10()
            - 20.0 * (rates.ref_scale / 2.0).log10();

        let decimation = (rates.spectrum_rate() / n as f64 / rates.frame_rate)
            .round()
            .max(1.0) as usize;

        log::debug!(
            "log-power FFT: {n} bins, keeping 1 of {decimation} vectors, alpha {}",
            rates.spectrum_average
        );

        Self {
            fft,
            window,
            buffer: vec![Complex32::new(0.0, 0.0); n],
            scratch: vec![Complex32::new(0.0, 0.0); scratch_len],
            average: vec![0.0; n],
            alpha: rates.spectrum_average,
            seeded: false,
            fill: 0,
            vector_index: 0,
            decimation,
            offset_db,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    /// Vectors consumed per emitted frame.
    pub fn decimation(&self) -> usize {
        self.decimation
    }

    fn compute(&mut self, out: &mut [f32]) {
        for (x, w) in self.buffer.iter_mut().zip(&self.window) {
            *x *= *w;
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        for ((bin, avg), db) in self.buffer.iter().zip(&mut self.average).zip(out) {
            let power = bin.norm_sqr();
            *avg = if self.seeded {
                self.alpha * power + (1.0 - self.alpha) * *avg
            } else {
                power
            };
            *db = 10.0 * avg.max(POWER_FLOOR).log10() + self.offset_db;
        }
        self.seeded = true;
    }
}

impl Stage for LogPowerFft {
    type Input = Complex32;
    type Output = f32;

    fn process(&mut self, input: &[Complex32], output: &mut [f32]) -> (usize, usize) {
        let n = self.fft_size();
        let mut consumed = 0;
        let mut produced = 0;

        while consumed < input.len() {
            let keep = self.vector_index == 0;
            let take = (n - self.fill).min(input.len() - consumed);
            let completes = self.fill + take == n;

            if keep && completes && output.len() - produced < n {
                break;
            }

            if keep {
                self.buffer[self.fill..self.fill + take]
                    .copy_from_slice(&input[consumed..consumed + take]);
            }
            self.fill += take;
            consumed += take;

            if completes {
                if keep {
                    self.compute(&mut output[produced..produced + n]);
                    produced += n;
                }
                self.fill = 0;
                self.vector_index = (self.vector_index + 1) % self.decimation;
            }
        }

        (consumed, produced)
    }
}

/// Hand-off buffer between the spectrum path and its consumer.
///
/// Only whole frames are ever exposed. The producer side holds the lock for
/// one bounded append; the consumer for one frame copy.
#[derive(Debug)]
pub struct SpectrumAccumulator {
    fft_size: usize,
    data: Mutex<Vec<f32>>,
}

impl SpectrumAccumulator {
    pub fn new(fft_size: usize) -> Self {
        assert!(fft_size > 0, "FFT size must be positive");
        Self {
            fft_size,
            data: Mutex::new(Vec::with_capacity(fft_size * (MAX_PENDING_FRAMES + 1))),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Append spectrum values, dropping the oldest whole frames beyond the
    /// retention limit.
    pub fn push(&self, values: &[f32]) {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        data.extend_from_slice(values);

        let limit = self.fft_size * MAX_PENDING_FRAMES;
        if data.len() > limit {
            let excess = data.len() - limit;
            let drop = excess.div_ceil(self.fft_size) * self.fft_size;
            let len = data.len();
            data.drain(..drop.min(len));
        }
    }

    /// Take the newest whole frame, DC-centered, and discard every whole
    /// frame received so far.
    ///
    /// Returns `None` when no whole frame has arrived since the last take.
    pub fn take_latest(&self) -> Option<SpectrumFrame> {
        let n = self.fft_size;
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);

        let whole = data.len() / n * n;
        if whole == 0 {
            return None;
        }

        let mut frame = data[whole - n..whole].to_vec();
        data.drain(..whole);
        drop(data);

        frame.rotate_left(n / 2);
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn test_rates() -> StreamRates {
        StreamRates {
            fft_size: 64,
            ..StreamRates::default()
        }
    }

    #[test]
    fn test_emits_at_frame_cadence() {
        let rates = StreamRates::default();
        let mut fft = LogPowerFft::new(&rates);
        assert_eq!(fft.decimation(), 23);

        let input = vec![Complex32::new(0.5, 0.0); 1024 * 46];
        let out = fft.process_all(&input);
        assert_eq!(out.len(), 2 * 1024);
    }

    #[test]
    fn test_tone_lands_in_its_bin() {
        let rates = test_rates();
        let mut fft = LogPowerFft::new(&rates);
        let rate = rates.spectrum_rate();
        let bin = 8;
        let freq = bin as f64 * rate / 64.0;

        let input: Vec<Complex32> = (0..64)
            .map(|k| {
                let p = 2.0 * PI * freq * f64::from(k) / rate;
                Complex32::new(p.cos() as f32, p.sin() as f32)
            })
            .collect();
        let out = fft.process_all(&input);

        assert_eq!(out.len(), 64);
        let peak = out
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(peak, Some(bin));
        assert!(out[bin] - out[32] > 40.0);
    }

    #[test]
    fn test_averaging_smooths_step() {
        let rates = StreamRates {
            fft_size: 64,
            frame_rate: 240_000.0 / 64.0,
            ..StreamRates::default()
        };
        let mut fft = LogPowerFft::new(&rates);
        assert_eq!(fft.decimation(), 1);

        let loud = vec![Complex32::new(1.0, 0.0); 64];
        let quiet = vec![Complex32::new(0.0, 0.0); 64];
        let first = fft.process_all(&loud);
        let second = fft.process_all(&quiet);

        // 10*log10(0.75) below the seeded frame at DC
        assert!((first[0] - second[0] - 1.249).abs() < 0.01);
    }

    #[test]
    fn test_waits_for_output_space() {
        let rates = test_rates();
        let mut fft = LogPowerFft::new(&rates);
        let input = vec![Complex32::new(1.0, 0.0); 64];
        let mut small = [0.0f32; 32];

        let (consumed, produced) = fft.process(&input, &mut small);
        assert_eq!((consumed, produced), (0, 0));
    }

    #[test]
    fn test_decimator_keeps_plan_band() {
        let rates = StreamRates::default();
        let power_after = |freq: f64| {
            let input: Vec<Complex32> = (0..38_400)
                .map(|n| {
                    let p = 2.0 * PI * freq * n as f64 / rates.sample_rate;
                    Complex32::new(p.cos() as f32, p.sin() as f32)
                })
                .collect();
            let out = spectrum_decimator(&rates).process_all(&input);
            assert_eq!(out.len(), input.len() / rates.spectrum_decimation);
            let settled = &out[out.len() / 2..];
            settled.iter().map(Complex32::norm_sqr).sum::<f32>() / settled.len() as f32
        };

        assert!((power_after(90_000.0) - 1.0).abs() < 0.05);
        assert!(power_after(400_000.0) < 1e-3);
    }

    #[test]
    fn test_accumulator_needs_whole_frame() {
        let acc = SpectrumAccumulator::new(4);
        assert_eq!(acc.take_latest(), None);
        acc.push(&[1.0, 2.0, 3.0]);
        assert_eq!(acc.take_latest(), None);
        acc.push(&[4.0]);
        assert_eq!(acc.take_latest(), Some(vec![3.0, 4.0, 1.0, 2.0]));
    }

    #[test]
    fn test_accumulator_never_repeats() {
        let acc = SpectrumAccumulator::new(4);
        acc.push(&[0.0, 1.0, 2.0, 3.0, 10.0, 11.0, 12.0, 13.0]);
        assert_eq!(acc.take_latest(), Some(vec![12.0, 13.0, 10.0, 11.0]));
        assert_eq!(acc.take_latest(), None);
    }

    #[test]
    fn test_accumulator_keeps_partial_tail() {
        let acc = SpectrumAccumulator::new(4);
        acc.push(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(acc.take_latest(), Some(vec![2.0, 3.0, 0.0, 1.0]));
        acc.push(&[6.0, 7.0]);
        assert_eq!(acc.take_latest(), Some(vec![6.0, 7.0, 4.0, 5.0]));
    }

    #[test]
    fn test_accumulator_bounded() {
        let acc = SpectrumAccumulator::new(2);
        for i in 0..100 {
            acc.push(&[i as f32, i as f32]);
        }
        let len = acc.data.lock().unwrap().len();
        assert!(len <= 2 * MAX_PENDING_FRAMES);
        assert_eq!(acc.take_latest(), Some(vec![99.0, 99.0]));
    }
}
