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

//! FIR filter design and decimating FIR stages.

use std::f64::consts::PI;

use crate::stage::{Sample, Stage};

/// Attenuation factor of the Hamming window used by the tap estimate.
const HAMMING_ATTENUATION: f64 = 53.0;

/// Design a windowed-sinc low-pass filter.
///
/// - `gain`: DC gain of the resulting filter
/// - `sample_rate`: rate the filter runs at, in Hz
/// - `cutoff`: -6 dB point in Hz
/// - `transition`: transition band width in Hz
///
/// The tap count follows the usual Hamming estimate
/// `53 * fs / (22 * transition)`, forced odd so the filter has a center tap.
pub fn low_pass(gain: f64, sample_rate: f64, cutoff: f64, transition: f64) -> Vec<f32> {
    assert!(sample_rate > 0.0, "sample rate must be positive");
    assert!(
        cutoff > 0.0 && cutoff < sample_rate / 2.0,
        "cutoff {cutoff} outside (0, {})",
        sample_rate / 2.0
    );
    assert!(transition > 0.0, "transition width must be positive");

    let mut ntaps = (HAMMING_ATTENUATION * sample_rate / (22.0 * transition)).ceil() as usize;
    ntaps = ntaps.max(3) | 1;

    let m = (ntaps - 1) as f64;
    let fc = cutoff / sample_rate;

    let mut taps: Vec<f64> = (0..ntaps)
        .map(|n| {
            let t = n as f64 - m / 2.0;
            let sinc = if t == 0.0 {
                2.0 * fc
            } else {
                (2.0 * PI * fc * t).sin() / (PI * t)
            };
            let window = 0.54 - 0.46 * (2.0 * PI * n as f64 / m).cos();
            sinc * window
        })
        .collect();

    let sum: f64 = taps.iter().sum();
    for tap in &mut taps {
        *tap *= gain / sum;
    }

    taps.into_iter().map(|t| t as f32).collect()
}

/// Four-term Blackman-Harris window.
pub fn blackman_harris(n: usize) -> Vec<f32> {
    const A: [f64; 4] = [0.358_75, 0.488_29, 0.141_28, 0.011_68];
    if n == 1 {
        return vec![1.0];
    }
    let m = (n - 1) as f64;
    (0..n)
        .map(|i| {
            let x = 2.0 * PI * i as f64 / m;
            (A[0] - A[1] * x.cos() + A[2] * (2.0 * x).cos() - A[3] * (3.0 * x).cos()) as f32
        })
        .collect()
}

/// Decimating FIR filter with real taps.
///
/// The delay line is stored twice back to back so the newest `taps.len()`
/// samples are always one contiguous slice.
#[derive(Debug, Clone)]
pub struct FirFilter<T> {
    taps: Vec<f32>,
    history: Vec<T>,
    pos: usize,
    decimation: usize,
    countdown: usize,
}

impl<T: Sample> FirFilter<T> {
    pub fn new(taps: Vec<f32>, decimation: usize) -> Self {
        assert!(!taps.is_empty(), "FIR filter needs at least one tap");
        assert!(decimation > 0, "decimation must be at least 1");
        let n = taps.len();
        Self {
            taps,
            history: vec![T::default(); 2 * n],
            pos: 0,
            decimation,
            countdown: decimation,
        }
    }

    pub fn taps(&self) -> &[f32] {
        &self.taps
    }

    pub fn decimation(&self) -> usize {
        self.decimation
    }

    /// True if the next call to [`FirFilter::feed`] produces an output.
    pub fn will_emit(&self) -> bool {
        self.countdown == 1
    }

    /// Push one sample; returns the filter output on every `decimation`-th sample.
    pub fn feed(&mut self, x: T) -> Option<T> {
        let n = self.taps.len();
        self.pos = if self.pos == 0 { n - 1 } else { self.pos - 1 };
        self.history[self.pos] = x;
        self.history[self.pos + n] = x;

        self.countdown -= 1;
        if self.countdown > 0 {
            return None;
        }
        self.countdown = self.decimation;

        let window = &self.history[self.pos..self.pos + n];
        let acc = window
            .iter()
            .zip(&self.taps)
            .fold(T::default(), |acc, (&s, &tap)| acc + s * tap);
        Some(acc)
    }
}

/// [`FirFilter`] as a standalone stage.
#[derive(Debug, Clone)]
pub struct FirStage<T> {
    filter: FirFilter<T>,
}

impl<T: Sample> FirStage<T> {
    pub fn new(taps: Vec<f32>, decimation: usize) -> Self {
        Self {
            filter: FirFilter::new(taps, decimation),
        }
    }
}

impl<T: Sample> Stage for FirStage<T> {
    type Input = T;
    type Output = T;

    fn process(&mut self, input: &[T], output: &mut [T]) -> (usize, usize) {
        let mut consumed = 0;
        let mut produced = 0;

        for &x in input {
            if self.filter.will_emit() && produced == output.len() {
                break;
            }
            consumed += 1;
            if let Some(y) = self.filter.feed(x) {
                output[produced] = y;
                produced += 1;
            }
        }

        (consumed, produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Complex32;

    #[test]
    fn test_low_pass_shape() {
        let taps = low_pass(1.0, 48_000.0, 3_000.0, 800.0);
        assert_eq!(taps.len() % 2, 1);
        assert_eq!(taps.len(), 145);

        let sum: f32 = taps.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4, "DC gain {sum}");

        for i in 0..taps.len() / 2 {
            assert!((taps[i] - taps[taps.len() - 1 - i]).abs() < 1e-7);
        }
        let center = taps.len() / 2;
        assert!(taps.iter().all(|t| t.abs() <= taps[center]));
    }

    #[test]
    fn test_low_pass_gain_scales_taps() {
        let taps = low_pass(0.5, 240_000.0, 4_500.0, 4_000.0);
        let sum: f32 = taps.iter().sum();
        assert!((sum - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_blackman_harris_endpoints() {
        let w = blackman_harris(1024);
        assert!(w[0] < 1e-3);
        assert!(w[1023] < 1e-3);
        assert!(w.iter().all(|&v| v <= 1.0 + 1e-6));
    }

    #[test]
    fn test_fir_passes_dc() {
        let mut stage = FirStage::<f32>::new(low_pass(1.0, 48_000.0, 3_000.0, 800.0), 1);
        let out = stage.process_all(&vec![1.0; 1000]);
        assert_eq!(out.len(), 1000);
        assert!((out[999] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_fir_rejects_stopband_tone() {
        let fs = 48_000.0;
        let mut stage = FirStage::<f32>::new(low_pass(1.0, fs, 3_000.0, 800.0), 1);
        let tone: Vec<f32> = (0..4800)
            .map(|n| (2.0 * std::f32::consts::PI * 8_000.0 * n as f32 / fs as f32).sin())
            .collect();
        let out = stage.process_all(&tone);
        let tail_peak = out[1000..].iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(tail_peak < 0.01, "stopband leakage {tail_peak}");
    }

    #[test]
    fn test_decimation_output_count() {
        let mut stage = FirStage::<Complex32>::new(vec![0.25; 4], 8);
        let out = stage.process_all(&vec![Complex32::new(1.0, 0.0); 800]);
        assert_eq!(out.len(), 100);
    }

    #[test]
    fn test_stops_when_output_full() {
        let mut stage = FirStage::<f32>::new(vec![1.0], 2);
        let mut output = [0.0f32; 3];
        let (consumed, produced) = stage.process(&[1.0; 10], &mut output);
        assert_eq!(produced, 3);
        assert_eq!(consumed, 7);

        let (consumed, produced) = stage.process(&[1.0; 3], &mut output);
        assert_eq!((consumed, produced), (3, 2));
    }
}
