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

//! Power-gated squelch.

use std::sync::Arc;

use crate::channel::ChannelControl;
use crate::stage::Stage;
use crate::Complex32;

/// Averaging factor of the squelch power estimate.
pub const SQUELCH_ALPHA: f32 = 0.02;

/// Passes samples while the averaged power is at or above the threshold and
/// outputs silence otherwise. Sample count is always preserved.
#[derive(Debug)]
pub struct Squelch {
    control: Arc<ChannelControl>,
    alpha: f32,
    power: f32,
}

impl Squelch {
    pub fn new(control: Arc<ChannelControl>) -> Self {
        Self {
            control,
            alpha: SQUELCH_ALPHA,
            power: 0.0,
        }
    }

    /// True if the last processed sample was passed through.
    pub fn is_open(&self) -> bool {
        self.power >= db_to_power(self.control.squelch())
    }
}

fn db_to_power(db: f32) -> f32 {
    10.0f32.powf(db / 10.0)
}

impl Stage for Squelch {
    type Input = Complex32;
    type Output = Complex32;

    fn process(&mut self, input: &[Complex32], output: &mut [Complex32]) -> (usize, usize) {
        let n = input.len().min(output.len());
        let threshold = db_to_power(self.control.squelch());

        for (x, y) in input[..n].iter().zip(&mut output[..n]) {
            self.power = self.alpha * x.norm_sqr() + (1.0 - self.alpha) * self.power;
            *y = if self.power >= threshold {
                *x
            } else {
                Complex32::new(0.0, 0.0)
            };
        }

        (n, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silences_noise_floor() {
        let control = Arc::new(ChannelControl::default());
        let mut squelch = Squelch::new(control);

        // -60 dB, below the -48 default
        let weak = vec![Complex32::new(1e-3, 0.0); 1000];
        let out = squelch.process_all(&weak);
        assert_eq!(out.len(), 1000);
        assert!(out.iter().all(|s| s.norm_sqr() == 0.0));
        assert!(!squelch.is_open());
    }

    #[test]
    fn test_passes_strong_signal_unchanged() {
        let control = Arc::new(ChannelControl::default());
        let mut squelch = Squelch::new(control);

        let strong = vec![Complex32::new(0.1, -0.05); 1000];
        let out = squelch.process_all(&strong);
        assert!(squelch.is_open());
        assert_eq!(out[999], strong[999]);
    }

    #[test]
    fn test_threshold_change_applies_next_batch() {
        let control = Arc::new(ChannelControl::default());
        let mut squelch = Squelch::new(Arc::clone(&control));

        // -40 dB: open at -48, closed at -35
        let signal = vec![Complex32::new(0.01, 0.0); 2000];
        let out = squelch.process_all(&signal);
        assert_eq!(out[1999], signal[1999]);

        control.set_squelch(-35.0);
        let out = squelch.process_all(&signal);
        assert_eq!(out[1999], Complex32::new(0.0, 0.0));
    }
}
