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

//! Volume and mute gate on the audio path.

use std::sync::Arc;

use crate::channel::ChannelControl;
use crate::stage::Stage;

/// Multiplies audio by the channel volume, then by the mute multiplier.
///
/// Both factors are read once per batch, so a control change takes effect
/// at the next batch boundary and never mid-batch.
#[derive(Debug)]
pub struct VolumeGate {
    control: Arc<ChannelControl>,
}

impl VolumeGate {
    pub fn new(control: Arc<ChannelControl>) -> Self {
        Self { control }
    }
}

impl Stage for VolumeGate {
    type Input = f32;
    type Output = f32;

    fn process(&mut self, input: &[f32], output: &mut [f32]) -> (usize, usize) {
        let n = input.len().min(output.len());
        let volume = self.control.volume();
        let mute = self.control.mute_multiplier();

        for (x, y) in input[..n].iter().zip(&mut output[..n]) {
            *y = *x * volume * mute;
        }

        (n, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applies_volume() {
        let control = Arc::new(ChannelControl::default());
        control.set_volume(0.5);
        let mut gate = VolumeGate::new(control);

        let out = gate.process_all(&[1.0, -0.5, 0.25]);
        assert_eq!(out, vec![0.5, -0.25, 0.125]);
    }

    #[test]
    fn test_mute_zeroes_then_restores() {
        let control = Arc::new(ChannelControl::default());
        control.set_volume(0.8);
        let mut gate = VolumeGate::new(Arc::clone(&control));

        control.set_muted(true);
        assert!(gate.process_all(&[1.0; 16]).iter().all(|&s| s == 0.0));

        control.set_muted(false);
        assert!(gate.process_all(&[1.0; 16]).iter().all(|&s| (s - 0.8).abs() < f32::EPSILON));
    }
}
