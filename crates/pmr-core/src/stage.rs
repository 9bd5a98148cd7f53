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

//! Streaming stage interface.
//!
//! A stage is a pure transform from one typed sample batch to another. It
//! keeps whatever history it needs internally, never blocks, and consumes
//! only as much input as it can turn into output with the space it was
//! given. The scheduler is free to call it with arbitrary slice sizes.

use std::ops::{Add, Mul};

/// Sample types the FIR machinery can filter with real taps.
pub trait Sample: Copy + Default + Send + Add<Output = Self> + Mul<f32, Output = Self> + 'static {}

impl<T> Sample for T where T: Copy + Default + Send + Add<Output = T> + Mul<f32, Output = T> + 'static {}

/// A streaming transform from `Input` samples to `Output` samples.
pub trait Stage: Send + 'static {
    type Input: Copy + Send + 'static;
    type Output: Copy + Default + Send + 'static;

    /// Process as much of `input` as fits into `output`.
    ///
    /// Returns `(consumed, produced)`. Samples are consumed strictly in
    /// order; anything not consumed must be offered again on the next call.
    fn process(&mut self, input: &[Self::Input], output: &mut [Self::Output]) -> (usize, usize);

    /// Run the whole of `input` through the stage and collect the output.
    fn process_all(&mut self, input: &[Self::Input]) -> Vec<Self::Output> {
        let mut out = Vec::with_capacity(input.len());
        let mut scratch = vec![Self::Output::default(); 4096];
        let mut offset = 0;

        while offset < input.len() {
            let (consumed, produced) = self.process(&input[offset..], &mut scratch);
            out.extend_from_slice(&scratch[..produced]);
            offset += consumed;
            if consumed == 0 && produced == 0 {
                break;
            }
        }

        out
    }
}
