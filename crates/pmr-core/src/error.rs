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

//! Error types for the receive core.

use thiserror::Error;

/// Result alias for fallible receive-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while validating the fixed operating parameters.
///
/// All of these are construction-time failures: once a [`crate::ChannelPlan`]
/// and [`crate::StreamRates`] have been accepted, the streaming stages do not
/// fail.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("invalid rate {name}: {value}")]
    InvalidRate { name: &'static str, value: f64 },

    #[error("{numerator} ({numerator_rate} Hz) is not an integer multiple of {denominator} ({denominator_rate} Hz)")]
    RateRatio {
        numerator: &'static str,
        numerator_rate: f64,
        denominator: &'static str,
        denominator_rate: f64,
    },

    #[error("{filter} filter cutoff {cutoff} Hz does not fit below the Nyquist frequency of {rate} Hz")]
    FilterCutoff {
        filter: &'static str,
        cutoff: f64,
        rate: f64,
    },

    #[error("channel plan is empty")]
    EmptyPlan,

    #[error("channel {frequency} Hz (offset {offset} Hz) lies outside the ±{half_bandwidth} Hz capture bandwidth")]
    OutOfBand {
        frequency: f64,
        offset: f64,
        half_bandwidth: f64,
    },

    #[error("spectrum frame has {got} bins, expected {expected}")]
    FrameLength { expected: usize, got: usize },
}
