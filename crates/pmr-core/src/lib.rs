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

//! Receive core for a channelized PMR446 monitor.
//!
//! This library holds everything in the receive chain that does not depend
//! on a scheduler, a radio driver, an audio device or a UI toolkit:
//!
//! - **Plan layer**: the fixed channel plan, stream rates and their validation
//! - **Stage layer**: non-blocking streaming transforms (frequency translation,
//!   FIR filtering and decimation, squelch, FM demodulation, volume/mute gate)
//!   behind the common [`Stage`] interface
//! - **Telemetry layer**: RF level probes and per-channel control cells that
//!   can be read and written from any thread without locks
//! - **Spectrum layer**: log-power FFT estimation, the spectrum accumulator,
//!   the colour mapper and the scrolling waterfall buffer
//!
//! The desktop application wires these stages into a FutureSDR flowgraph; the
//! stages themselves only move samples between slices.
//!
//! # Quick Start
//!
//! ```
//! use pmr_core::{ChannelPlan, StreamRates, WaterfallBuffer, PMR446_CHANNELS};
//!
//! let rates = StreamRates::default();
//! let plan = ChannelPlan::new(&PMR446_CHANNELS, &rates).unwrap();
//! assert_eq!(plan.len(), 16);
//!
//! let mut waterfall = WaterfallBuffer::new(rates.fft_size, 140);
//! assert!(waterfall.push_row(&vec![-60.0; rates.fft_size]).is_ok());
//! ```

pub mod atomic;
pub mod channel;
pub mod color;
pub mod error;
pub mod filter;
pub mod fm;
pub mod gate;
pub mod plan;
pub mod probe;
pub mod spectrum;
pub mod squelch;
pub mod stage;
pub mod waterfall;
pub mod xlate;

pub use channel::{ChannelBank, ChannelControl, ChannelStages};
pub use color::{color_of, Rgb, COLOR_HI_DB, COLOR_LO_DB};
pub use error::{Error, Result};
pub use plan::{ChannelPlan, ChannelSpec, StreamRates, PMR446_CHANNELS};
pub use probe::RfLevelProbe;
pub use spectrum::{spectrum_decimator, LogPowerFft, SpectrumAccumulator, SpectrumFrame};
pub use stage::Stage;
pub use waterfall::{WaterfallBuffer, WaterfallImage};

/// Complex baseband sample type used throughout the receive chain.
pub type Complex32 = num_complex::Complex<f32>;
