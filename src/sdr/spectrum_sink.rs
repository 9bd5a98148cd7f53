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

//! Sink block for log-power spectrum frames.
//!
//! Receives whole FFT frames from the spectrum estimator and hands them to
//! the shared [`SpectrumAccumulator`], where the refresh loop picks up the
//! latest one. Nothing here waits on the reader.

use futuresdr::anyhow::Result;
use futuresdr::async_trait::async_trait;
use futuresdr::runtime::Block;
use futuresdr::runtime::BlockMeta;
use futuresdr::runtime::BlockMetaBuilder;
use futuresdr::runtime::Kernel;
use futuresdr::runtime::MessageIo;
use futuresdr::runtime::MessageIoBuilder;
use futuresdr::runtime::StreamIo;
use futuresdr::runtime::StreamIoBuilder;
use futuresdr::runtime::WorkIo;
use pmr_core::SpectrumAccumulator;
use std::sync::Arc;

pub struct SpectrumSink {
    accumulator: Arc<SpectrumAccumulator>,
    fft_size: usize,
    frames: u64,
}

impl SpectrumSink {
    pub fn new(accumulator: Arc<SpectrumAccumulator>) -> Block {
        let fft_size = accumulator.fft_size();
        Block::new(
            BlockMetaBuilder::new("SpectrumSink").build(),
            StreamIoBuilder::new().add_input::<f32>("in").build(),
            MessageIoBuilder::new().build(),
            Self {
                accumulator,
                fft_size,
                frames: 0,
            },
        )
    }
}

#[async_trait]
impl Kernel for SpectrumSink {
    async fn work(
        &mut self,
        io: &mut WorkIo,
        sio: &mut StreamIo,
        _mio: &mut MessageIo<Self>,
        _meta: &mut BlockMeta,
    ) -> Result<()> {
        let input = sio.input(0).slice::<f32>();

        // Whole frames only; a partial frame waits for the rest.
        let n_frames = input.len() / self.fft_size;
        let whole = n_frames * self.fft_size;
        if n_frames > 0 {
            self.accumulator.push(&input[..whole]);
            self.frames += n_frames as u64;

            if self.frames % 100 < n_frames as u64 {
                let frame = &input[whole - self.fft_size..whole];
                let min = frame.iter().copied().fold(f32::INFINITY, f32::min);
                let max = frame.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                log::debug!("Spectrum frame {}: {:.1} to {:.1} dB", self.frames, min, max);
            }
        }

        sio.input(0).consume(whole);

        if sio.input(0).finished() {
            io.finished = true;
        } else if n_frames > 0 {
            io.call_again = true;
        }

        Ok(())
    }
}
