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

//! Sink block handing a channel's audio to its output.

use crate::audio::AudioOutput;
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

/// Writes gated audio to an [`AudioOutput`] without blocking.
///
/// All input is consumed whether or not the output accepted it, so a slow
/// or failed output never backs up the channel. A failing output is
/// reported once; the channel keeps running silently.
pub struct AudioSink {
    channel: usize,
    output: Box<dyn AudioOutput>,
    failed: bool,
    dropped: u64,
}

impl AudioSink {
    pub fn new(channel: usize, output: Box<dyn AudioOutput>) -> Block {
        Block::new(
            BlockMetaBuilder::new("AudioSink").build(),
            StreamIoBuilder::new().add_input::<f32>("in").build(),
            MessageIoBuilder::new().build(),
            Self::with_output(channel, output),
        )
    }

    fn with_output(channel: usize, output: Box<dyn AudioOutput>) -> Self {
        Self {
            channel,
            output,
            failed: false,
            dropped: 0,
        }
    }

    /// Hand `input` to the output and return how much to consume: always all of it.
    fn deliver(&mut self, input: &[f32]) -> usize {
        if input.is_empty() || self.failed {
            return input.len();
        }
        match self.output.write(input) {
            Ok(accepted) if accepted < input.len() => {
                let short = (input.len() - accepted) as u64;
                self.dropped += short;
                if self.dropped % 48_000 < short {
                    log::debug!(
                        "Channel {} audio ring full, {} samples dropped so far",
                        self.channel + 1,
                        self.dropped
                    );
                }
            }
            Ok(_) => {}
            Err(e) => {
                log::error!("Channel {} audio output failed, muting it: {e}", self.channel + 1);
                self.failed = true;
            }
        }
        input.len()
    }
}

#[async_trait]
impl Kernel for AudioSink {
    async fn work(
        &mut self,
        io: &mut WorkIo,
        sio: &mut StreamIo,
        _mio: &mut MessageIo<Self>,
        _meta: &mut BlockMeta,
    ) -> Result<()> {
        let input = sio.input(0).slice::<f32>();
        let consumed = self.deliver(input);
        sio.input(0).consume(consumed);

        if sio.input(0).finished() {
            io.finished = true;
        }

        Ok(())
    }
}
