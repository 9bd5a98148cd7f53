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

//! Sink block feeding a channel's RF level probe.

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
use pmr_core::{Complex32, RfLevelProbe};

/// Consumes the channel-filtered stream and publishes its average power.
pub struct PowerProbeSink {
    probe: RfLevelProbe,
}

impl PowerProbeSink {
    pub fn new(probe: RfLevelProbe) -> Block {
        Block::new(
            BlockMetaBuilder::new("PowerProbe").build(),
            StreamIoBuilder::new().add_input::<Complex32>("in").build(),
            MessageIoBuilder::new().build(),
            Self { probe },
        )
    }
}

#[async_trait]
impl Kernel for PowerProbeSink {
    async fn work(
        &mut self,
        io: &mut WorkIo,
        sio: &mut StreamIo,
        _mio: &mut MessageIo<Self>,
        _meta: &mut BlockMeta,
    ) -> Result<()> {
        let input = sio.input(0).slice::<Complex32>();
        self.probe.process(input);
        sio.input(0).consume(input.len());

        if sio.input(0).finished() {
            io.finished = true;
        }

        Ok(())
    }
}
