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

//! FutureSDR block that runs any receive-core [`Stage`].

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
use pmr_core::Stage;

/// Adapts a [`Stage`] to the flowgraph: one `in` port, one `out` port.
///
/// The stage decides how much it consumes given the output space, so the
/// block only moves buffer boundaries. It finishes once its upstream has
/// finished and every remaining input sample has been consumed.
pub struct StageBlock<S: Stage> {
    stage: S,
}

impl<S: Stage> StageBlock<S> {
    pub fn new(name: &str, stage: S) -> Block {
        Block::new(
            BlockMetaBuilder::new(name).build(),
            StreamIoBuilder::new()
                .add_input::<S::Input>("in")
                .add_output::<S::Output>("out")
                .build(),
            MessageIoBuilder::new().build(),
            Self { stage },
        )
    }
}

#[async_trait]
impl<S: Stage> Kernel for StageBlock<S> {
    async fn work(
        &mut self,
        io: &mut WorkIo,
        sio: &mut StreamIo,
        _mio: &mut MessageIo<Self>,
        _meta: &mut BlockMeta,
    ) -> Result<()> {
        let input = sio.input(0).slice::<S::Input>();
        let output = sio.output(0).slice::<S::Output>();

        let (consumed, produced) = self.stage.process(input, output);

        sio.input(0).consume(consumed);
        sio.output(0).produce(produced);

        if sio.input(0).finished() && consumed == input.len() {
            io.finished = true;
        } else if consumed > 0 {
            io.call_again = true;
        }

        Ok(())
    }
}
