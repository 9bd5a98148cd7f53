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

//! Audio output for the demodulated channels.
//!
//! Every channel writes into its own [`AudioOutput`]. On a real device each
//! output is the producer half of a ring buffer; a single cpal output stream
//! pops one sample from every ring per frame, sums them and plays the mix.
//! Writes never block: when a ring is full the excess is dropped, which keeps
//! audio latency bounded if the graph runs ahead of the sound card.
//!
//! Failure is tracked per channel. A channel that hands the mixer a
//! non-finite sample is taken out of the mix and its output starts
//! returning [`AudioError::ChannelFailed`]; the other channels keep playing.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Per-channel ring capacity in seconds of audio.
const RING_SECONDS: f32 = 0.5;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no default audio output device")]
    NoDevice,

    #[error("audio device does not support {rate} Hz float output")]
    UnsupportedConfig { rate: u32 },

    #[error("failed to query audio device: {0}")]
    Query(#[from] cpal::SupportedStreamConfigsError),

    #[error("failed to build audio stream: {0}")]
    Build(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    Play(#[from] cpal::PlayStreamError),

    #[error("channel was dropped from the audio mix")]
    ChannelFailed,
}

/// Destination for one channel's audio samples.
pub trait AudioOutput: Send {
    /// Queue `samples` without blocking and return how many were accepted.
    fn write(&mut self, samples: &[f32]) -> Result<usize, AudioError>;
}

/// Discards everything; used with `--no-audio` and when no device opens.
#[derive(Debug, Default)]
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn write(&mut self, samples: &[f32]) -> Result<usize, AudioError> {
        Ok(samples.len())
    }
}

/// Producer side of one channel's ring into the mixer.
pub struct RingOutput {
    producer: HeapProducer<f32>,
    failed: Arc<AtomicBool>,
}

impl AudioOutput for RingOutput {
    fn write(&mut self, samples: &[f32]) -> Result<usize, AudioError> {
        if self.failed.load(Ordering::Relaxed) {
            return Err(AudioError::ChannelFailed);
        }
        Ok(self.producer.push_slice(samples))
    }
}

/// Mixer side of one channel: its ring and its own failure flag.
pub struct MixerInput {
    consumer: HeapConsumer<f32>,
    failed: Arc<AtomicBool>,
}

impl MixerInput {
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    /// Next sample, or `None` if the ring is empty or the channel failed.
    fn next_sample(&mut self) -> Option<f32> {
        if self.has_failed() {
            return None;
        }
        let sample = self.consumer.pop()?;
        if sample.is_finite() {
            Some(sample)
        } else {
            self.failed.store(true, Ordering::Relaxed);
            self.consumer.clear();
            None
        }
    }
}

/// Outputs that discard audio, one per channel.
pub fn null_outputs(count: usize) -> Vec<Box<dyn AudioOutput>> {
    (0..count)
        .map(|_| Box::new(NullOutput) as Box<dyn AudioOutput>)
        .collect()
}

/// Ring outputs for `count` channels and the inputs a mixer drains.
pub fn ring_outputs(count: usize, capacity: usize) -> (Vec<Box<dyn AudioOutput>>, Vec<MixerInput>) {
    let mut outputs: Vec<Box<dyn AudioOutput>> = Vec::with_capacity(count);
    let mut inputs = Vec::with_capacity(count);
    for _ in 0..count {
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let failed = Arc::new(AtomicBool::new(false));
        outputs.push(Box::new(RingOutput {
            producer,
            failed: Arc::clone(&failed),
        }));
        inputs.push(MixerInput { consumer, failed });
    }
    (outputs, inputs)
}

/// Sum one sample from every live ring into each frame of `data`.
///
/// Empty rings and failed channels contribute silence. The mono mix is
/// written to all `channels` of an interleaved frame and clipped to [-1, 1].
pub fn mix_into(inputs: &mut [MixerInput], data: &mut [f32], channels: usize) {
    for frame in data.chunks_mut(channels.max(1)) {
        let sum: f32 = inputs.iter_mut().filter_map(MixerInput::next_sample).sum();
        frame.fill(sum.clamp(-1.0, 1.0));
    }
}

/// The running output stream; audio stops when this is dropped.
///
/// cpal streams cannot move between threads, so the mixer stays with
/// whoever opened it (the main thread).
pub struct AudioMixer {
    _stream: cpal::Stream,
    device_name: String,
    sample_rate: u32,
}

impl std::fmt::Debug for AudioMixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioMixer")
            .field("device_name", &self.device_name)
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

impl AudioMixer {
    /// Open the default output device at `sample_rate` and return one
    /// output per channel.
    pub fn open(
        count: usize,
        sample_rate: u32,
    ) -> Result<(Self, Vec<Box<dyn AudioOutput>>), AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
        let device_name = device.name().unwrap_or_else(|_| String::from("unknown"));

        let supported = device
            .supported_output_configs()?
            .filter(|cfg| cfg.sample_format() == cpal::SampleFormat::F32)
            .find(|cfg| {
                cfg.min_sample_rate().0 <= sample_rate && cfg.max_sample_rate().0 >= sample_rate
            })
            .ok_or(AudioError::UnsupportedConfig { rate: sample_rate })?
            .with_sample_rate(cpal::SampleRate(sample_rate));
        let config: cpal::StreamConfig = supported.into();
        let channels = usize::from(config.channels);

        let capacity = (sample_rate as f32 * RING_SECONDS) as usize;
        let (outputs, mut inputs) = ring_outputs(count, capacity);

        // Device errors are shared by every channel; the rings keep accepting
        // (and dropping when full) so no sink ever blocks on them.
        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                mix_into(&mut inputs, data, channels);
            },
            move |err| {
                log::error!("Audio output stream error: {err}");
            },
            None,
        )?;
        stream.play()?;

        log::info!(
            "Audio output: {device_name}, {sample_rate} Hz, {channels} channel(s), mixing {count} receivers"
        );

        Ok((
            Self {
                _stream: stream,
                device_name,
                sample_rate,
            },
            outputs,
        ))
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_sums_channels() {
        let (mut outputs, mut inputs) = ring_outputs(3, 16);
        outputs[0].write(&[0.25, 0.25]).unwrap();
        outputs[2].write(&[0.5]).unwrap();

        let mut data = [9.0f32; 6];
        mix_into(&mut inputs, &mut data, 2);
        assert_eq!(data, [0.75, 0.75, 0.25, 0.25, 0.0, 0.0]);
    }

    #[test]
    fn test_mix_clips() {
        let (mut outputs, mut inputs) = ring_outputs(2, 4);
        outputs[0].write(&[0.9]).unwrap();
        outputs[1].write(&[0.9]).unwrap();

        let mut data = [0.0f32; 1];
        mix_into(&mut inputs, &mut data, 1);
        assert_eq!(data[0], 1.0);
    }

    #[test]
    fn test_full_ring_drops_excess() {
        let (mut outputs, _inputs) = ring_outputs(1, 4);
        assert_eq!(outputs[0].write(&[0.1; 6]).unwrap(), 4);
        assert_eq!(outputs[0].write(&[0.1]).unwrap(), 0);
    }

    #[test]
    fn test_non_finite_channel_is_isolated() {
        let (mut outputs, mut inputs) = ring_outputs(3, 16);
        outputs[0].write(&[0.25, 0.25, 0.25]).unwrap();
        outputs[1].write(&[f32::NAN, 0.5, 0.5]).unwrap();
        outputs[2].write(&[0.125, 0.125, 0.125]).unwrap();

        let mut data = [0.0f32; 3];
        mix_into(&mut inputs, &mut data, 1);
        assert_eq!(data, [0.375, 0.375, 0.375]);

        assert!(!inputs[0].has_failed());
        assert!(inputs[1].has_failed());
        assert!(!inputs[2].has_failed());

        assert!(matches!(outputs[1].write(&[0.1]), Err(AudioError::ChannelFailed)));
        assert_eq!(outputs[0].write(&[0.1]).unwrap(), 1);
        assert_eq!(outputs[2].write(&[0.1]).unwrap(), 1);
    }

    #[test]
    fn test_null_output_accepts_all() {
        let mut outputs = null_outputs(16);
        assert_eq!(outputs.len(), 16);
        assert_eq!(outputs[3].write(&[0.0; 100]).unwrap(), 100);
    }
}
