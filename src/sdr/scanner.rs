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

//! The channelized receive graph.
//!
//! [`Scanner`] tunes one wideband source to the middle of the channel plan
//! and builds a FutureSDR flowgraph around it:
//!
//! ```text
//! source ─┬─ xlate[i] ─┬─ squelch ─ nbfm ─ audio lpf ─ gain/mute ─ audio sink   (× channels)
//!         │            └─ power probe
//!         └─ spectrum lpf ─ log-power fft ─ spectrum sink
//! ```
//!
//! The graph is wired once and runs on a background thread with its own
//! tokio runtime until [`Scanner::stop`]. Everything the UI touches while it
//! runs (gain, per-channel controls, RF levels, spectrum frames) lives in
//! shared atomic or briefly-locked state outside the graph.

use super::audio_sink::AudioSink;
use super::demo_source::DemoSource;
use super::file_source::IqFileSource;
use super::power_probe::PowerProbeSink;
use super::rtlsdr_source::RtlSdrSource;
use super::source::{spawn_reader, SourceBlock, SourceControl, SourceSettings, WidebandSource};
use super::spectrum_sink::SpectrumSink;
use super::stage_block::StageBlock;
use crate::audio::AudioOutput;
use crate::refresh::Telemetry;
use futuresdr::anyhow::{bail, Context, Result};
use futuresdr::runtime::{Flowgraph, Runtime};
use pmr_core::channel::{DEFAULT_SQUELCH_DB, DEFAULT_VOLUME};
use pmr_core::{
    spectrum_decimator, ChannelBank, ChannelControl, ChannelPlan, ChannelStages, LogPowerFft,
    SpectrumAccumulator, SpectrumFrame, StreamRates, PMR446_CHANNELS,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Where wideband samples come from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceKind {
    /// Synthetic keyed FM transmitters over noise
    Demo,
    /// Recorded IQ capture, played in a loop
    File {
        /// Path to a `.cf32`/`.iq`/`.cfile` or 16-bit stereo `.wav` capture
        path: PathBuf,
    },
    /// RTL-SDR dongle
    RtlSdr {
        /// Device index (0-based)
        device_index: u32,
        /// Frequency correction in PPM
        ppm_correction: i32,
    },
}

/// Startup parameters of the scanner.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub source: SourceKind,
    pub rates: StreamRates,
    /// Channel frequencies in Hz
    pub frequencies: Vec<f64>,
    /// Initial tuner gain in dB
    pub gain_db: f64,
    /// Initial volume of every channel
    pub volume: f32,
    /// Initial squelch threshold of every channel
    pub squelch_db: f32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Demo,
            rates: StreamRates::default(),
            frequencies: PMR446_CHANNELS.to_vec(),
            gain_db: 35.0,
            volume: DEFAULT_VOLUME,
            squelch_db: DEFAULT_SQUELCH_DB,
        }
    }
}

/// A running channelized receiver.
pub struct Scanner {
    plan: ChannelPlan,
    rates: StreamRates,
    channels: ChannelBank,
    spectrum: Arc<SpectrumAccumulator>,
    source: Arc<SourceControl>,
    reader: Option<JoinHandle<()>>,
    graph: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("center_frequency", &self.plan.center_frequency())
            .field("channels", &self.plan.len())
            .field("gain_db", &self.source.gain())
            .finish_non_exhaustive()
    }
}

impl Scanner {
    /// Validate the configuration, open the source and start the graph.
    ///
    /// `audio` supplies one output per channel, in plan order. Fails without
    /// leaving anything running if the rates or plan are invalid or the
    /// source cannot be opened.
    pub fn start(config: ScannerConfig, audio: Vec<Box<dyn AudioOutput>>) -> Result<Self> {
        config.rates.validate().context("Invalid stream rates")?;
        let plan = ChannelPlan::new(&config.frequencies, &config.rates).context("Invalid channel plan")?;
        if audio.len() != plan.len() {
            bail!(
                "{} audio outputs supplied for {} channels",
                audio.len(),
                plan.len()
            );
        }

        let rates = config.rates;
        log::info!("═══════════════════════════════════════════════════════");
        log::info!("📻 PMR SCANNER STARTING");
        log::info!("═══════════════════════════════════════════════════════");
        log::info!("Source: {:?}", config.source);
        log::info!("Channels: {}", plan.len());
        log::info!("Center Freq: {:.5} MHz", plan.center_frequency() / 1e6);
        log::info!("Sample Rate: {:.3} MS/s", rates.sample_rate / 1e6);
        log::info!("Quad Rate: {:.0} kS/s", rates.quad_rate / 1e3);
        log::info!("Audio Rate: {:.0} S/s", rates.audio_rate);
        log::info!("FFT Size: {} (decimation {})", rates.fft_size, rates.spectrum_decimation);
        log::info!("═══════════════════════════════════════════════════════");

        let channels = ChannelBank::new(plan.len(), config.volume, config.squelch_db);
        let spectrum = Arc::new(SpectrumAccumulator::new(rates.fft_size));
        let source = Arc::new(SourceControl::new(config.gain_db));

        let settings = SourceSettings {
            sample_rate: rates.sample_rate,
            center_frequency: plan.center_frequency(),
            gain_db: config.gain_db,
        };
        let (reader, consumer) = match config.source.clone() {
            SourceKind::Demo => {
                let plan = plan.clone();
                spawn_reader(
                    move || Ok(Box::new(DemoSource::new(&plan)?) as Box<dyn WidebandSource>),
                    settings,
                    Arc::clone(&source),
                )
            }
            SourceKind::File { path } => spawn_reader(
                move || Ok(Box::new(IqFileSource::open(path)?) as Box<dyn WidebandSource>),
                settings,
                Arc::clone(&source),
            ),
            SourceKind::RtlSdr {
                device_index,
                ppm_correction,
            } => spawn_reader(
                move || {
                    Ok(Box::new(RtlSdrSource::open(device_index, ppm_correction)?)
                        as Box<dyn WidebandSource>)
                },
                settings,
                Arc::clone(&source),
            ),
        }
        .context("Failed to open wideband source")?;

        let fg = match build_flowgraph(
            &plan,
            &rates,
            &channels,
            SourceBlock::new(consumer, Arc::clone(&source)),
            audio,
            &spectrum,
        ) {
            Ok(fg) => fg,
            Err(e) => {
                source.request_stop();
                let _ = reader.join();
                return Err(e);
            }
        };

        let source_for_graph = Arc::clone(&source);
        let graph = match std::thread::Builder::new()
            .name("flowgraph".into())
            .spawn(move || run_flowgraph(fg, &source_for_graph))
        {
            Ok(graph) => graph,
            Err(e) => {
                source.request_stop();
                let _ = reader.join();
                return Err(e).context("Failed to spawn flowgraph thread");
            }
        };

        Ok(Self {
            plan,
            rates,
            channels,
            spectrum,
            source,
            reader: Some(reader),
            graph: Some(graph),
        })
    }

    pub fn plan(&self) -> &ChannelPlan {
        &self.plan
    }

    pub fn rates(&self) -> &StreamRates {
        &self.rates
    }

    pub fn channels(&self) -> &ChannelBank {
        &self.channels
    }

    pub fn channel(&self, index: usize) -> Option<&Arc<ChannelControl>> {
        self.channels.get(index)
    }

    /// Change the tuner gain without touching the graph.
    pub fn set_gain(&self, gain_db: f64) {
        self.source.set_gain(gain_db);
    }

    pub fn gain(&self) -> f64 {
        self.source.gain()
    }

    /// See [`ChannelBank::set_solo`].
    pub fn set_solo(&self, channel: Option<usize>) -> bool {
        self.channels.set_solo(channel)
    }

    /// Newest whole spectrum frame since the last call, DC centered.
    pub fn get_spectrum(&self) -> Option<SpectrumFrame> {
        self.spectrum.take_latest()
    }

    /// Raw RF level of every channel, in plan order.
    pub fn rf_levels(&self) -> Vec<f32> {
        self.channels.iter().map(|c| c.rf_level()).collect()
    }

    /// `(samples read, samples dropped)` at the source.
    pub fn source_stats(&self) -> (u64, u64) {
        (self.source.samples_read(), self.source.samples_dropped())
    }

    /// True while the graph thread is alive.
    pub fn is_running(&self) -> bool {
        self.graph.as_ref().is_some_and(|g| !g.is_finished())
    }

    /// Signal the source and the graph to stop (non-blocking, idempotent).
    ///
    /// The reader thread closes its source and the graph drains and exits in
    /// the background; call [`Scanner::join`] to wait for both.
    pub fn stop(&self) {
        if !self.source.stop_requested() {
            log::info!("Stopping scanner...");
            self.source.request_stop();
        }
    }

    /// Wait for the graph and reader threads to finish.
    pub fn join(&mut self) {
        if let Some(graph) = self.graph.take() {
            if graph.join().is_err() {
                log::error!("❌ Flowgraph thread panicked");
            }
        }
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                log::error!("❌ Source reader thread panicked");
            }
        }
        log::info!("✅ Scanner stopped");
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        // Don't join; threads finish in the background so window close stays snappy.
        self.stop();
    }
}

impl Telemetry for Scanner {
    fn rf_levels(&self) -> Vec<f32> {
        Scanner::rf_levels(self)
    }

    fn take_spectrum(&self) -> Option<SpectrumFrame> {
        self.get_spectrum()
    }
}

fn build_flowgraph(
    plan: &ChannelPlan,
    rates: &StreamRates,
    channels: &ChannelBank,
    source: futuresdr::runtime::Block,
    audio: Vec<Box<dyn AudioOutput>>,
    spectrum: &Arc<SpectrumAccumulator>,
) -> Result<Flowgraph> {
    let mut fg = Flowgraph::new();
    let src = fg.add_block(source);

    for (index, (spec, output)) in plan.iter().zip(audio).enumerate() {
        let control = channels
            .get(index)
            .context("channel bank smaller than plan")?;
        let ChannelStages {
            filter,
            squelch,
            demod,
            audio_filter,
            gate,
            probe,
        } = ChannelStages::new(spec, rates, control);

        let xlate = fg.add_block(StageBlock::new("FreqXlatingFilter", filter));
        let squelch = fg.add_block(StageBlock::new("Squelch", squelch));
        let demod = fg.add_block(StageBlock::new("NbfmDemod", demod));
        let lpf = fg.add_block(StageBlock::new("AudioLowPass", audio_filter));
        let gate = fg.add_block(StageBlock::new("VolumeGate", gate));
        let sink = fg.add_block(AudioSink::new(index, output));
        let probe = fg.add_block(PowerProbeSink::new(probe));

        fg.connect_stream(src, "out", xlate, "in")?;
        fg.connect_stream(xlate, "out", squelch, "in")?;
        fg.connect_stream(xlate, "out", probe, "in")?;
        fg.connect_stream(squelch, "out", demod, "in")?;
        fg.connect_stream(demod, "out", lpf, "in")?;
        fg.connect_stream(lpf, "out", gate, "in")?;
        fg.connect_stream(gate, "out", sink, "in")?;

        log::debug!(
            "Channel {:2}: {:.5} MHz (offset {:+.1} kHz)",
            index + 1,
            spec.frequency / 1e6,
            spec.offset / 1e3
        );
    }

    let decimator = fg.add_block(StageBlock::new("SpectrumLowPass", spectrum_decimator(rates)));
    let fft = fg.add_block(StageBlock::new("LogPowerFft", LogPowerFft::new(rates)));
    let sink = fg.add_block(SpectrumSink::new(Arc::clone(spectrum)));
    fg.connect_stream(src, "out", decimator, "in")?;
    fg.connect_stream(decimator, "out", fft, "in")?;
    fg.connect_stream(fft, "out", sink, "in")?;

    log::info!("✅ Flowgraph built: {} channel chains + spectrum path", plan.len());
    Ok(fg)
}

fn run_flowgraph(fg: Flowgraph, source: &SourceControl) {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("Failed to create runtime for flowgraph: {e}");
            source.request_stop();
            return;
        }
    };

    rt.block_on(async {
        log::info!("Starting flowgraph execution...");
        let runtime = Runtime::new();
        let (task, _handle) = runtime.start(fg).await;
        match task.await {
            Ok(_) => log::info!("Flowgraph completed"),
            Err(e) => log::error!("Flowgraph error: {e}"),
        }
    });

    // A graph that died on its own must not leave the reader running.
    source.request_stop();
}
