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

//! Wideband sample sources and the FutureSDR block that feeds them into the graph.
//!
//! Radio drivers and file readers are synchronous, so each source runs on a
//! dedicated reader thread. The thread opens the source itself (some drivers
//! cannot be moved between threads once open), reports the outcome of its
//! initialisation back to the caller, and then pushes samples into a lock-free
//! ring buffer that [`SourceBlock`] drains into the flowgraph.

use futuresdr::anyhow::{anyhow, Result};
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
use pmr_core::atomic::AtomicF32;
use pmr_core::Complex32;
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Ring buffer capacity between the reader thread and the graph, in samples.
///
/// About half a second at 1.92 MS/s.
pub const SOURCE_RING_CAPACITY: usize = 1 << 20;

/// How long the constructor waits for the reader thread to open its source.
const INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// A synchronous producer of wideband complex baseband samples.
///
/// Implementations are opened on the reader thread and never leave it, so
/// they need not be `Send`.
pub trait WidebandSource {
    fn set_sample_rate(&mut self, rate: f64) -> Result<()>;

    fn set_center_frequency(&mut self, frequency: f64) -> Result<()>;

    /// Tuner gain in dB.
    fn set_gain(&mut self, gain_db: f64) -> Result<()>;

    /// Block until the next batch is available and replace `buf` with it.
    fn read(&mut self, buf: &mut Vec<Complex32>) -> Result<()>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

/// Settings applied once when the source is opened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceSettings {
    pub sample_rate: f64,
    pub center_frequency: f64,
    pub gain_db: f64,
}

/// State shared between the reader thread, the source block and the owner.
#[derive(Debug)]
pub struct SourceControl {
    gain_db: AtomicF32,
    gain_pending: AtomicBool,
    stop: AtomicBool,
    failed: AtomicBool,
    samples_read: AtomicU64,
    samples_dropped: AtomicU64,
}

impl SourceControl {
    pub fn new(gain_db: f64) -> Self {
        Self {
            gain_db: AtomicF32::new(gain_db as f32),
            gain_pending: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            samples_read: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
        }
    }

    /// Request a gain change; the reader applies it before its next read.
    pub fn set_gain(&self, gain_db: f64) {
        self.gain_db.store(gain_db as f32);
        self.gain_pending.store(true, Ordering::Release);
    }

    pub fn gain(&self) -> f64 {
        f64::from(self.gain_db.load())
    }

    fn take_gain_change(&self) -> Option<f64> {
        if self.gain_pending.swap(false, Ordering::AcqRel) {
            Some(self.gain())
        } else {
            None
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn samples_read(&self) -> u64 {
        self.samples_read.load(Ordering::Relaxed)
    }

    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped.load(Ordering::Relaxed)
    }
}

/// Start a reader thread for the source produced by `open`.
///
/// Returns once the source is open and configured, or with the error that
/// prevented it. The returned consumer yields samples in arrival order.
pub fn spawn_reader<F>(
    open: F,
    settings: SourceSettings,
    control: Arc<SourceControl>,
) -> Result<(JoinHandle<()>, HeapConsumer<Complex32>)>
where
    F: FnOnce() -> Result<Box<dyn WidebandSource>> + Send + 'static,
{
    let (producer, consumer) = HeapRb::<Complex32>::new(SOURCE_RING_CAPACITY).split();
    let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<()>>();

    let handle = std::thread::Builder::new()
        .name("wideband-reader".into())
        .spawn(move || {
            let source = match open().and_then(|mut source| {
                source.set_sample_rate(settings.sample_rate)?;
                source.set_center_frequency(settings.center_frequency)?;
                source.set_gain(settings.gain_db)?;
                Ok(source)
            }) {
                Ok(source) => source,
                Err(e) => {
                    let _ = init_tx.send(Err(e));
                    return;
                }
            };

            log::info!("Wideband source ready: {}", source.describe());
            let _ = init_tx.send(Ok(()));
            read_loop(source, producer, &control);
        })?;

    match init_rx.recv_timeout(INIT_TIMEOUT) {
        Ok(Ok(())) => Ok((handle, consumer)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(anyhow!("wideband source initialisation timed out")),
    }
}

fn read_loop(
    mut source: Box<dyn WidebandSource>,
    mut producer: HeapProducer<Complex32>,
    control: &SourceControl,
) {
    let mut batch = Vec::new();
    let mut reads = 0u64;

    while !control.stop_requested() {
        if let Some(gain_db) = control.take_gain_change() {
            match source.set_gain(gain_db) {
                Ok(()) => log::info!("Gain set to {gain_db:.1} dB"),
                Err(e) => log::warn!("Failed to set gain to {gain_db:.1} dB: {e}"),
            }
        }

        if let Err(e) = source.read(&mut batch) {
            log::error!("Wideband source read failed after {reads} reads: {e}");
            control.failed.store(true, Ordering::Relaxed);
            break;
        }
        reads += 1;

        // A full ring drops the tail of this batch; the graph catches up on
        // the next one.
        let pushed = producer.push_slice(&batch);
        control.samples_read.fetch_add(batch.len() as u64, Ordering::Relaxed);
        if pushed < batch.len() {
            control
                .samples_dropped
                .fetch_add((batch.len() - pushed) as u64, Ordering::Relaxed);
        }

        if reads % 500 == 0 {
            log::debug!(
                "Reader: {} reads, {} samples, {} dropped, ring {}",
                reads,
                control.samples_read(),
                control.samples_dropped(),
                producer.len()
            );
        }
    }

    log::info!("Wideband reader stopped after {reads} reads");
}

/// Gain at which file and synthetic sources pass samples through unscaled.
pub const REFERENCE_GAIN_DB: f64 = 35.0;

/// Linear scale a software source applies for a requested tuner gain.
pub fn digital_gain(gain_db: f64) -> f32 {
    10f64.powf((gain_db - REFERENCE_GAIN_DB) / 20.0) as f32
}

/// Sleeps a reader so that samples leave it no faster than real time.
#[derive(Debug)]
pub struct Pacer {
    rate: f64,
    start: Instant,
    emitted: u64,
}

impl Pacer {
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            start: Instant::now(),
            emitted: 0,
        }
    }

    pub fn set_rate(&mut self, rate: f64) {
        *self = Self::new(rate);
    }

    /// Account for `samples` more samples and wait until they are due.
    pub fn pace(&mut self, samples: usize) {
        self.emitted += samples as u64;
        let due = Duration::from_secs_f64(self.emitted as f64 / self.rate);
        let elapsed = self.start.elapsed();
        if due > elapsed {
            std::thread::sleep(due - elapsed);
        } else if elapsed - due > Duration::from_secs(1) {
            // Fell far behind (suspend, debugger); don't try to burst.
            *self = Self::new(self.rate);
        }
    }
}

/// FutureSDR source block draining the reader thread's ring buffer.
pub struct SourceBlock {
    consumer: HeapConsumer<Complex32>,
    control: Arc<SourceControl>,
}

impl SourceBlock {
    pub fn new(consumer: HeapConsumer<Complex32>, control: Arc<SourceControl>) -> Block {
        Block::new(
            BlockMetaBuilder::new("WidebandSource").build(),
            StreamIoBuilder::new().add_output::<Complex32>("out").build(),
            MessageIoBuilder::new().build(),
            Self { consumer, control },
        )
    }
}

#[async_trait]
impl Kernel for SourceBlock {
    async fn work(
        &mut self,
        io: &mut WorkIo,
        sio: &mut StreamIo,
        _mio: &mut MessageIo<Self>,
        _meta: &mut BlockMeta,
    ) -> Result<()> {
        if self.control.has_failed() {
            return Err(anyhow!("wideband source stopped with a read error"));
        }
        if self.control.stop_requested() {
            io.finished = true;
            return Ok(());
        }

        let output = sio.output(0).slice::<Complex32>();
        let n = self.consumer.pop_slice(output);

        if n > 0 {
            sio.output(0).produce(n);
        } else {
            tokio::task::yield_now().await;
        }
        io.call_again = true;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting {
        next: f32,
        gains: Arc<std::sync::Mutex<Vec<f64>>>,
    }

    impl WidebandSource for Counting {
        fn set_sample_rate(&mut self, _rate: f64) -> Result<()> {
            Ok(())
        }

        fn set_center_frequency(&mut self, _frequency: f64) -> Result<()> {
            Ok(())
        }

        fn set_gain(&mut self, gain_db: f64) -> Result<()> {
            self.gains.lock().unwrap().push(gain_db);
            Ok(())
        }

        fn read(&mut self, buf: &mut Vec<Complex32>) -> Result<()> {
            std::thread::sleep(Duration::from_millis(1));
            buf.clear();
            for _ in 0..64 {
                buf.push(Complex32::new(self.next, 0.0));
                self.next += 1.0;
            }
            Ok(())
        }

        fn describe(&self) -> String {
            "counting".into()
        }
    }

    fn settings() -> SourceSettings {
        SourceSettings {
            sample_rate: 1.92e6,
            center_frequency: 446.1e6,
            gain_db: 35.0,
        }
    }

    #[test]
    fn test_reader_preserves_order() {
        let control = Arc::new(SourceControl::new(35.0));
        let gains = Arc::new(std::sync::Mutex::new(Vec::new()));
        let gains_for_source = gains.clone();
        let (handle, mut consumer) = spawn_reader(
            move || Ok(Box::new(Counting { next: 0.0, gains: gains_for_source }) as Box<dyn WidebandSource>),
            settings(),
            control.clone(),
        )
        .unwrap();

        let mut seen = Vec::new();
        while seen.len() < 256 {
            if let Some(x) = consumer.pop() {
                seen.push(x.re);
            } else {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        control.request_stop();
        handle.join().unwrap();

        for (i, &v) in seen.iter().enumerate() {
            assert_eq!(v, i as f32);
        }
        assert_eq!(gains.lock().unwrap()[0], 35.0);
    }

    #[test]
    fn test_gain_change_reaches_source() {
        let control = Arc::new(SourceControl::new(35.0));
        let gains = Arc::new(std::sync::Mutex::new(Vec::new()));
        let gains_for_source = gains.clone();
        let (handle, _consumer) = spawn_reader(
            move || Ok(Box::new(Counting { next: 0.0, gains: gains_for_source }) as Box<dyn WidebandSource>),
            settings(),
            control.clone(),
        )
        .unwrap();

        control.set_gain(20.0);
        assert_eq!(control.gain(), 20.0);
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while gains.lock().unwrap().len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        control.request_stop();
        handle.join().unwrap();

        assert_eq!(*gains.lock().unwrap(), vec![35.0, 20.0]);
    }

    #[test]
    fn test_digital_gain_reference() {
        assert!((digital_gain(REFERENCE_GAIN_DB) - 1.0).abs() < 1e-6);
        assert!((digital_gain(REFERENCE_GAIN_DB + 20.0) - 10.0).abs() < 1e-4);
        assert!(digital_gain(10.0) < digital_gain(49.0));
    }

    #[test]
    fn test_pacer_holds_real_time() {
        let mut pacer = Pacer::new(100_000.0);
        let start = Instant::now();
        pacer.pace(5_000);
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn test_open_failure_is_returned() {
        let control = Arc::new(SourceControl::new(35.0));
        let result = spawn_reader(|| Err(anyhow!("no such device")), settings(), control);
        let err = result.err().unwrap();
        assert!(err.to_string().contains("no such device"));
    }
}
