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

//! Recorded IQ file source.
//!
//! Plays a capture back in a loop at its nominal sample rate. Two formats
//! are understood:
//!
//! - raw interleaved little-endian `f32` I/Q (`.cf32`, `.iq`, `.cfile`)
//! - 16-bit stereo WAV, left channel = I, right channel = Q

use super::source::{digital_gain, Pacer, WidebandSource};
use futuresdr::anyhow::{anyhow, bail, Context, Result};
use hound::WavReader;
use pmr_core::Complex32;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Samples per read.
const BATCH: usize = 16_384;

/// On-disk layout of an IQ capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqFormat {
    Cf32,
    Wav,
}

impl IqFormat {
    /// Guess the format from the file extension; unknown extensions are
    /// treated as raw `f32` pairs.
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "wav" => Self::Wav,
            "cf32" | "iq" | "cfile" => Self::Cf32,
            other => {
                log::warn!("Unknown file extension '.{other}', assuming raw cf32 IQ");
                Self::Cf32
            }
        }
    }
}

enum Reader {
    Cf32(BufReader<File>),
    Wav(WavReader<BufReader<File>>),
}

/// Looping, real-time paced IQ file reader.
pub struct IqFileSource {
    path: PathBuf,
    reader: Reader,
    pacer: Pacer,
    scale: f32,
    bytes: Vec<u8>,
    loops: u64,
}

impl IqFileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            bail!("IQ file not found: {}", path.display());
        }

        let reader = match IqFormat::from_path(&path) {
            IqFormat::Cf32 => {
                let file = File::open(&path)
                    .with_context(|| format!("Failed to open IQ file {}", path.display()))?;
                if file.metadata()?.len() < 8 {
                    bail!("IQ file {} holds no complete sample", path.display());
                }
                Reader::Cf32(BufReader::new(file))
            }
            IqFormat::Wav => Reader::Wav(open_wav(&path)?),
        };

        Ok(Self {
            path,
            reader,
            pacer: Pacer::new(1.0),
            scale: 1.0,
            bytes: vec![0; BATCH * 8],
            loops: 0,
        })
    }

    /// Number of times playback has wrapped to the start of the file.
    #[cfg(test)]
    pub fn loops(&self) -> u64 {
        self.loops
    }

    fn rewind(&mut self) -> Result<()> {
        match &mut self.reader {
            Reader::Cf32(reader) => {
                reader.seek(SeekFrom::Start(0))?;
            }
            Reader::Wav(reader) => reader.seek(0)?,
        }
        self.loops += 1;
        log::debug!("Looping {} (pass {})", self.path.display(), self.loops + 1);
        Ok(())
    }

    fn read_cf32(&mut self, buf: &mut Vec<Complex32>) -> Result<()> {
        let Reader::Cf32(reader) = &mut self.reader else {
            return Ok(());
        };

        let mut filled = 0;
        while filled < self.bytes.len() {
            match reader.read(&mut self.bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        // Drop a trailing partial sample so I and Q stay paired after a rewind.
        let whole = filled / 8 * 8;
        for chunk in self.bytes[..whole].chunks_exact(8) {
            let i = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let q = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
            buf.push(Complex32::new(i, q) * self.scale);
        }

        if filled < self.bytes.len() {
            self.rewind()?;
        }
        Ok(())
    }

    fn read_wav(&mut self, buf: &mut Vec<Complex32>) -> Result<()> {
        let scale = self.scale / 32768.0;
        let Reader::Wav(reader) = &mut self.reader else {
            return Ok(());
        };

        let mut samples = reader.samples::<i16>();
        let mut exhausted = false;
        while buf.len() < BATCH {
            let (Some(i), Some(q)) = (samples.next(), samples.next()) else {
                exhausted = true;
                break;
            };
            buf.push(Complex32::new(f32::from(i?), f32::from(q?)) * scale);
        }

        if exhausted {
            self.rewind()?;
        }
        Ok(())
    }
}

fn open_wav(path: &Path) -> Result<WavReader<BufReader<File>>> {
    let reader = WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file {}", path.display()))?;
    let spec = reader.spec();

    if spec.channels != 2 {
        bail!(
            "WAV file must be stereo (2 channels), found {} channels",
            spec.channels
        );
    }
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        bail!(
            "WAV file must be 16-bit integer, found {} bits per sample",
            spec.bits_per_sample
        );
    }
    if reader.duration() == 0 {
        bail!("WAV file {} holds no samples", path.display());
    }

    log::info!("Opened WAV file:");
    log::info!("  Sample rate: {} Hz", spec.sample_rate);
    log::info!("  Duration: {:.2} seconds", f64::from(reader.duration()) / f64::from(spec.sample_rate));

    Ok(reader)
}

impl WidebandSource for IqFileSource {
    fn set_sample_rate(&mut self, rate: f64) -> Result<()> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(anyhow!("invalid playback rate {rate}"));
        }
        if let Reader::Wav(reader) = &self.reader {
            let file_rate = f64::from(reader.spec().sample_rate);
            if (file_rate - rate).abs() > 0.5 {
                log::warn!(
                    "{} was recorded at {file_rate} Hz but is played back at {rate} Hz; channels will be mistuned",
                    self.path.display()
                );
            }
        }
        self.pacer.set_rate(rate);
        Ok(())
    }

    fn set_center_frequency(&mut self, frequency: f64) -> Result<()> {
        log::info!(
            "File playback assumes the capture was centered on {:.4} MHz",
            frequency / 1e6
        );
        Ok(())
    }

    fn set_gain(&mut self, gain_db: f64) -> Result<()> {
        self.scale = digital_gain(gain_db);
        Ok(())
    }

    fn read(&mut self, buf: &mut Vec<Complex32>) -> Result<()> {
        buf.clear();
        match self.reader {
            Reader::Cf32(_) => self.read_cf32(buf)?,
            Reader::Wav(_) => self.read_wav(buf)?,
        }
        self.pacer.pace(buf.len());
        Ok(())
    }

    fn describe(&self) -> String {
        let format = match self.reader {
            Reader::Cf32(_) => "cf32",
            Reader::Wav(_) => "16-bit WAV",
        };
        format!("IQ file {} ({format}, looped)", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdr::source::REFERENCE_GAIN_DB;
    use std::io::Write;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pmr-monitor-{}-{name}", std::process::id()))
    }

    fn write_cf32(path: &Path, samples: &[(f32, f32)]) {
        let mut file = File::create(path).unwrap();
        for &(i, q) in samples {
            file.write_all(&i.to_le_bytes()).unwrap();
            file.write_all(&q.to_le_bytes()).unwrap();
        }
    }

    fn open_fast(path: &Path) -> IqFileSource {
        let mut source = IqFileSource::open(path).unwrap();
        source.set_sample_rate(1e12).unwrap();
        source.set_gain(REFERENCE_GAIN_DB).unwrap();
        source
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(IqFormat::from_path(Path::new("a.cf32")), IqFormat::Cf32);
        assert_eq!(IqFormat::from_path(Path::new("a.IQ")), IqFormat::Cf32);
        assert_eq!(IqFormat::from_path(Path::new("a.cfile")), IqFormat::Cf32);
        assert_eq!(IqFormat::from_path(Path::new("a.wav")), IqFormat::Wav);
        assert_eq!(IqFormat::from_path(Path::new("a.bin")), IqFormat::Cf32);
    }

    #[test]
    fn test_cf32_reads_and_loops() {
        let path = temp_path("loop.cf32");
        write_cf32(&path, &[(0.5, -0.5), (0.25, 0.75), (-1.0, 1.0)]);

        let mut source = open_fast(&path);
        let mut buf = Vec::new();
        source.read(&mut buf).unwrap();
        assert_eq!(buf, vec![
            Complex32::new(0.5, -0.5),
            Complex32::new(0.25, 0.75),
            Complex32::new(-1.0, 1.0),
        ]);
        assert_eq!(source.loops(), 1);

        source.read(&mut buf).unwrap();
        assert_eq!(buf[0], Complex32::new(0.5, -0.5));
        assert_eq!(source.loops(), 2);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_wav_scaling() {
        let path = temp_path("iq.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for (i, q) in [(16384i16, -16384i16), (0, 32767)] {
            writer.write_sample(i).unwrap();
            writer.write_sample(q).unwrap();
        }
        writer.finalize().unwrap();

        let mut source = open_fast(&path);
        let mut buf = Vec::new();
        source.read(&mut buf).unwrap();
        assert_eq!(buf.len(), 2);
        assert_eq!(buf[0], Complex32::new(0.5, -0.5));
        assert!((buf[1].im - 32767.0 / 32768.0).abs() < 1e-6);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_mono_wav_rejected() {
        let path = temp_path("mono.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.finalize().unwrap();

        let err = IqFileSource::open(&path).err().unwrap();
        assert!(err.to_string().contains("stereo"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file() {
        assert!(IqFileSource::open(temp_path("missing.cf32")).is_err());
    }
}
