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

//! RTL-SDR wideband source.
//!
//! Enable the `hardware` feature to compile with RTL-SDR support; without it
//! device enumeration is empty and opening a device fails with a clear error.

use super::source::WidebandSource;
use futuresdr::anyhow::{anyhow, Result};
use pmr_core::Complex32;

/// Bytes per synchronous USB read: 512 packets of 512 bytes.
#[cfg_attr(not(feature = "hardware"), allow(dead_code, reason = "only read with the hardware feature"))]
const READ_SIZE: usize = 262_144;

/// Information about an RTL-SDR device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device index (0-based)
    pub index: u32,
    /// Device name (manufacturer + product)
    pub name: String,
    /// Device serial number
    pub serial: String,
}

/// Enumerate connected RTL-SDR dongles.
#[cfg(feature = "hardware")]
pub fn list_devices() -> Vec<DeviceInfo> {
    let count = rtlsdr::get_device_count();
    let mut devices = Vec::new();

    #[allow(clippy::cast_sign_loss, reason = "device indices are small and non-negative")]
    for i in 0..count {
        let name = rtlsdr::get_device_name(i);
        if let Ok(usb_strings) = rtlsdr::get_device_usb_strings(i) {
            devices.push(DeviceInfo {
                index: i as u32,
                name,
                serial: usb_strings.serial,
            });
        }
    }

    devices
}

/// Enumerate connected RTL-SDR dongles (always empty without the `hardware` feature).
#[cfg(not(feature = "hardware"))]
pub fn list_devices() -> Vec<DeviceInfo> {
    log::warn!("RTL-SDR hardware support not compiled (enable 'hardware' feature)");
    Vec::new()
}

/// Convert interleaved offset-binary `u8` I/Q into complex samples in [-1, 1].
pub fn convert_u8_iq(raw: &[u8], out: &mut Vec<Complex32>) {
    out.clear();
    out.extend(raw.chunks_exact(2).map(|iq| {
        Complex32::new(
            (f32::from(iq[0]) - 127.5) / 127.5,
            (f32::from(iq[1]) - 127.5) / 127.5,
        )
    }));
}

/// An open RTL-SDR dongle.
#[cfg(feature = "hardware")]
pub struct RtlSdrSource {
    index: u32,
    device: rtlsdr::RTLSDRDevice,
    center_frequency: f64,
    sample_rate: f64,
    reads: u64,
}

#[cfg(feature = "hardware")]
impl RtlSdrSource {
    /// Open device `index` and apply the PPM correction.
    ///
    /// Must be called on the thread that will read from the device.
    pub fn open(index: u32, ppm_correction: i32) -> Result<Self> {
        log::info!("Opening RTL-SDR device {index}...");

        #[allow(clippy::cast_possible_wrap, reason = "rtlsdr takes the index as i32")]
        let mut device = rtlsdr::open(index as i32)
            .map_err(|e| anyhow!("Failed to open RTL-SDR device {index}: {e}"))?;

        if ppm_correction != 0 {
            device
                .set_freq_correction(ppm_correction)
                .map_err(|e| anyhow!("Failed to set PPM correction: {e}"))?;
        }
        device
            .reset_buffer()
            .map_err(|e| anyhow!("Failed to reset buffer: {e}"))?;

        log::info!("RTL-SDR device {index} opened (PPM correction {ppm_correction})");
        Ok(Self {
            index,
            device,
            center_frequency: 0.0,
            sample_rate: 0.0,
            reads: 0,
        })
    }
}

#[cfg(feature = "hardware")]
impl WidebandSource for RtlSdrSource {
    fn set_sample_rate(&mut self, rate: f64) -> Result<()> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "RTL-SDR rates fit in u32")]
        self.device
            .set_sample_rate(rate.round() as u32)
            .map_err(|e| anyhow!("Failed to set sample rate: {e}"))?;
        self.sample_rate = rate;
        Ok(())
    }

    fn set_center_frequency(&mut self, frequency: f64) -> Result<()> {
        if !(0.0..=f64::from(u32::MAX)).contains(&frequency) {
            return Err(anyhow!("Center frequency {frequency} Hz is out of range for RTL-SDR"));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "range checked above")]
        self.device
            .set_center_freq(frequency.round() as u32)
            .map_err(|e| anyhow!("Failed to set center frequency: {e}"))?;
        self.center_frequency = frequency;
        Ok(())
    }

    fn set_gain(&mut self, gain_db: f64) -> Result<()> {
        self.device
            .set_tuner_gain_mode(true)
            .map_err(|e| anyhow!("Failed to set gain mode: {e}"))?;
        #[allow(clippy::cast_possible_truncation, reason = "tuner gain is tenths of a dB")]
        self.device
            .set_tuner_gain((gain_db * 10.0).round() as i32)
            .map_err(|e| anyhow!("Failed to set gain: {e}"))?;
        Ok(())
    }

    fn read(&mut self, buf: &mut Vec<Complex32>) -> Result<()> {
        let raw = self
            .device
            .read_sync(READ_SIZE)
            .map_err(|e| anyhow!("RTL-SDR read failed (device unplugged or claimed elsewhere?): {e}"))?;
        convert_u8_iq(&raw, buf);

        self.reads += 1;
        if self.reads % 100 == 0 {
            log::debug!("RTL-SDR read #{}: {} bytes", self.reads, raw.len());
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "RTL-SDR #{} at {:.4} MHz, {:.3} MS/s",
            self.index,
            self.center_frequency / 1e6,
            self.sample_rate / 1e6
        )
    }
}

#[cfg(feature = "hardware")]
impl Drop for RtlSdrSource {
    fn drop(&mut self) {
        log::info!("Closing RTL-SDR device {}", self.index);
    }
}

/// Stand-in when the `hardware` feature is disabled.
#[cfg(not(feature = "hardware"))]
#[derive(Debug)]
pub struct RtlSdrSource;

#[cfg(not(feature = "hardware"))]
impl RtlSdrSource {
    pub fn open(_index: u32, _ppm_correction: i32) -> Result<Self> {
        Err(anyhow!(
            "RTL-SDR hardware support not compiled (rebuild with --features hardware)"
        ))
    }
}

#[cfg(not(feature = "hardware"))]
impl WidebandSource for RtlSdrSource {
    fn set_sample_rate(&mut self, _rate: f64) -> Result<()> {
        Ok(())
    }

    fn set_center_frequency(&mut self, _frequency: f64) -> Result<()> {
        Ok(())
    }

    fn set_gain(&mut self, _gain_db: f64) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, _buf: &mut Vec<Complex32>) -> Result<()> {
        Err(anyhow!("RTL-SDR hardware support not compiled"))
    }

    fn describe(&self) -> String {
        "RTL-SDR (unavailable)".into()
    }
}
