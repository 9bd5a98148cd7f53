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

//! Channel plan and fixed stream rates.
//!
//! The receiver is tuned once, to the mean of all channel frequencies, so
//! every channel sits at a fixed offset inside one capture bandwidth. Rates
//! are startup constants; [`StreamRates::validate`] makes sure every
//! decimation in the chain is an integer and every fixed filter fits below
//! the Nyquist rate it runs at.

use crate::error::{Error, Result};

/// PMR446 channel plan (16 channels, 12.5 kHz raster).
pub const PMR446_CHANNELS: [f64; 16] = [
    446.006_25e6, 446.018_75e6, 446.031_25e6, 446.043_75e6,
    446.056_25e6, 446.068_75e6, 446.081_25e6, 446.093_75e6,
    446.106_25e6, 446.118_75e6, 446.131_25e6, 446.143_75e6,
    446.156_25e6, 446.168_75e6, 446.181_25e6, 446.193_75e6,
];

/// Channel-select filter half-width in Hz.
pub const CHANNEL_CUTOFF_HZ: f64 = 5_800.0;
/// Channel-select filter transition width in Hz.
pub const CHANNEL_TRANSITION_HZ: f64 = 900.0;
/// Audio low-pass cutoff in Hz.
pub const AUDIO_CUTOFF_HZ: f64 = 3_000.0;
/// Audio low-pass transition width in Hz.
pub const AUDIO_TRANSITION_HZ: f64 = 800.0;
/// Demodulator post-discriminator low-pass cutoff in Hz.
pub const DEMOD_AUDIO_CUTOFF_HZ: f64 = 4_500.0;
/// Demodulator post-discriminator low-pass transition width in Hz.
pub const DEMOD_AUDIO_TRANSITION_HZ: f64 = 4_000.0;
/// FM de-emphasis time constant in seconds.
pub const DEEMPHASIS_TAU: f64 = 35e-6;
/// Spectrum decimation low-pass cutoff in Hz.
pub const SPECTRUM_CUTOFF_HZ: f64 = 120_000.0;
/// Spectrum decimation low-pass transition width in Hz.
pub const SPECTRUM_TRANSITION_HZ: f64 = 20_000.0;

/// Fixed sample rates and spectrum parameters of the receive chain.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRates {
    /// Wideband source rate in samples per second
    pub sample_rate: f64,
    /// Per-channel quadrature rate after translation and filtering
    pub quad_rate: f64,
    /// Demodulated audio rate
    pub audio_rate: f64,
    /// Bins per spectrum frame
    pub fft_size: usize,
    /// Decimation applied to the wideband stream before the FFT
    pub spectrum_decimation: usize,
    /// Spectrum frames per second
    pub frame_rate: f64,
    /// Exponential averaging factor for successive spectrum frames
    pub spectrum_average: f32,
    /// Reference scale of the log-power conversion
    pub ref_scale: f32,
}

impl Default for StreamRates {
    fn default() -> Self {
        Self {
            sample_rate: 1_920_000.0,
            quad_rate: 240_000.0,
            audio_rate: 48_000.0,
            fft_size: 1024,
            spectrum_decimation: 8,
            frame_rate: 10.0,
            spectrum_average: 0.25,
            ref_scale: 2.0,
        }
    }
}

impl StreamRates {
    /// Check that every rate is positive, every decimation is integral and
    /// every fixed filter can be designed at the rate it runs at.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("sample_rate", self.sample_rate),
            ("quad_rate", self.quad_rate),
            ("audio_rate", self.audio_rate),
            ("frame_rate", self.frame_rate),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InvalidRate { name, value });
            }
        }
        if self.fft_size == 0 {
            return Err(Error::InvalidRate { name: "fft_size", value: 0.0 });
        }
        if self.spectrum_decimation == 0 {
            return Err(Error::InvalidRate { name: "spectrum_decimation", value: 0.0 });
        }
        if !(0.0..=1.0).contains(&self.spectrum_average) || self.spectrum_average == 0.0 {
            return Err(Error::InvalidRate {
                name: "spectrum_average",
                value: f64::from(self.spectrum_average),
            });
        }
        check_ratio("sample_rate", self.sample_rate, "quad_rate", self.quad_rate)?;
        check_ratio("quad_rate", self.quad_rate, "audio_rate", self.audio_rate)?;

        // The anti-alias stop band starts at quad_rate - (cutoff + transition),
        // so the quadrature rate must clear twice the channel pass band.
        check_cutoff("channel select", CHANNEL_CUTOFF_HZ + CHANNEL_TRANSITION_HZ, self.quad_rate)?;
        check_cutoff("channel anti-alias", self.quad_rate / 2.0, self.sample_rate)?;
        check_cutoff("demodulator audio", DEMOD_AUDIO_CUTOFF_HZ, self.quad_rate)?;
        check_cutoff("audio", AUDIO_CUTOFF_HZ, self.audio_rate)?;
        check_cutoff("spectrum", SPECTRUM_CUTOFF_HZ, self.sample_rate)?;
        Ok(())
    }

    /// Decimation from the wideband rate to the quadrature rate.
    pub fn channel_decimation(&self) -> usize {
        (self.sample_rate / self.quad_rate).round() as usize
    }

    /// Decimation from the quadrature rate to the audio rate.
    pub fn audio_decimation(&self) -> usize {
        (self.quad_rate / self.audio_rate).round() as usize
    }

    /// Sample rate seen by the spectrum estimator.
    pub fn spectrum_rate(&self) -> f64 {
        self.sample_rate / self.spectrum_decimation as f64
    }
}

fn check_ratio(
    numerator: &'static str,
    numerator_rate: f64,
    denominator: &'static str,
    denominator_rate: f64,
) -> Result<()> {
    let ratio = numerator_rate / denominator_rate;
    if ratio < 1.0 || (ratio - ratio.round()).abs() > 1e-9 {
        return Err(Error::RateRatio {
            numerator,
            numerator_rate,
            denominator,
            denominator_rate,
        });
    }
    Ok(())
}

/// `cutoff` must lie strictly below the Nyquist frequency of `rate`.
fn check_cutoff(filter: &'static str, cutoff: f64, rate: f64) -> Result<()> {
    if cutoff >= rate / 2.0 {
        return Err(Error::FilterCutoff { filter, cutoff, rate });
    }
    Ok(())
}

/// One fixed demodulation target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSpec {
    /// Channel frequency in Hz
    pub frequency: f64,
    /// `frequency - center` in Hz
    pub offset: f64,
}

/// Immutable channel plan with its derived center frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelPlan {
    center: f64,
    channels: Vec<ChannelSpec>,
}

impl ChannelPlan {
    /// Build a plan centered on the arithmetic mean of `frequencies`.
    pub fn new(frequencies: &[f64], rates: &StreamRates) -> Result<Self> {
        if frequencies.is_empty() {
            return Err(Error::EmptyPlan);
        }

        let center = frequencies.iter().sum::<f64>() / frequencies.len() as f64;
        let half_bandwidth = rates.sample_rate / 2.0;

        let channels = frequencies
            .iter()
            .map(|&frequency| {
                let offset = frequency - center;
                if offset.abs() + CHANNEL_CUTOFF_HZ + CHANNEL_TRANSITION_HZ > half_bandwidth {
                    return Err(Error::OutOfBand {
                        frequency,
                        offset,
                        half_bandwidth,
                    });
                }
                Ok(ChannelSpec { frequency, offset })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { center, channels })
    }

    /// Frequency the wideband source is tuned to.
    pub fn center_frequency(&self) -> f64 {
        self.center
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ChannelSpec> {
        self.channels.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelSpec> {
        self.channels.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rates_are_valid() {
        let rates = StreamRates::default();
        assert!(rates.validate().is_ok());
        assert_eq!(rates.channel_decimation(), 8);
        assert_eq!(rates.audio_decimation(), 5);
        assert_eq!(rates.spectrum_rate(), 240_000.0);
    }

    #[test]
    fn test_fractional_decimation_rejected() {
        let rates = StreamRates {
            sample_rate: 2_000_000.0,
            ..StreamRates::default()
        };
        assert!(matches!(
            rates.validate(),
            Err(Error::RateRatio { numerator: "sample_rate", .. })
        ));

        let rates = StreamRates {
            audio_rate: 44_100.0,
            ..StreamRates::default()
        };
        assert!(matches!(rates.validate(), Err(Error::RateRatio { .. })));
    }

    #[test]
    fn test_quad_rate_too_low_for_channel_filter() {
        let rates = StreamRates {
            quad_rate: 12_000.0,
            audio_rate: 12_000.0,
            ..StreamRates::default()
        };
        assert!(matches!(
            rates.validate(),
            Err(Error::FilterCutoff { filter: "channel select", .. })
        ));
    }

    #[test]
    fn test_undecimated_channel_rejected() {
        let rates = StreamRates {
            quad_rate: 1_920_000.0,
            audio_rate: 48_000.0,
            ..StreamRates::default()
        };
        assert!(matches!(
            rates.validate(),
            Err(Error::FilterCutoff { filter: "channel anti-alias", .. })
        ));
    }

    #[test]
    fn test_audio_rate_too_low_for_audio_filter() {
        let rates = StreamRates {
            audio_rate: 4_000.0,
            ..StreamRates::default()
        };
        assert!(matches!(
            rates.validate(),
            Err(Error::FilterCutoff { filter: "audio", .. })
        ));
    }

    #[test]
    fn test_sample_rate_too_low_for_spectrum_filter() {
        let rates = StreamRates {
            sample_rate: 240_000.0,
            quad_rate: 48_000.0,
            audio_rate: 16_000.0,
            ..StreamRates::default()
        };
        assert!(matches!(
            rates.validate(),
            Err(Error::FilterCutoff { filter: "spectrum", .. })
        ));
    }

    #[test]
    fn test_zero_fft_size_rejected() {
        let rates = StreamRates {
            fft_size: 0,
            ..StreamRates::default()
        };
        assert_eq!(
            rates.validate(),
            Err(Error::InvalidRate { name: "fft_size", value: 0.0 })
        );
    }

    #[test]
    fn test_pmr446_plan_centered_on_mean() {
        let plan = ChannelPlan::new(&PMR446_CHANNELS, &StreamRates::default()).unwrap();
        assert_eq!(plan.len(), 16);
        assert!((plan.center_frequency() - 446.1e6).abs() < 1e-3);

        let first = plan.get(0).unwrap();
        let last = plan.get(15).unwrap();
        assert!((first.offset + 93_750.0).abs() < 1e-3);
        assert!((last.offset - 93_750.0).abs() < 1e-3);
    }

    #[test]
    fn test_two_channel_offsets() {
        let f0 = 446.006_25e6;
        let plan = ChannelPlan::new(&[f0, f0 + 15_000.0], &StreamRates::default()).unwrap();

        assert!((plan.center_frequency() - (f0 + 7_500.0)).abs() < 1e-6);
        let offsets: Vec<f64> = plan.iter().map(|c| c.offset).collect();
        assert!((offsets[0] + 7_500.0).abs() < 1e-6);
        assert!((offsets[1] - 7_500.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_plan_rejected() {
        assert_eq!(
            ChannelPlan::new(&[], &StreamRates::default()),
            Err(Error::EmptyPlan)
        );
    }

    #[test]
    fn test_channel_outside_capture_rejected() {
        let result = ChannelPlan::new(&[446.0e6, 448.0e6], &StreamRates::default());
        assert!(matches!(result, Err(Error::OutOfBand { .. })));
    }
}
